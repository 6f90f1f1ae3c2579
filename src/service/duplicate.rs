use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 批量输入中的一行及其重复标记
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedCode {
    pub code: String,
    pub duplicate: bool,
}

fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

/// 标记批内重复: 同一运单号 (去空格、不区分大小写) 的第 2..n 次出现
///
/// 每次编辑后对整个列表重新计算, 不做增量修补。这只是界面预检,
/// 权威的唯一性约束在存储层。
pub fn flag_duplicates<S: AsRef<str>>(codes: &[S]) -> Vec<bool> {
    let mut seen: HashSet<String> = HashSet::with_capacity(codes.len());
    codes
        .iter()
        .map(|code| {
            let key = normalize(code.as_ref());
            !key.is_empty() && !seen.insert(key)
        })
        .collect()
}

pub fn flag_batch<S: AsRef<str>>(codes: &[S]) -> Vec<FlaggedCode> {
    codes
        .iter()
        .zip(flag_duplicates(codes))
        .map(|(code, duplicate)| FlaggedCode {
            code: code.as_ref().to_string(),
            duplicate,
        })
        .collect()
}
