use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::StoreError;
use crate::parser::ParseError;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// 引擎错误分类
///
/// 业务规则失败 (重复、未找到、已验证) 以 `Err` 值返回给调用方, 由调用方选择提示音;
/// 只有存储故障属于意外情况。
#[derive(Debug, Error)]
pub enum EngineError {
    /// 必填字段为空, 在任何持久化调用之前拒绝
    #[error("validation failed: {0}")]
    Validation(String),

    /// 同一范围内已存在相同运单号 (扫描或恢复时)
    #[error("resi {code} already scanned ({scope})")]
    Duplicate { code: String, scope: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// 第二阶段重复验证: 同一张运单再次出现在摄像头前
    #[error("resi {0} already verified")]
    AlreadyVerified(String),

    /// 第三阶段已扣减库存, 禁止删除
    #[error("resi {0} already posted to the sales ledger")]
    Committed(String),

    #[error("invalid stage chain for resi {0}")]
    InvalidStageChain(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// 可区分的结果码, 驱动前端提示音/提示框路由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeCode {
    Success,
    Duplicate,
    AlreadyVerified,
    NotFound,
    Validation,
    Committed,
    Error,
}

/// 操作员提示信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSignal {
    Success,
    Duplicate,
    Error,
}

impl OutcomeCode {
    /// 重复扫描与重复验证共用 "已扫描" 提示, 与一般错误区分
    pub fn alert(self) -> AlertSignal {
        match self {
            OutcomeCode::Success => AlertSignal::Success,
            OutcomeCode::Duplicate | OutcomeCode::AlreadyVerified => AlertSignal::Duplicate,
            _ => AlertSignal::Error,
        }
    }
}

impl From<ParseError> for EngineError {
    fn from(err: ParseError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl EngineError {
    pub fn outcome(&self) -> OutcomeCode {
        match self {
            EngineError::Validation(_) | EngineError::InvalidStageChain(_) => OutcomeCode::Validation,
            EngineError::Duplicate { .. } => OutcomeCode::Duplicate,
            EngineError::NotFound(_) => OutcomeCode::NotFound,
            EngineError::AlreadyVerified(_) => OutcomeCode::AlreadyVerified,
            EngineError::Committed(_) => OutcomeCode::Committed,
            EngineError::Storage(_) => OutcomeCode::Error,
        }
    }

    /// 是否为存储层意外故障 (其余均为预期内的业务失败)
    pub fn is_fault(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}
