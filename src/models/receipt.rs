use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// 销售渠道 (封闭枚举)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    Shopee,
    Tiktok,
    /// 即时配送, 扫描即扣库存
    Kilat,
    Reseller,
    Export,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Shopee => "SHOPEE",
            Platform::Tiktok => "TIKTOK",
            Platform::Kilat => "KILAT",
            Platform::Reseller => "RESELLER",
            Platform::Export => "EXPORT",
        }
    }

    /// 子渠道字段的含义随平台变化
    pub fn sub_channel_label(&self) -> &'static str {
        match self {
            Platform::Export => "negara",
            Platform::Reseller => "reseller",
            _ => "sub toko",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SHOPEE" => Ok(Platform::Shopee),
            "TIKTOK" => Ok(Platform::Tiktok),
            "KILAT" | "INSTANT" => Ok(Platform::Kilat),
            "RESELLER" => Ok(Platform::Reseller),
            "EXPORT" => Ok(Platform::Export),
            other => Err(EngineError::Validation(format!("unknown platform '{other}'"))),
        }
    }
}

/// 仓库分区代码, 同时用作物理表名后缀, 因此只允许 `[a-z0-9_]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreCode(String);

impl StoreCode {
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let code = raw.trim().to_lowercase();
        if code.is_empty() {
            return Err(EngineError::Validation("store code is empty".into()));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(EngineError::Validation(format!("invalid store code '{raw}'")));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 逻辑表名 -> 物理表名
    pub fn table(&self, logical: &str) -> String {
        format!("{}_{}", logical, self.0)
    }
}

impl TryFrom<String> for StoreCode {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StoreCode::parse(&value)
    }
}

impl From<StoreCode> for String {
    fn from(value: StoreCode) -> Self {
        value.0
    }
}

impl fmt::Display for StoreCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 运单生命周期阶段 (由三个时间戳推导, 不单独存储)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Unscanned,
    Stage1Scanned,
    Stage2Verified,
    Stage3Processed,
}

/// 第一阶段唯一性范围: (运单号, 平台, 子渠道), 仓库由表分区决定
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanScope {
    pub code: String,
    pub platform: Platform,
    pub sub_channel: String,
}

impl fmt::Display for ScanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform, self.sub_channel)
    }
}

/// 运单扫描记录 ("resi")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptScan {
    pub id: Uuid,
    pub code: String,
    pub platform: Platform,
    pub sub_channel: String,
    pub store: StoreCode,
    pub scanned_by: String,
    pub verified_by: Option<String>,
    stage1_scanned_at: Option<DateTime<Utc>>,
    stage2_verified_at: Option<DateTime<Utc>>,
    stage3_completed_at: Option<DateTime<Utc>>,
}

impl ReceiptScan {
    /// 第一阶段扫描新建记录
    pub fn scanned(
        code: &str,
        platform: Platform,
        sub_channel: &str,
        store: StoreCode,
        scanned_by: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.trim().to_string(),
            platform,
            sub_channel: sub_channel.trim().to_string(),
            store,
            scanned_by: scanned_by.trim().to_string(),
            verified_by: None,
            stage1_scanned_at: Some(at),
            stage2_verified_at: None,
            stage3_completed_at: None,
        }
    }

    /// 从存储行重建, 调用方负责校验阶段链
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: Uuid,
        code: String,
        platform: Platform,
        sub_channel: String,
        store: StoreCode,
        scanned_by: String,
        verified_by: Option<String>,
        markers: [Option<DateTime<Utc>>; 3],
    ) -> Self {
        let [stage1_scanned_at, stage2_verified_at, stage3_completed_at] = markers;
        Self {
            id,
            code,
            platform,
            sub_channel,
            store,
            scanned_by,
            verified_by,
            stage1_scanned_at,
            stage2_verified_at,
            stage3_completed_at,
        }
    }

    pub fn stage1_scanned_at(&self) -> Option<DateTime<Utc>> {
        self.stage1_scanned_at
    }

    pub fn stage2_verified_at(&self) -> Option<DateTime<Utc>> {
        self.stage2_verified_at
    }

    pub fn stage3_completed_at(&self) -> Option<DateTime<Utc>> {
        self.stage3_completed_at
    }

    /// 从第三阶段往下, 首个命中的标记即为当前阶段
    pub fn stage(&self) -> Stage {
        if self.stage3_completed_at.is_some() {
            Stage::Stage3Processed
        } else if self.stage2_verified_at.is_some() {
            Stage::Stage2Verified
        } else if self.stage1_scanned_at.is_some() {
            Stage::Stage1Scanned
        } else {
            Stage::Unscanned
        }
    }

    /// stage3 ⟹ stage2 ⟹ stage1
    pub fn has_valid_chain(&self) -> bool {
        (self.stage3_completed_at.is_none() || self.stage2_verified_at.is_some())
            && (self.stage2_verified_at.is_none() || self.stage1_scanned_at.is_some())
    }

    pub fn scope(&self) -> ScanScope {
        ScanScope {
            code: self.code.clone(),
            platform: self.platform,
            sub_channel: self.sub_channel.clone(),
        }
    }

    pub fn mark_verified(&mut self, verified_by: &str, at: DateTime<Utc>) -> EngineResult<()> {
        match self.stage() {
            Stage::Unscanned => Err(EngineError::NotFound(self.code.clone())),
            Stage::Stage1Scanned => {
                self.stage2_verified_at = Some(at);
                self.verified_by = Some(verified_by.trim().to_string());
                Ok(())
            }
            Stage::Stage2Verified | Stage::Stage3Processed => {
                Err(EngineError::AlreadyVerified(self.code.clone()))
            }
        }
    }

    pub fn mark_processed(&mut self, at: DateTime<Utc>) -> EngineResult<()> {
        match self.stage() {
            Stage::Stage2Verified => {
                self.stage3_completed_at = Some(at);
                Ok(())
            }
            Stage::Stage3Processed => Err(EngineError::Committed(self.code.clone())),
            _ => Err(EngineError::InvalidStageChain(self.code.clone())),
        }
    }
}

/// 扫描错误修正 (不触碰阶段标记)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiptUpdate {
    pub code: Option<String>,
    pub platform: Option<Platform>,
    pub sub_channel: Option<String>,
}

impl ReceiptUpdate {
    pub fn is_empty(&self) -> bool {
        self.code.is_none() && self.platform.is_none() && self.sub_channel.is_none()
    }
}

/// 列表查询条件; 日期窗口按第一阶段扫描时间过滤
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanQuery {
    pub min_stage: Option<Stage>,
    pub stage: Option<Stage>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ScanQuery {
    pub fn matches(&self, scan: &ReceiptScan) -> bool {
        let stage = scan.stage();
        if self.min_stage.is_some_and(|min| stage < min) {
            return false;
        }
        if self.stage.is_some_and(|s| stage != s) {
            return false;
        }
        let at = scan.stage1_scanned_at();
        if let Some(from) = self.from {
            if at.map_or(true, |t| t < from) {
                return false;
            }
        }
        if let Some(to) = self.to {
            if at.map_or(true, |t| t > to) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mjm() -> StoreCode {
        StoreCode::parse("MJM").unwrap()
    }

    #[test]
    fn store_code_is_normalized_and_guarded() {
        assert_eq!(mjm().as_str(), "mjm");
        assert_eq!(mjm().table("scan_resi"), "scan_resi_mjm");
        assert!(StoreCode::parse("mjm-1").is_err());
        assert!(StoreCode::parse("  ").is_err());
    }

    #[test]
    fn stage_is_derived_first_match_from_stage3() {
        let now = Utc::now();
        let mut scan = ReceiptScan::scanned(" SPX001 ", Platform::Shopee, "MJM", mjm(), "op", now);
        assert_eq!(scan.code, "SPX001");
        assert_eq!(scan.stage(), Stage::Stage1Scanned);

        scan.mark_verified("packer", now).unwrap();
        assert_eq!(scan.stage(), Stage::Stage2Verified);
        assert!(matches!(
            scan.mark_verified("packer", now),
            Err(EngineError::AlreadyVerified(_))
        ));

        scan.mark_processed(now).unwrap();
        assert_eq!(scan.stage(), Stage::Stage3Processed);
        assert!(scan.has_valid_chain());
    }

    #[test]
    fn processing_requires_verification() {
        let mut scan = ReceiptScan::scanned("SPX002", Platform::Tiktok, "MJM", mjm(), "op", Utc::now());
        assert!(matches!(
            scan.mark_processed(Utc::now()),
            Err(EngineError::InvalidStageChain(_))
        ));
        assert!(scan.stage3_completed_at().is_none());
    }

    #[test]
    fn broken_chain_is_detected() {
        let now = Utc::now();
        let scan = ReceiptScan::from_parts(
            Uuid::new_v4(),
            "X".into(),
            Platform::Export,
            "MY".into(),
            mjm(),
            "op".into(),
            None,
            [Some(now), None, Some(now)],
        );
        assert!(!scan.has_valid_chain());
    }

    #[test]
    fn platform_parses_instant_alias() {
        assert_eq!("instant".parse::<Platform>().unwrap(), Platform::Kilat);
        assert_eq!(Platform::Kilat.to_string(), "KILAT");
        assert!("lazada".parse::<Platform>().is_err());
    }
}
