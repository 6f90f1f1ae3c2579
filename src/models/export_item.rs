use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Platform;

/// 可导入的电商后台导出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourcePlatform {
    Shopee,
    Tiktok,
}

impl SourcePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourcePlatform::Shopee => "SHOPEE",
            SourcePlatform::Tiktok => "TIKTOK",
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            SourcePlatform::Shopee => Platform::Shopee,
            SourcePlatform::Tiktok => Platform::Tiktok,
        }
    }
}

impl fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CSV 导出行 (临时对象, 不单独持久化)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvExportItem {
    pub tracking_code: String,
    pub order_id: String,
    pub order_status: String,
    pub shipping_option: String,
    pub customer_name: String,
    pub sku: String,
    pub product_name: String,
    pub quantity: i32,
    /// 折算为基础货币后的总价
    pub total_price_base: BigDecimal,
    pub source_platform: SourcePlatform,
}
