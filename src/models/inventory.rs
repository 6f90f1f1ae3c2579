use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Platform, SourcePlatform};

/// 库存/零件主数据 (外部维护, 引擎只读 + 扣减)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct StockItem {
    pub part_number: String,
    pub name: String,
    pub quantity: i32,
}

/// 运单明细行 (第三阶段写入)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Uuid,
    pub resi: String,
    pub order_id: String,
    pub part_number: String,
    pub product_name: String,
    pub quantity: i32,
    pub harga_total: BigDecimal,
    pub customer: String,
    pub platform: Platform,
    pub created_at: DateTime<Utc>,
}

/// 已售台账记录, 写入时同时扣减库存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoldItem {
    pub id: Uuid,
    pub resi: String,
    pub part_number: String,
    pub quantity: i32,
    pub harga_total: BigDecimal,
    pub customer: String,
    pub platform: Platform,
    pub sub_channel: String,
    pub processed_by: String,
    pub sold_at: DateTime<Utc>,
}

/// 商品别名字典: (零件号, 别名, 来源平台) 唯一
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductAlias {
    pub part_number: String,
    pub alias_name: String,
    pub source: SourcePlatform,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Reseller {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// 即时配送记录, 扫描即扣库存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KilatShipment {
    pub id: Uuid,
    pub resi: String,
    pub part_number: String,
    pub quantity: i32,
    pub sub_channel: String,
    pub scanned_by: String,
    pub scanned_at: DateTime<Utc>,
}

/// 单张运单的最终入账: 已售记录、明细行与第三阶段标记在同一事务内写入
#[derive(Debug, Clone)]
pub struct ReceiptPosting {
    pub resi: String,
    pub sales: Vec<SoldItem>,
    pub items: Vec<LineItem>,
    pub processed_at: DateTime<Utc>,
}
