use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    KilatShipment, ProductAlias, ReceiptPosting, ReceiptScan, Reseller, ScanQuery, ScanScope,
    SourcePlatform, Stage, StockItem, StoreCode,
};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// 违反唯一约束 (权威的重复判定)
    #[error("unique constraint violated on {table}")]
    UniqueViolation { table: String },

    /// 库存不足以扣减
    #[error("insufficient stock for part {part_number}: have {available}, need {requested}")]
    InsufficientStock {
        part_number: String,
        available: i32,
        requested: i32,
    },

    /// 运单没有处于 STAGE2_VERIFIED 的记录, 不能入账
    #[error("resi {resi} has no verified, unprocessed record")]
    NotVerified { resi: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// 存储中的数据无法映射为领域对象
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// 持久化协作方接口, 以 (仓库分区, 逻辑表) 为键
///
/// 实现:
/// - `PgStore`: PostgreSQL, 每个仓库一套物理表
/// - `MemoryStore`: 进程内存储, 用于 memory 模式与测试
#[async_trait]
pub trait ResiStore: Send + Sync {
    /// 按第一阶段唯一性范围查找
    async fn find_scan(&self, store: &StoreCode, scope: &ScanScope) -> StoreResult<Option<ReceiptScan>>;

    /// 按运单号查找 (任意平台/子渠道)
    async fn find_scans_by_code(&self, store: &StoreCode, code: &str) -> StoreResult<Vec<ReceiptScan>>;

    async fn get_scan(&self, store: &StoreCode, id: Uuid) -> StoreResult<Option<ReceiptScan>>;

    /// 插入; 范围或 id 冲突时返回 `UniqueViolation`
    async fn insert_scan(&self, store: &StoreCode, scan: &ReceiptScan) -> StoreResult<()>;

    /// 按 id 整行更新, 返回是否命中
    async fn update_scan(&self, store: &StoreCode, scan: &ReceiptScan) -> StoreResult<bool>;

    /// 删除并返回删除前的记录
    async fn delete_scan(&self, store: &StoreCode, id: Uuid) -> StoreResult<Option<ReceiptScan>>;

    async fn list_scans(&self, store: &StoreCode, query: &ScanQuery) -> StoreResult<Vec<ReceiptScan>>;

    /// 批量查询运单当前最高阶段 (同号多条时取最高)
    async fn stages_by_codes(&self, store: &StoreCode, codes: &[String]) -> StoreResult<HashMap<String, Stage>>;

    /// 批量查询库存
    async fn stock_by_parts(&self, store: &StoreCode, parts: &[String]) -> StoreResult<HashMap<String, StockItem>>;

    /// 按 (商品名, 来源平台) 反查零件号
    async fn resolve_aliases(
        &self,
        store: &StoreCode,
        source: SourcePlatform,
        names: &[String],
    ) -> StoreResult<HashMap<String, String>>;

    /// 幂等写入别名
    async fn upsert_alias(&self, store: &StoreCode, alias: &ProductAlias) -> StoreResult<()>;

    /// 单张运单入账 (原子): 扣减库存、写已售台账与明细行、标记第三阶段完成
    ///
    /// 任一步失败则全部不生效; 返回被标记为 PROCESSED 的记录数
    async fn post_receipt(&self, store: &StoreCode, posting: &ReceiptPosting) -> StoreResult<u64>;

    /// 写入即时配送记录并扣减库存 (原子)
    async fn insert_kilat(&self, store: &StoreCode, shipment: &KilatShipment) -> StoreResult<()>;

    async fn list_resellers(&self, store: &StoreCode) -> StoreResult<Vec<Reseller>>;

    /// 幂等新增, 返回是否新建
    async fn add_reseller(&self, store: &StoreCode, name: &str) -> StoreResult<bool>;
}
