use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use super::store::{ResiStore, StoreError, StoreResult};
use crate::models::{
    KilatShipment, Platform, ProductAlias, ReceiptPosting, ReceiptScan, Reseller, ScanQuery,
    ScanScope, SourcePlatform, Stage, StockItem, StoreCode,
};

const SCAN_COLUMNS: &str = "id, resi, platform, sub_channel, scanned_by, verified_by, \
     stage1_scanned_at, stage2_verified_at, stage3_completed_at";

/// 运单表行
#[derive(Debug, Clone, FromRow)]
pub struct ScanRow {
    pub id: Uuid,
    pub resi: String,
    pub platform: String,
    pub sub_channel: String,
    pub scanned_by: String,
    pub verified_by: Option<String>,
    pub stage1_scanned_at: Option<DateTime<Utc>>,
    pub stage2_verified_at: Option<DateTime<Utc>>,
    pub stage3_completed_at: Option<DateTime<Utc>>,
}

impl ScanRow {
    fn into_scan(self, store: &StoreCode) -> StoreResult<ReceiptScan> {
        let platform: Platform = self
            .platform
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("scan {}: platform '{}'", self.id, self.platform)))?;
        Ok(ReceiptScan::from_parts(
            self.id,
            self.resi,
            platform,
            self.sub_channel,
            store.clone(),
            self.scanned_by,
            self.verified_by,
            [
                self.stage1_scanned_at,
                self.stage2_verified_at,
                self.stage3_completed_at,
            ],
        ))
    }
}

/// 将唯一约束冲突映射为 `UniqueViolation`
fn map_unique(err: sqlx::Error, table: String) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::UniqueViolation { table },
        _ => StoreError::Database(err),
    }
}

/// PostgreSQL 存储, 每个仓库一套物理表
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 条件扣减库存, 不足时返回 `InsufficientStock`
    async fn take_stock(
        tx: &mut Transaction<'_, Postgres>,
        store: &StoreCode,
        part_number: &str,
        quantity: i32,
    ) -> StoreResult<()> {
        let table = store.table("stock");
        let updated: Option<i32> = sqlx::query_scalar(&format!(
            "UPDATE {table} SET quantity = quantity - $1 \
             WHERE part_number = $2 AND quantity >= $1 RETURNING quantity"
        ))
        .bind(quantity)
        .bind(part_number)
        .fetch_optional(&mut **tx)
        .await?;

        if updated.is_none() {
            let available: Option<i32> = sqlx::query_scalar(&format!(
                "SELECT quantity FROM {table} WHERE part_number = $1"
            ))
            .bind(part_number)
            .fetch_optional(&mut **tx)
            .await?;
            return Err(StoreError::InsufficientStock {
                part_number: part_number.to_string(),
                available: available.unwrap_or(0),
                requested: quantity,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ResiStore for PgStore {
    async fn find_scan(&self, store: &StoreCode, scope: &ScanScope) -> StoreResult<Option<ReceiptScan>> {
        let row = sqlx::query_as::<_, ScanRow>(&format!(
            "SELECT {SCAN_COLUMNS} FROM {} WHERE resi = $1 AND platform = $2 AND sub_channel = $3 LIMIT 1",
            store.table("scan_resi")
        ))
        .bind(&scope.code)
        .bind(scope.platform.as_str())
        .bind(&scope.sub_channel)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_scan(store)).transpose()
    }

    async fn find_scans_by_code(&self, store: &StoreCode, code: &str) -> StoreResult<Vec<ReceiptScan>> {
        let rows = sqlx::query_as::<_, ScanRow>(&format!(
            "SELECT {SCAN_COLUMNS} FROM {} WHERE resi = $1 ORDER BY stage1_scanned_at",
            store.table("scan_resi")
        ))
        .bind(code)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.into_scan(store)).collect()
    }

    async fn get_scan(&self, store: &StoreCode, id: Uuid) -> StoreResult<Option<ReceiptScan>> {
        let row = sqlx::query_as::<_, ScanRow>(&format!(
            "SELECT {SCAN_COLUMNS} FROM {} WHERE id = $1",
            store.table("scan_resi")
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_scan(store)).transpose()
    }

    async fn insert_scan(&self, store: &StoreCode, scan: &ReceiptScan) -> StoreResult<()> {
        let table = store.table("scan_resi");
        sqlx::query(&format!(
            "INSERT INTO {table} ({SCAN_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(scan.id)
        .bind(&scan.code)
        .bind(scan.platform.as_str())
        .bind(&scan.sub_channel)
        .bind(&scan.scanned_by)
        .bind(&scan.verified_by)
        .bind(scan.stage1_scanned_at())
        .bind(scan.stage2_verified_at())
        .bind(scan.stage3_completed_at())
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, table))?;
        Ok(())
    }

    async fn update_scan(&self, store: &StoreCode, scan: &ReceiptScan) -> StoreResult<bool> {
        let table = store.table("scan_resi");
        let result = sqlx::query(&format!(
            "UPDATE {table} SET resi = $2, platform = $3, sub_channel = $4, verified_by = $5, \
             stage1_scanned_at = $6, stage2_verified_at = $7, stage3_completed_at = $8 \
             WHERE id = $1"
        ))
        .bind(scan.id)
        .bind(&scan.code)
        .bind(scan.platform.as_str())
        .bind(&scan.sub_channel)
        .bind(&scan.verified_by)
        .bind(scan.stage1_scanned_at())
        .bind(scan.stage2_verified_at())
        .bind(scan.stage3_completed_at())
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, table))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_scan(&self, store: &StoreCode, id: Uuid) -> StoreResult<Option<ReceiptScan>> {
        let row = sqlx::query_as::<_, ScanRow>(&format!(
            "DELETE FROM {} WHERE id = $1 RETURNING {SCAN_COLUMNS}",
            store.table("scan_resi")
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_scan(store)).transpose()
    }

    async fn list_scans(&self, store: &StoreCode, query: &ScanQuery) -> StoreResult<Vec<ReceiptScan>> {
        let rows = sqlx::query_as::<_, ScanRow>(&format!(
            "SELECT {SCAN_COLUMNS} FROM {} \
             WHERE ($1::timestamptz IS NULL OR stage1_scanned_at >= $1) \
               AND ($2::timestamptz IS NULL OR stage1_scanned_at <= $2) \
             ORDER BY stage1_scanned_at",
            store.table("scan_resi")
        ))
        .bind(query.from)
        .bind(query.to)
        .fetch_all(&self.pool)
        .await?;

        let mut scans = Vec::with_capacity(rows.len());
        for row in rows {
            let scan = row.into_scan(store)?;
            if query.matches(&scan) {
                scans.push(scan);
            }
        }
        Ok(scans)
    }

    async fn stages_by_codes(&self, store: &StoreCode, codes: &[String]) -> StoreResult<HashMap<String, Stage>> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, ScanRow>(&format!(
            "SELECT {SCAN_COLUMNS} FROM {} WHERE resi = ANY($1)",
            store.table("scan_resi")
        ))
        .bind(codes)
        .fetch_all(&self.pool)
        .await?;

        let mut stages: HashMap<String, Stage> = HashMap::new();
        for row in rows {
            let scan = row.into_scan(store)?;
            let entry = stages.entry(scan.code.clone()).or_insert(Stage::Unscanned);
            *entry = (*entry).max(scan.stage());
        }
        Ok(stages)
    }

    async fn stock_by_parts(&self, store: &StoreCode, parts: &[String]) -> StoreResult<HashMap<String, StockItem>> {
        if parts.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, StockItem>(&format!(
            "SELECT part_number, name, quantity FROM {} WHERE part_number = ANY($1)",
            store.table("stock")
        ))
        .bind(parts)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|s| (s.part_number.clone(), s)).collect())
    }

    async fn resolve_aliases(
        &self,
        store: &StoreCode,
        source: SourcePlatform,
        names: &[String],
    ) -> StoreResult<HashMap<String, String>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(String, String)> = sqlx::query_as(&format!(
            "SELECT alias_name, part_number FROM {} WHERE source = $1 AND alias_name = ANY($2)",
            store.table("product_alias")
        ))
        .bind(source.as_str())
        .bind(names)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn upsert_alias(&self, store: &StoreCode, alias: &ProductAlias) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (part_number, alias_name, source) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            store.table("product_alias")
        ))
        .bind(&alias.part_number)
        .bind(&alias.alias_name)
        .bind(alias.source.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn post_receipt(&self, store: &StoreCode, posting: &ReceiptPosting) -> StoreResult<u64> {
        let start_time = std::time::Instant::now();
        let mut tx = self.pool.begin().await?;

        // 先锁定并标记运单; 已处理或未验证的运单在此处失败, 不会重复扣库存
        let marked = sqlx::query(&format!(
            "UPDATE {} SET stage3_completed_at = $2 \
             WHERE resi = $1 AND stage1_scanned_at IS NOT NULL \
             AND stage2_verified_at IS NOT NULL AND stage3_completed_at IS NULL",
            store.table("scan_resi")
        ))
        .bind(&posting.resi)
        .bind(posting.processed_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if marked == 0 {
            return Err(StoreError::NotVerified {
                resi: posting.resi.clone(),
            });
        }

        for sale in &posting.sales {
            Self::take_stock(&mut tx, store, &sale.part_number, sale.quantity).await?;
            sqlx::query(&format!(
                "INSERT INTO {} (id, resi, part_number, quantity, harga_total, customer, platform, \
                 sub_channel, processed_by, sold_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                store.table("sold_items")
            ))
            .bind(sale.id)
            .bind(&sale.resi)
            .bind(&sale.part_number)
            .bind(sale.quantity)
            .bind(&sale.harga_total)
            .bind(&sale.customer)
            .bind(sale.platform.as_str())
            .bind(&sale.sub_channel)
            .bind(&sale.processed_by)
            .bind(sale.sold_at)
            .execute(&mut *tx)
            .await?;
        }

        for chunk in posting.items.chunks(1000) {
            let mut query_builder = sqlx::QueryBuilder::new(format!(
                "INSERT INTO {} (id, resi, order_id, part_number, product_name, quantity, \
                 harga_total, customer, platform, created_at) ",
                store.table("resi_items")
            ));
            query_builder.push_values(chunk, |mut b, item| {
                b.push_bind(item.id)
                    .push_bind(&item.resi)
                    .push_bind(&item.order_id)
                    .push_bind(&item.part_number)
                    .push_bind(&item.product_name)
                    .push_bind(item.quantity)
                    .push_bind(item.harga_total.clone())
                    .push_bind(&item.customer)
                    .push_bind(item.platform.as_str())
                    .push_bind(item.created_at);
            });

            // 超时控制: 30秒; 提前返回时事务随 tx 释放而回滚
            let result = tokio::time::timeout(
                std::time::Duration::from_secs(30),
                query_builder.build().execute(&mut *tx),
            )
            .await;

            match result {
                Ok(Ok(done)) => {
                    tracing::debug!("resi items inserted: {} rows", done.rows_affected());
                }
                Ok(Err(e)) => {
                    tracing::error!("✗ resi items INSERT failed after {:?}: {:?}", start_time.elapsed(), e);
                    return Err(e.into());
                }
                Err(_) => {
                    tracing::error!("✗ resi items INSERT timed out (>30s)");
                    return Err(StoreError::Unavailable("insert timed out".into()));
                }
            }
        }

        tx.commit().await?;
        tracing::debug!(
            "resi {} posted: {} sales, {} items in {:?}",
            posting.resi,
            posting.sales.len(),
            posting.items.len(),
            start_time.elapsed()
        );
        Ok(marked)
    }

    async fn insert_kilat(&self, store: &StoreCode, shipment: &KilatShipment) -> StoreResult<()> {
        let table = store.table("kilat");
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO {table} (id, resi, part_number, quantity, sub_channel, scanned_by, scanned_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(shipment.id)
        .bind(&shipment.resi)
        .bind(&shipment.part_number)
        .bind(shipment.quantity)
        .bind(&shipment.sub_channel)
        .bind(&shipment.scanned_by)
        .bind(shipment.scanned_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique(e, table))?;

        Self::take_stock(&mut tx, store, &shipment.part_number, shipment.quantity).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_resellers(&self, store: &StoreCode) -> StoreResult<Vec<Reseller>> {
        let rows = sqlx::query_as::<_, Reseller>(&format!(
            "SELECT name, created_at FROM {} ORDER BY name",
            store.table("resellers")
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn add_reseller(&self, store: &StoreCode, name: &str) -> StoreResult<bool> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} (name, created_at) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            store.table("resellers")
        ))
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
