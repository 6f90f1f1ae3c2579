use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use uuid::Uuid;

use super::StageService;
use crate::db::ResiStore;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    CommitReport, CsvExportItem, ItemOutcome, LineItem, Platform, ProductAlias, ReceiptPosting,
    ReceiptScan, ReconciliationResult, RowStatus, ScanQuery, SoldItem, SourcePlatform, Stage,
    Stage3Row, StoreCode,
};
use crate::parser::marketplace::PROFILES;

/// 行来源: CSV 行 (可能已配对扫描记录) 或无 CSV 的待录入运单
enum RowSeed<'a> {
    Export {
        scan: Option<&'a ReceiptScan>,
        item: &'a CsvExportItem,
    },
    Pending(&'a ReceiptScan),
}

/// 零件号与数量修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowEdit {
    pub part_number: String,
    pub quantity: Option<i32>,
    pub harga_total: Option<BigDecimal>,
}

fn is_placeholder(name: &str) -> bool {
    PROFILES.iter().any(|p| p.placeholder_name == name)
}

/// 第三阶段: 生成工作行、拆分、补录零件号、最终提交到已售台账
#[derive(Clone)]
pub struct Stage3Service {
    store: Arc<dyn ResiStore>,
    stages: StageService,
}

impl Stage3Service {
    pub fn new(store: Arc<dyn ResiStore>, stages: StageService) -> Self {
        Self { store, stages }
    }

    /// 对账结果生成工作行: 已配对与仅在导出中的 CSV 行
    pub async fn rows_from_reconciliation(
        &self,
        store: &StoreCode,
        result: &ReconciliationResult,
    ) -> EngineResult<Vec<Stage3Row>> {
        let mut seeds = Vec::with_capacity(result.matched_item_count() + result.export_not_scanned.len());
        for pair in &result.matched {
            for item in &pair.items {
                seeds.push(RowSeed::Export {
                    scan: Some(&pair.scan),
                    item,
                });
            }
        }
        for item in &result.export_not_scanned {
            seeds.push(RowSeed::Export { scan: None, item });
        }
        self.build_rows(store, seeds).await
    }

    /// 已验证但尚未处理、且没有导出数据的运单 (如 RESELLER / EXPORT)
    pub async fn pending_rows(
        &self,
        store: &StoreCode,
        platform: Option<Platform>,
    ) -> EngineResult<Vec<Stage3Row>> {
        let query = ScanQuery {
            stage: Some(Stage::Stage2Verified),
            ..Default::default()
        };
        let scans: Vec<ReceiptScan> = self
            .store
            .list_scans(store, &query)
            .await?
            .into_iter()
            .filter(|s| platform.map_or(true, |p| s.platform == p))
            .collect();
        self.build_rows(store, scans.iter().map(RowSeed::Pending).collect()).await
    }

    /// 两次批量查询 (阶段、库存) 建内存索引后逐行关联, 不逐行查库
    async fn build_rows(&self, store: &StoreCode, seeds: Vec<RowSeed<'_>>) -> EngineResult<Vec<Stage3Row>> {
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows: Vec<Stage3Row> = seeds.into_iter().map(seed_row).collect();
        self.resolve_blank_parts(store, &mut rows).await?;
        self.revalidate(store, &mut rows).await?;

        let ready = rows.iter().filter(|r| r.is_ready()).count();
        tracing::info!("[S3] {}: built {} rows, {} ready", store, rows.len(), ready);
        Ok(rows)
    }

    /// SKU 为空的 CSV 行用别名字典补零件号
    async fn resolve_blank_parts(&self, store: &StoreCode, rows: &mut [Stage3Row]) -> EngineResult<()> {
        for source in [SourcePlatform::Shopee, SourcePlatform::Tiktok] {
            let names: Vec<String> = rows
                .iter()
                .filter(|r| r.source == Some(source) && !r.has_part() && !is_placeholder(&r.product_name))
                .map(|r| r.product_name.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            if names.is_empty() {
                continue;
            }
            let resolved = self.store.resolve_aliases(store, source, &names).await?;
            for row in rows
                .iter_mut()
                .filter(|r| r.source == Some(source) && !r.has_part())
            {
                if let Some(part) = resolved.get(&row.product_name) {
                    row.part_number = part.clone();
                }
            }
        }
        Ok(())
    }

    /// 用实时阶段与库存重新校验
    pub async fn revalidate(&self, store: &StoreCode, rows: &mut [Stage3Row]) -> EngineResult<()> {
        let codes: Vec<String> = unique(rows.iter().map(|r| r.resi.clone()));
        let parts: Vec<String> = unique(
            rows.iter()
                .filter(|r| r.has_part())
                .map(|r| r.part_number.trim().to_string()),
        );

        let (stages, stock) = futures::try_join!(
            self.store.stages_by_codes(store, &codes),
            self.store.stock_by_parts(store, &parts),
        )?;

        for row in rows.iter_mut() {
            let stage = stages.get(&row.resi).copied().unwrap_or(Stage::Unscanned);
            row.is_stage1_found = stage >= Stage::Stage1Scanned;
            row.is_db_verified = stage >= Stage::Stage2Verified;
            row.is_processed = stage == Stage::Stage3Processed;
            row.part_number = row.part_number.trim().to_string();
            row.apply_stock(stock.get(&row.part_number));
        }
        Ok(())
    }

    /// 补录零件号 (以及数量/总价), 立即按实时库存校验
    pub async fn assign_part(
        &self,
        store: &StoreCode,
        mut row: Stage3Row,
        edit: &RowEdit,
    ) -> EngineResult<Stage3Row> {
        if edit.part_number.trim().is_empty() {
            return Err(EngineError::Validation("part_number is required".into()));
        }
        row.part_number = edit.part_number.trim().to_string();
        if let Some(qty) = edit.quantity {
            if qty <= 0 {
                return Err(EngineError::Validation("quantity must be positive".into()));
            }
            row.quantity = qty;
        }
        if let Some(total) = &edit.harga_total {
            row.harga_total = total.clone();
        }
        row.recompute_unit_price();

        let mut rows = [row];
        self.revalidate(store, &mut rows).await?;
        let [row] = rows;
        Ok(row)
    }

    pub fn split_row(&self, row: &Stage3Row, parts: usize) -> EngineResult<Vec<Stage3Row>> {
        row.split(parts)
    }

    /// 最终提交: 只接受 Ready 行
    ///
    /// 以运单为单位提交: 运单下任一行未就绪 (含拆分组缺行) 则整张运单不提交。
    /// 提交前按实时数据重新校验, 并按零件号累计扣减检查库存; 每张运单原子入账,
    /// 单张失败不回滚其他运单。
    pub async fn commit_stage3(
        &self,
        store: &StoreCode,
        rows: Vec<Stage3Row>,
        processed_by: &str,
    ) -> EngineResult<CommitReport> {
        let processed_by = processed_by.trim();
        if processed_by.is_empty() {
            return Err(EngineError::Validation("processed_by is required".into()));
        }

        let mut report = CommitReport::default();
        let mut candidates = Vec::new();
        for (idx, (resi, group)) in group_by_resi(rows).into_iter().enumerate() {
            match hold_reason(&group) {
                Some(reason) => {
                    if group.iter().any(|r| r.is_ready()) {
                        let err = EngineError::Validation(format!("resi {resi}: {reason}"));
                        report.failed.push(ItemOutcome::failed(idx, &resi, &err));
                    }
                    report.skipped.extend(group);
                }
                None => candidates.extend(group),
            }
        }

        self.revalidate(store, &mut candidates).await?;

        // 同一零件多张运单时累计占用库存
        let mut remaining: HashMap<String, i32> = HashMap::new();
        let mut postable = Vec::new();
        for (idx, (resi, mut group)) in group_by_resi(candidates).into_iter().enumerate() {
            if let Some(reason) = hold_reason(&group) {
                let err = EngineError::Validation(format!("resi {resi}: {reason}"));
                report.failed.push(ItemOutcome::failed(idx, &resi, &err));
                report.skipped.extend(group);
                continue;
            }

            let mut needed: IndexMap<String, i32> = IndexMap::new();
            for row in &group {
                *needed.entry(row.part_number.clone()).or_insert(0) += row.quantity;
                remaining.entry(row.part_number.clone()).or_insert(row.stock_qty);
            }
            let short = needed
                .iter()
                .find(|(part, qty)| remaining.get(*part).copied().unwrap_or(0) < **qty);
            if let Some((part, _)) = short {
                let left = remaining.get(part).copied().unwrap_or(0);
                let err = EngineError::Validation(format!("Stok Kurang: {part} (sisa {left})"));
                report.failed.push(ItemOutcome::failed(idx, &resi, &err));
                for row in group.iter_mut().filter(|r| &r.part_number == part) {
                    row.is_stock_valid = false;
                    row.status = RowStatus::StokKurang;
                }
                report.skipped.extend(group);
                continue;
            }
            for (part, qty) in needed {
                if let Some(left) = remaining.get_mut(&part) {
                    *left -= qty;
                }
            }
            postable.push((idx, resi, group));
        }

        let now = Utc::now();
        for (idx, resi, group) in postable {
            match self.commit_receipt(store, &resi, &group, processed_by, now).await {
                Ok(()) => {
                    report.committed_receipts += 1;
                    report.committed_rows += group.len();
                }
                Err(e) => {
                    if e.is_fault() {
                        tracing::error!("[S3] commit resi {} failed: {}", resi, e);
                    } else {
                        tracing::warn!("[S3] commit resi {} rejected: {}", resi, e);
                    }
                    report.failed.push(ItemOutcome::failed(idx, &resi, &e));
                }
            }
        }

        tracing::info!(
            "[S3] {}: committed {} receipts ({} rows), skipped {}, failed {}",
            store,
            report.committed_receipts,
            report.committed_rows,
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn commit_receipt(
        &self,
        store: &StoreCode,
        resi: &str,
        rows: &[Stage3Row],
        processed_by: &str,
        now: chrono::DateTime<Utc>,
    ) -> EngineResult<()> {
        let posting = ReceiptPosting {
            resi: resi.to_string(),
            sales: rows
                .iter()
                .map(|row| SoldItem {
                    id: Uuid::new_v4(),
                    resi: resi.to_string(),
                    part_number: row.part_number.clone(),
                    quantity: row.quantity,
                    harga_total: row.harga_total.clone(),
                    customer: row.customer.clone(),
                    platform: row.platform,
                    sub_channel: row.sub_channel.clone(),
                    processed_by: processed_by.to_string(),
                    sold_at: now,
                })
                .collect(),
            items: rows
                .iter()
                .map(|row| LineItem {
                    id: Uuid::new_v4(),
                    resi: resi.to_string(),
                    order_id: row.order_id.clone(),
                    part_number: row.part_number.clone(),
                    product_name: if row.product_name.is_empty() {
                        row.stock_name.clone()
                    } else {
                        row.product_name.clone()
                    },
                    quantity: row.quantity,
                    harga_total: row.harga_total.clone(),
                    customer: row.customer.clone(),
                    platform: row.platform,
                    created_at: now,
                })
                .collect(),
            processed_at: now,
        };
        self.stages.complete_stage3(store, &posting).await?;

        // 别名字典只是缓存, 写入失败不影响提交
        for row in rows {
            let Some(source) = row.source else { continue };
            if row.product_name.is_empty() || is_placeholder(&row.product_name) {
                continue;
            }
            let alias = ProductAlias {
                part_number: row.part_number.clone(),
                alias_name: row.product_name.clone(),
                source,
            };
            if let Err(e) = self.store.upsert_alias(store, &alias).await {
                tracing::warn!("[S3] alias {} -> {} not saved: {}", alias.alias_name, alias.part_number, e);
            }
        }
        Ok(())
    }
}

fn group_by_resi(rows: Vec<Stage3Row>) -> IndexMap<String, Vec<Stage3Row>> {
    let mut groups: IndexMap<String, Vec<Stage3Row>> = IndexMap::new();
    for row in rows {
        groups.entry(row.resi.clone()).or_default().push(row);
    }
    groups
}

/// 运单不能提交的原因: 有未就绪行, 或拆分组的行没有全部提交
fn hold_reason(rows: &[Stage3Row]) -> Option<String> {
    let waiting = rows.iter().filter(|r| !r.is_ready()).count();
    if waiting > 0 {
        return Some(format!("{waiting} baris belum Ready"));
    }

    let mut splits: HashMap<Uuid, (u32, u32)> = HashMap::new();
    for row in rows {
        if let Some(parent) = row.parent_id {
            let (expected, seen) = splits.entry(parent).or_insert((0, 0));
            *expected = (*expected).max(row.split_count);
            *seen += 1;
        }
    }
    splits
        .values()
        .find(|(expected, seen)| seen < expected)
        .map(|(expected, seen)| format!("split {seen}/{expected} baris"))
}

fn unique(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values.filter(|v| seen.insert(v.clone())).collect()
}

fn seed_row(seed: RowSeed<'_>) -> Stage3Row {
    let mut row = match seed {
        RowSeed::Export { scan, item } => Stage3Row {
            id: Uuid::new_v4(),
            parent_id: None,
            split_count: 0,
            resi: item.tracking_code.trim().to_string(),
            platform: scan.map_or(item.source_platform.platform(), |s| s.platform),
            sub_channel: scan.map(|s| s.sub_channel.clone()).unwrap_or_default(),
            order_id: item.order_id.clone(),
            customer: item.customer_name.clone(),
            source: Some(item.source_platform),
            product_name: item.product_name.clone(),
            part_number: item.sku.trim().to_string(),
            stock_name: String::new(),
            quantity: item.quantity,
            harga_total: item.total_price_base.clone(),
            harga_satuan: BigDecimal::zero(),
            stock_qty: 0,
            is_stage1_found: scan.is_some(),
            is_processed: false,
            is_db_verified: false,
            is_stock_valid: false,
            status: RowStatus::ButuhInput,
        },
        RowSeed::Pending(scan) => Stage3Row {
            id: Uuid::new_v4(),
            parent_id: None,
            split_count: 0,
            resi: scan.code.clone(),
            platform: scan.platform,
            sub_channel: scan.sub_channel.clone(),
            order_id: String::new(),
            customer: scan.sub_channel.clone(),
            source: None,
            product_name: String::new(),
            part_number: String::new(),
            stock_name: String::new(),
            quantity: 1,
            harga_total: BigDecimal::zero(),
            harga_satuan: BigDecimal::zero(),
            stock_qty: 0,
            is_stage1_found: true,
            is_processed: false,
            is_db_verified: scan.stage() >= Stage::Stage2Verified,
            is_stock_valid: false,
            status: RowStatus::ButuhInput,
        },
    };
    row.recompute_unit_price();
    row.refresh_status();
    row
}

/// 导出工作行为 CSV
pub fn write_rows_csv<W: Write>(rows: &[Stage3Row], out: W) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record([
        "resi",
        "platform",
        "sub_channel",
        "order_id",
        "customer",
        "part_number",
        "product_name",
        "quantity",
        "harga_satuan",
        "harga_total",
        "stock_qty",
        "status",
    ])?;
    for row in rows {
        writer.write_record([
            row.resi.clone(),
            row.platform.to_string(),
            row.sub_channel.clone(),
            row.order_id.clone(),
            row.customer.clone(),
            row.part_number.clone(),
            row.product_name.clone(),
            row.quantity.to_string(),
            row.harga_satuan.to_string(),
            row.harga_total.to_string(),
            row.stock_qty.to_string(),
            row.status.label().to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
