//! 进程内存储, 与 PgStore 行为一致 (含唯一约束), 用于 memory 模式和测试。

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::store::{ResiStore, StoreError, StoreResult};
use crate::models::{
    KilatShipment, LineItem, ProductAlias, ReceiptPosting, ReceiptScan, Reseller, ScanQuery,
    ScanScope, SoldItem, SourcePlatform, Stage, StockItem, StoreCode,
};

#[derive(Debug, Default)]
struct Partition {
    scans: IndexMap<Uuid, ReceiptScan>,
    line_items: Vec<LineItem>,
    sold_items: Vec<SoldItem>,
    stock: HashMap<String, StockItem>,
    aliases: HashSet<ProductAlias>,
    resellers: Vec<Reseller>,
    kilat: Vec<KilatShipment>,
}

impl Partition {
    fn scope_taken(&self, scan: &ReceiptScan) -> bool {
        let scope = scan.scope();
        self.scans
            .values()
            .any(|s| s.id != scan.id && s.scope() == scope)
    }

    fn take_stock(&mut self, part_number: &str, quantity: i32) -> StoreResult<()> {
        let available = self.stock.get(part_number).map_or(0, |s| s.quantity);
        if available < quantity {
            return Err(StoreError::InsufficientStock {
                part_number: part_number.to_string(),
                available,
                requested: quantity,
            });
        }
        if let Some(item) = self.stock.get_mut(part_number) {
            item.quantity -= quantity;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: DashMap<StoreCode, Partition>,
    offline: AtomicBool,
    fail_on_line_items: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可达
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// 模拟运单入账时明细行写入失败
    pub fn set_fail_on_line_items(&self, fail: bool) {
        self.fail_on_line_items.store(fail, Ordering::SeqCst);
    }

    /// 写入/覆盖库存主数据
    pub fn put_stock(&self, store: &StoreCode, item: StockItem) {
        self.partitions
            .entry(store.clone())
            .or_default()
            .stock
            .insert(item.part_number.clone(), item);
    }

    pub fn stock_quantity(&self, store: &StoreCode, part_number: &str) -> Option<i32> {
        self.partitions
            .get(store)
            .and_then(|p| p.stock.get(part_number).map(|s| s.quantity))
    }

    pub fn sold_items(&self, store: &StoreCode) -> Vec<SoldItem> {
        self.partitions
            .get(store)
            .map(|p| p.sold_items.clone())
            .unwrap_or_default()
    }

    pub fn line_items(&self, store: &StoreCode) -> Vec<LineItem> {
        self.partitions
            .get(store)
            .map(|p| p.line_items.clone())
            .unwrap_or_default()
    }

    pub fn aliases(&self, store: &StoreCode) -> Vec<ProductAlias> {
        self.partitions
            .get(store)
            .map(|p| p.aliases.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResiStore for MemoryStore {
    async fn find_scan(&self, store: &StoreCode, scope: &ScanScope) -> StoreResult<Option<ReceiptScan>> {
        self.check_online()?;
        Ok(self.partitions.get(store).and_then(|p| {
            p.scans.values().find(|s| &s.scope() == scope).cloned()
        }))
    }

    async fn find_scans_by_code(&self, store: &StoreCode, code: &str) -> StoreResult<Vec<ReceiptScan>> {
        self.check_online()?;
        Ok(self
            .partitions
            .get(store)
            .map(|p| p.scans.values().filter(|s| s.code == code).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_scan(&self, store: &StoreCode, id: Uuid) -> StoreResult<Option<ReceiptScan>> {
        self.check_online()?;
        Ok(self.partitions.get(store).and_then(|p| p.scans.get(&id).cloned()))
    }

    async fn insert_scan(&self, store: &StoreCode, scan: &ReceiptScan) -> StoreResult<()> {
        self.check_online()?;
        let mut part = self.partitions.entry(store.clone()).or_default();
        if part.scans.contains_key(&scan.id) || part.scope_taken(scan) {
            return Err(StoreError::UniqueViolation {
                table: store.table("scan_resi"),
            });
        }
        part.scans.insert(scan.id, scan.clone());
        Ok(())
    }

    async fn update_scan(&self, store: &StoreCode, scan: &ReceiptScan) -> StoreResult<bool> {
        self.check_online()?;
        let Some(mut part) = self.partitions.get_mut(store) else {
            return Ok(false);
        };
        if !part.scans.contains_key(&scan.id) {
            return Ok(false);
        }
        if part.scope_taken(scan) {
            return Err(StoreError::UniqueViolation {
                table: store.table("scan_resi"),
            });
        }
        part.scans.insert(scan.id, scan.clone());
        Ok(true)
    }

    async fn delete_scan(&self, store: &StoreCode, id: Uuid) -> StoreResult<Option<ReceiptScan>> {
        self.check_online()?;
        Ok(self
            .partitions
            .get_mut(store)
            .and_then(|mut p| p.scans.shift_remove(&id)))
    }

    async fn list_scans(&self, store: &StoreCode, query: &ScanQuery) -> StoreResult<Vec<ReceiptScan>> {
        self.check_online()?;
        let mut scans: Vec<ReceiptScan> = self
            .partitions
            .get(store)
            .map(|p| p.scans.values().filter(|s| query.matches(s)).cloned().collect())
            .unwrap_or_default();
        scans.sort_by_key(|s| s.stage1_scanned_at());
        Ok(scans)
    }

    async fn stages_by_codes(&self, store: &StoreCode, codes: &[String]) -> StoreResult<HashMap<String, Stage>> {
        self.check_online()?;
        let wanted: HashSet<&str> = codes.iter().map(String::as_str).collect();
        let mut stages: HashMap<String, Stage> = HashMap::new();
        if let Some(p) = self.partitions.get(store) {
            for scan in p.scans.values().filter(|s| wanted.contains(s.code.as_str())) {
                let entry = stages.entry(scan.code.clone()).or_insert(Stage::Unscanned);
                *entry = (*entry).max(scan.stage());
            }
        }
        Ok(stages)
    }

    async fn stock_by_parts(&self, store: &StoreCode, parts: &[String]) -> StoreResult<HashMap<String, StockItem>> {
        self.check_online()?;
        Ok(self
            .partitions
            .get(store)
            .map(|p| {
                parts
                    .iter()
                    .filter_map(|part| p.stock.get(part).map(|s| (part.clone(), s.clone())))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn resolve_aliases(
        &self,
        store: &StoreCode,
        source: SourcePlatform,
        names: &[String],
    ) -> StoreResult<HashMap<String, String>> {
        self.check_online()?;
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        Ok(self
            .partitions
            .get(store)
            .map(|p| {
                p.aliases
                    .iter()
                    .filter(|a| a.source == source && wanted.contains(a.alias_name.as_str()))
                    .map(|a| (a.alias_name.clone(), a.part_number.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_alias(&self, store: &StoreCode, alias: &ProductAlias) -> StoreResult<()> {
        self.check_online()?;
        self.partitions
            .entry(store.clone())
            .or_default()
            .aliases
            .insert(alias.clone());
        Ok(())
    }

    async fn post_receipt(&self, store: &StoreCode, posting: &ReceiptPosting) -> StoreResult<u64> {
        self.check_online()?;
        let mut part = self.partitions.entry(store.clone()).or_default();

        // 先整体校验, 全部通过后才修改分区
        let verified: Vec<Uuid> = part
            .scans
            .values()
            .filter(|s| s.code == posting.resi && s.stage() == Stage::Stage2Verified)
            .map(|s| s.id)
            .collect();
        if verified.is_empty() {
            return Err(StoreError::NotVerified {
                resi: posting.resi.clone(),
            });
        }

        let mut needed: IndexMap<&str, i32> = IndexMap::new();
        for sale in &posting.sales {
            *needed.entry(sale.part_number.as_str()).or_insert(0) += sale.quantity;
        }
        for (part_number, quantity) in &needed {
            let available = part.stock.get(*part_number).map_or(0, |s| s.quantity);
            if available < *quantity {
                return Err(StoreError::InsufficientStock {
                    part_number: part_number.to_string(),
                    available,
                    requested: *quantity,
                });
            }
        }

        if self.fail_on_line_items.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("line item insert failed".into()));
        }

        for (part_number, quantity) in needed {
            part.take_stock(part_number, quantity)?;
        }
        part.sold_items.extend_from_slice(&posting.sales);
        part.line_items.extend_from_slice(&posting.items);
        for id in &verified {
            if let Some(scan) = part.scans.get_mut(id) {
                scan.mark_processed(posting.processed_at)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            }
        }
        Ok(verified.len() as u64)
    }

    async fn insert_kilat(&self, store: &StoreCode, shipment: &KilatShipment) -> StoreResult<()> {
        self.check_online()?;
        let mut part = self.partitions.entry(store.clone()).or_default();
        if part.kilat.iter().any(|k| k.resi == shipment.resi) {
            return Err(StoreError::UniqueViolation {
                table: store.table("kilat"),
            });
        }
        part.take_stock(&shipment.part_number, shipment.quantity)?;
        part.kilat.push(shipment.clone());
        Ok(())
    }

    async fn list_resellers(&self, store: &StoreCode) -> StoreResult<Vec<Reseller>> {
        self.check_online()?;
        let mut resellers = self
            .partitions
            .get(store)
            .map(|p| p.resellers.clone())
            .unwrap_or_default();
        resellers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(resellers)
    }

    async fn add_reseller(&self, store: &StoreCode, name: &str) -> StoreResult<bool> {
        self.check_online()?;
        let mut part = self.partitions.entry(store.clone()).or_default();
        if part.resellers.iter().any(|r| r.name.eq_ignore_ascii_case(name)) {
            return Ok(false);
        }
        part.resellers.push(Reseller {
            name: name.to_string(),
            created_at: chrono::Utc::now(),
        });
        Ok(true)
    }
}
