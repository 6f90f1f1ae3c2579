use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::UndoStack;
use crate::db::{ResiStore, StoreError};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    BulkReport, ItemOutcome, KilatShipment, Platform, ReceiptPosting, ReceiptScan, ReceiptUpdate,
    ScanQuery, Stage, StoreCode,
};

/// 第一阶段扫描请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub code: String,
    pub platform: Platform,
    pub sub_channel: String,
    pub scanned_by: String,
}

/// 即时配送扫描请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KilatRequest {
    pub code: String,
    pub part_number: String,
    pub quantity: i32,
    pub sub_channel: String,
    pub scanned_by: String,
}

fn require(value: &str, field: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    Ok(())
}

/// 运单阶段流转引擎: UNSCANNED → STAGE1 → STAGE2 → STAGE3
///
/// 引擎本身无状态; 撤销栈由调用方持有, 仅在存储调用成功后修改。
#[derive(Clone)]
pub struct StageService {
    store: Arc<dyn ResiStore>,
}

impl StageService {
    pub fn new(store: Arc<dyn ResiStore>) -> Self {
        Self { store }
    }

    /// 第一阶段扫描; 同一 (运单号, 平台, 子渠道, 仓库) 已存在时返回 `Duplicate`
    pub async fn scan_stage1(&self, store: &StoreCode, req: &ScanRequest) -> EngineResult<ReceiptScan> {
        require(&req.code, "resi")?;
        require(&req.sub_channel, req.platform.sub_channel_label())?;
        require(&req.scanned_by, "scanned_by")?;

        let scan = ReceiptScan::scanned(
            &req.code,
            req.platform,
            &req.sub_channel,
            store.clone(),
            &req.scanned_by,
            Utc::now(),
        );
        self.insert_unique(store, &scan).await?;

        tracing::info!(
            "[S1] {} scanned resi {} ({}/{}) in {}",
            scan.scanned_by, scan.code, scan.platform, scan.sub_channel, store
        );
        Ok(scan)
    }

    /// 批量扫描: 逐条独立提交, 单条失败不影响其余
    pub async fn scan_stage1_bulk(&self, store: &StoreCode, items: &[ScanRequest]) -> BulkReport {
        let mut report = BulkReport::default();
        for (idx, item) in items.iter().enumerate() {
            let outcome = match self.scan_stage1(store, item).await {
                Ok(_) => ItemOutcome::ok(idx, &item.code),
                Err(e) => {
                    if e.is_fault() {
                        tracing::error!("[S1] bulk item {} ({}) failed: {}", idx, item.code, e);
                    }
                    ItemOutcome::failed(idx, &item.code, &e)
                }
            };
            report.push(outcome);
        }
        tracing::info!(
            "[S1] bulk scan in {}: {} ok, {} failed",
            store, report.succeeded, report.failed
        );
        report
    }

    /// 第二阶段验证 (打包核对)
    ///
    /// 找不到第一阶段记录返回 `NotFound`; 已验证过返回 `AlreadyVerified`,
    /// 这是防止重复打包的关键路径。
    pub async fn verify_stage2(
        &self,
        store: &StoreCode,
        code: &str,
        verified_by: &str,
    ) -> EngineResult<Vec<ReceiptScan>> {
        require(code, "resi")?;
        require(verified_by, "verified_by")?;
        let code = code.trim();

        let scans = self.store.find_scans_by_code(store, code).await?;
        if scans.is_empty() {
            tracing::warn!("[S2] resi {} not found in {}", code, store);
            return Err(EngineError::NotFound(code.to_string()));
        }

        let pending: Vec<ReceiptScan> = scans
            .into_iter()
            .filter(|s| s.stage() == Stage::Stage1Scanned)
            .collect();
        if pending.is_empty() {
            tracing::warn!("[S2] resi {} already verified in {}", code, store);
            return Err(EngineError::AlreadyVerified(code.to_string()));
        }

        let now = Utc::now();
        let mut verified = Vec::with_capacity(pending.len());
        for mut scan in pending {
            scan.mark_verified(verified_by, now)?;
            if !self.store.update_scan(store, &scan).await? {
                // 加载后被删除
                return Err(EngineError::NotFound(code.to_string()));
            }
            verified.push(scan);
        }

        tracing::info!("[S2] {} verified resi {} in {}", verified_by.trim(), code, store);
        Ok(verified)
    }

    pub async fn verify_stage2_bulk(
        &self,
        store: &StoreCode,
        codes: &[String],
        verified_by: &str,
    ) -> BulkReport {
        let mut report = BulkReport::default();
        for (idx, code) in codes.iter().enumerate() {
            let outcome = match self.verify_stage2(store, code, verified_by).await {
                Ok(_) => ItemOutcome::ok(idx, code),
                Err(e) => ItemOutcome::failed(idx, code, &e),
            };
            report.push(outcome);
        }
        tracing::info!(
            "[S2] bulk verify in {}: {} ok, {} failed",
            store, report.succeeded, report.failed
        );
        report
    }

    /// 删除运单 (数据修正通道), 删除前的完整记录压入撤销栈并返回
    ///
    /// 已完成第三阶段 (库存已扣减) 的记录拒绝删除。
    pub async fn delete_receipt(
        &self,
        store: &StoreCode,
        id: Uuid,
        undo: &mut UndoStack,
    ) -> EngineResult<ReceiptScan> {
        let Some(existing) = self.store.get_scan(store, id).await? else {
            return Err(EngineError::NotFound(id.to_string()));
        };
        if existing.stage() == Stage::Stage3Processed {
            tracing::warn!("[DEL] refused: resi {} already processed", existing.code);
            return Err(EngineError::Committed(existing.code));
        }

        let Some(deleted) = self.store.delete_scan(store, id).await? else {
            return Err(EngineError::NotFound(id.to_string()));
        };
        tracing::info!(
            "[DEL] resi {} ({:?}) deleted from {}",
            deleted.code,
            deleted.stage(),
            store
        );
        undo.push(deleted.clone());
        Ok(deleted)
    }

    /// 原样恢复已删除记录, 与第一阶段扫描使用相同的重复约束
    pub async fn restore_receipt(&self, store: &StoreCode, prior: &ReceiptScan) -> EngineResult<ReceiptScan> {
        if &prior.store != store {
            return Err(EngineError::Validation(format!(
                "resi {} belongs to store {}, not {}",
                prior.code, prior.store, store
            )));
        }
        require(&prior.code, "resi")?;
        if !prior.has_valid_chain() || prior.stage() == Stage::Unscanned {
            return Err(EngineError::InvalidStageChain(prior.code.clone()));
        }
        if self.store.get_scan(store, prior.id).await?.is_some() {
            return Err(EngineError::Duplicate {
                code: prior.code.clone(),
                scope: prior.scope().to_string(),
            });
        }

        self.insert_unique(store, prior).await?;
        tracing::info!("[UNDO] resi {} restored into {}", prior.code, store);
        Ok(prior.clone())
    }

    /// 撤销最近一次删除; 失败时记录留在栈上
    pub async fn undo_delete(&self, store: &StoreCode, undo: &mut UndoStack) -> EngineResult<ReceiptScan> {
        let Some(prior) = undo.pop() else {
            return Err(EngineError::NotFound("nothing to undo".into()));
        };
        match self.restore_receipt(store, &prior).await {
            Ok(restored) => Ok(restored),
            Err(e) => {
                undo.push(prior);
                Err(e)
            }
        }
    }

    /// 修正扫描错误: 只改运单号/平台/子渠道, 不动阶段标记
    pub async fn update_receipt(
        &self,
        store: &StoreCode,
        id: Uuid,
        update: &ReceiptUpdate,
    ) -> EngineResult<ReceiptScan> {
        if update.is_empty() {
            return Err(EngineError::Validation("nothing to update".into()));
        }
        let Some(mut scan) = self.store.get_scan(store, id).await? else {
            return Err(EngineError::NotFound(id.to_string()));
        };

        if let Some(code) = &update.code {
            require(code, "resi")?;
            scan.code = code.trim().to_string();
        }
        if let Some(platform) = update.platform {
            scan.platform = platform;
        }
        if let Some(sub_channel) = &update.sub_channel {
            require(sub_channel, scan.platform.sub_channel_label())?;
            scan.sub_channel = sub_channel.trim().to_string();
        }

        let duplicate = || EngineError::Duplicate {
            code: scan.code.clone(),
            scope: scan.scope().to_string(),
        };
        if let Some(other) = self.store.find_scan(store, &scan.scope()).await? {
            if other.id != scan.id {
                return Err(duplicate());
            }
        }
        match self.store.update_scan(store, &scan).await {
            Ok(true) => {}
            Ok(false) => return Err(EngineError::NotFound(id.to_string())),
            Err(StoreError::UniqueViolation { .. }) => return Err(duplicate()),
            Err(e) => return Err(e.into()),
        }

        tracing::info!("[EDIT] resi {} corrected in {}", scan.code, store);
        Ok(scan)
    }

    pub async fn list_receipts(&self, store: &StoreCode, query: &ScanQuery) -> EngineResult<Vec<ReceiptScan>> {
        Ok(self.store.list_scans(store, query).await?)
    }

    /// 第三阶段完成: 入账并将该运单号下所有已验证记录标记为 PROCESSED
    ///
    /// 入账与标记在存储层原子完成; 失败时运单保持 STAGE2_VERIFIED, 可直接重试
    pub async fn complete_stage3(&self, store: &StoreCode, posting: &ReceiptPosting) -> EngineResult<u64> {
        match self.store.post_receipt(store, posting).await {
            Ok(marked) => {
                tracing::info!(
                    "[S3] resi {} posted in {}: {} sales, {} records processed",
                    posting.resi,
                    store,
                    posting.sales.len(),
                    marked
                );
                Ok(marked)
            }
            Err(StoreError::NotVerified { resi }) => {
                let scans = self.store.find_scans_by_code(store, &resi).await?;
                if scans.is_empty() {
                    Err(EngineError::NotFound(resi))
                } else if scans.iter().any(|s| s.stage() == Stage::Stage3Processed) {
                    Err(EngineError::Committed(resi))
                } else {
                    Err(EngineError::InvalidStageChain(resi))
                }
            }
            Err(StoreError::InsufficientStock {
                part_number,
                available,
                ..
            }) => Err(EngineError::Validation(format!(
                "Stok Kurang: {part_number} (sisa {available})"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// 即时配送: 缩短流程, 扫描时立即扣减库存
    pub async fn scan_kilat(&self, store: &StoreCode, req: &KilatRequest) -> EngineResult<KilatShipment> {
        require(&req.code, "resi")?;
        require(&req.part_number, "part_number")?;
        require(&req.sub_channel, "sub toko")?;
        require(&req.scanned_by, "scanned_by")?;
        if req.quantity <= 0 {
            return Err(EngineError::Validation("quantity must be positive".into()));
        }

        let shipment = KilatShipment {
            id: Uuid::new_v4(),
            resi: req.code.trim().to_string(),
            part_number: req.part_number.trim().to_string(),
            quantity: req.quantity,
            sub_channel: req.sub_channel.trim().to_string(),
            scanned_by: req.scanned_by.trim().to_string(),
            scanned_at: Utc::now(),
        };

        match self.store.insert_kilat(store, &shipment).await {
            Ok(()) => {
                tracing::info!(
                    "[KILAT] resi {} took {} x {} in {}",
                    shipment.resi, shipment.quantity, shipment.part_number, store
                );
                Ok(shipment)
            }
            Err(StoreError::UniqueViolation { .. }) => Err(EngineError::Duplicate {
                code: shipment.resi,
                scope: format!("{}/{}", Platform::Kilat, shipment.sub_channel),
            }),
            Err(StoreError::InsufficientStock {
                part_number,
                available,
                requested,
            }) => Err(EngineError::Validation(format!(
                "stok kurang untuk {part_number}: tersedia {available}, diminta {requested}"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// 预检 + 唯一约束兜底; 并发下两个操作员同时提交同一运单时由存储层判定
    async fn insert_unique(&self, store: &StoreCode, scan: &ReceiptScan) -> EngineResult<()> {
        let duplicate = || EngineError::Duplicate {
            code: scan.code.clone(),
            scope: scan.scope().to_string(),
        };

        if self.store.find_scan(store, &scan.scope()).await?.is_some() {
            tracing::warn!("[S1] duplicate resi {} ({}) in {}", scan.code, scan.scope(), store);
            return Err(duplicate());
        }
        match self.store.insert_scan(store, scan).await {
            Ok(()) => Ok(()),
            Err(StoreError::UniqueViolation { .. }) => {
                tracing::warn!("[S1] duplicate resi {} rejected by store", scan.code);
                Err(duplicate())
            }
            Err(e) => {
                tracing::error!("[S1] insert resi {} failed: {}", scan.code, e);
                Err(e.into())
            }
        }
    }
}
