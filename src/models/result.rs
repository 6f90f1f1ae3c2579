use serde::{Deserialize, Serialize};

use super::{CsvExportItem, ReceiptScan, Stage3Row};
use crate::error::{EngineError, OutcomeCode};

/// 扫描记录与其 CSV 行的配对
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub scan: ReceiptScan,
    pub items: Vec<CsvExportItem>,
    /// 运单号相同但平台不一致 (仅提示, 不阻止匹配)
    pub platform_mismatch: bool,
}

/// 对账结果: 三个分区互不相交且覆盖全部输入
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub matched: Vec<MatchedPair>,
    pub scanned_not_in_export: Vec<ReceiptScan>,
    pub export_not_scanned: Vec<CsvExportItem>,
}

impl ReconciliationResult {
    pub fn matched_item_count(&self) -> usize {
        self.matched.iter().map(|p| p.items.len()).sum()
    }

    pub fn summary(&self) -> ReconciliationSummary {
        ReconciliationSummary {
            matched_receipts: self.matched.len(),
            matched_items: self.matched_item_count(),
            scanned_not_in_export: self.scanned_not_in_export.len(),
            export_not_scanned: self.export_not_scanned.len(),
            platform_mismatches: self.matched.iter().filter(|p| p.platform_mismatch).count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub matched_receipts: usize,
    pub matched_items: usize,
    pub scanned_not_in_export: usize,
    pub export_not_scanned: usize,
    pub platform_mismatches: usize,
}

/// 批量操作中单条的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub index: usize,
    pub code: String,
    pub outcome: OutcomeCode,
    pub message: String,
}

impl ItemOutcome {
    pub fn ok(index: usize, code: &str) -> Self {
        Self {
            index,
            code: code.to_string(),
            outcome: OutcomeCode::Success,
            message: "OK".to_string(),
        }
    }

    pub fn failed(index: usize, code: &str, err: &EngineError) -> Self {
        Self {
            index,
            code: code.to_string(),
            outcome: err.outcome(),
            message: err.to_string(),
        }
    }
}

/// 批量扫描/验证报告: 逐条独立提交, 从不整体失败
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkReport {
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<ItemOutcome>,
}

impl BulkReport {
    pub fn push(&mut self, outcome: ItemOutcome) {
        if outcome.outcome == OutcomeCode::Success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.items.push(outcome);
    }

    /// 失败条目的运单号, 便于操作员只重新提交失败项
    pub fn failed_codes(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| i.outcome != OutcomeCode::Success)
            .map(|i| i.code.clone())
            .collect()
    }
}

/// 第三阶段提交报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitReport {
    pub committed_receipts: usize,
    pub committed_rows: usize,
    /// 非 Ready 行, 未提交
    pub skipped: Vec<Stage3Row>,
    pub failed: Vec<ItemOutcome>,
}
