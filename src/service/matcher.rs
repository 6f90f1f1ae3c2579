use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;

use crate::db::ResiStore;
use crate::error::EngineResult;
use crate::models::{
    CsvExportItem, MatchedPair, ReceiptScan, ReconciliationResult, ReconciliationSummary,
    ScanQuery, SourcePlatform, Stage, StoreCode,
};
use crate::parser::{parse_export, CurrencyNormalizer};

/// 扫描记录与 CSV 行对账 (贪心、单遍)
///
/// CSV 行按运单号 (去空格后精确匹配) 分组; 每条扫描记录命中后即从分组中移除,
/// 后续同号扫描不会重复消费。未被消费的分组展开后归入 `export_not_scanned`。
/// 匹配只看运单号, 平台不一致仅标记 `platform_mismatch`。
pub fn reconcile(scans: Vec<ReceiptScan>, items: Vec<CsvExportItem>) -> ReconciliationResult {
    let mut groups: IndexMap<String, Vec<CsvExportItem>> = IndexMap::new();
    for item in items {
        groups
            .entry(item.tracking_code.trim().to_string())
            .or_default()
            .push(item);
    }

    let mut result = ReconciliationResult::default();
    for scan in scans {
        match groups.shift_remove(scan.code.trim()) {
            Some(items) => {
                let platform_mismatch = items
                    .iter()
                    .any(|i| i.source_platform.platform() != scan.platform);
                if platform_mismatch {
                    tracing::warn!(
                        "resi {} matched across platforms ({} vs export)",
                        scan.code, scan.platform
                    );
                }
                result.matched.push(MatchedPair {
                    scan,
                    items,
                    platform_mismatch,
                });
            }
            None => result.scanned_not_in_export.push(scan),
        }
    }

    result.export_not_scanned = groups.into_values().flatten().collect();
    result
}

/// 上传对账结果
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub source: SourcePlatform,
    pub cancelled: usize,
    pub malformed: usize,
    pub summary: ReconciliationSummary,
    pub result: ReconciliationResult,
}

/// 对账服务: 解析导出文件, 拉取窗口内的扫描记录并对账
#[derive(Clone)]
pub struct ReconcileService {
    store: Arc<dyn ResiStore>,
    normalizer: CurrencyNormalizer,
}

impl ReconcileService {
    pub fn new(store: Arc<dyn ResiStore>, normalizer: CurrencyNormalizer) -> Self {
        Self { store, normalizer }
    }

    pub fn normalizer(&self) -> &CurrencyNormalizer {
        &self.normalizer
    }

    /// 无法识别的文件格式直接拒绝
    pub async fn reconcile_upload(
        &self,
        store: &StoreCode,
        csv_text: &str,
        window: &ScanQuery,
    ) -> EngineResult<ReconcileOutcome> {
        let parsed = parse_export(csv_text, &self.normalizer)?;
        let source = parsed.source;

        let query = ScanQuery {
            min_stage: Some(window.min_stage.unwrap_or(Stage::Stage1Scanned)),
            ..window.clone()
        };
        let scans = self.store.list_scans(store, &query).await?;

        tracing::info!(
            "[RECON] {}: {} scans vs {} {} rows",
            store,
            scans.len(),
            parsed.items.len(),
            source
        );
        let result = reconcile(scans, parsed.items);
        let summary = result.summary();
        tracing::info!(
            "[RECON] {}: matched {}, scan-only {}, export-only {}",
            store, summary.matched_receipts, summary.scanned_not_in_export, summary.export_not_scanned
        );

        Ok(ReconcileOutcome {
            source,
            cancelled: parsed.cancelled,
            malformed: parsed.malformed,
            summary,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, StoreCode};
    use bigdecimal::BigDecimal;
    use chrono::Utc;

    fn scan(code: &str, platform: Platform) -> ReceiptScan {
        let store = StoreCode::parse("mjm").unwrap();
        ReceiptScan::scanned(code, platform, "MJM", store, "op", Utc::now())
    }

    fn item(code: &str, sku: &str) -> CsvExportItem {
        CsvExportItem {
            tracking_code: code.into(),
            order_id: format!("O-{code}"),
            order_status: "Selesai".into(),
            shipping_option: "SPX".into(),
            customer_name: "c".into(),
            sku: sku.into(),
            product_name: "p".into(),
            quantity: 1,
            total_price_base: BigDecimal::from(1000),
            source_platform: SourcePlatform::Shopee,
        }
    }

    #[test]
    fn partitions_into_three_disjoint_sets() {
        let scans = vec![
            scan("A", Platform::Shopee),
            scan("B", Platform::Shopee),
            scan("C", Platform::Shopee),
        ];
        let items = vec![item("A", "1"), item("A", "2"), item("C", "3"), item("D", "4")];
        let result = reconcile(scans, items);

        assert_eq!(result.matched.len(), 2);
        assert_eq!(result.matched[0].scan.code, "A");
        assert_eq!(result.matched[0].items.len(), 2);
        assert_eq!(result.scanned_not_in_export.len(), 1);
        assert_eq!(result.scanned_not_in_export[0].code, "B");
        assert_eq!(result.export_not_scanned.len(), 1);
        assert_eq!(result.export_not_scanned[0].tracking_code, "D");
        assert_eq!(result.matched_item_count() + result.export_not_scanned.len(), 4);
    }

    #[test]
    fn a_group_is_consumed_only_once() {
        let mut twin = scan("A", Platform::Shopee);
        twin.sub_channel = "BJW".into();
        let result = reconcile(vec![scan("A", Platform::Shopee), twin], vec![item("A", "1")]);
        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.scanned_not_in_export.len(), 1);
        assert!(result.export_not_scanned.is_empty());
    }

    #[test]
    fn codes_match_after_trim_but_not_fuzzily() {
        let result = reconcile(
            vec![scan("SPX01", Platform::Shopee), scan("SPX02", Platform::Shopee)],
            vec![item(" SPX01 ", "1"), item("spx02", "2")],
        );
        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.export_not_scanned.len(), 1);
    }

    #[test]
    fn platform_mismatch_is_flagged_not_rejected() {
        let result = reconcile(vec![scan("A", Platform::Tiktok)], vec![item("A", "1")]);
        assert_eq!(result.matched.len(), 1);
        assert!(result.matched[0].platform_mismatch);
        assert_eq!(result.summary().platform_mismatches, 1);
    }

    #[test]
    fn cover_holds_for_empty_inputs() {
        let result = reconcile(Vec::new(), vec![item("A", "1")]);
        assert_eq!(result.export_not_scanned.len(), 1);
        let result = reconcile(vec![scan("A", Platform::Shopee)], Vec::new());
        assert_eq!(result.scanned_not_in_export.len(), 1);
    }
}
