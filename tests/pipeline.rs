use std::sync::Arc;

use bigdecimal::BigDecimal;
use resi_pipeline::db::{MemoryStore, ResiStore};
use resi_pipeline::error::{EngineError, OutcomeCode};
use resi_pipeline::models::{
    Platform, ReceiptUpdate, RowStatus, ScanQuery, Stage, Stage3Row, StockItem, StoreCode,
};
use resi_pipeline::parser::CurrencyNormalizer;
use resi_pipeline::service::{
    KilatRequest, MasterDataService, ReconcileService, RowEdit, ScanRequest, Stage3Service,
    StageService, UndoStack,
};

struct Harness {
    mem: Arc<MemoryStore>,
    stage: StageService,
    reconcile: ReconcileService,
    stage3: Stage3Service,
    mjm: StoreCode,
}

fn harness() -> Harness {
    let mem = Arc::new(MemoryStore::new());
    let store: Arc<dyn ResiStore> = mem.clone();
    let stage = StageService::new(store.clone());
    Harness {
        reconcile: ReconcileService::new(store.clone(), CurrencyNormalizer::default()),
        stage3: Stage3Service::new(store, stage.clone()),
        stage,
        mem,
        mjm: StoreCode::parse("mjm").unwrap(),
    }
}

fn scan_req(code: &str, platform: Platform, sub_channel: &str) -> ScanRequest {
    ScanRequest {
        code: code.into(),
        platform,
        sub_channel: sub_channel.into(),
        scanned_by: "andi".into(),
    }
}

fn stock(part: &str, name: &str, quantity: i32) -> StockItem {
    StockItem {
        part_number: part.into(),
        name: name.into(),
        quantity,
    }
}

const HEADER: &str = "No. Pesanan,Status Pesanan,No. Resi,Opsi Pengiriman,Username (Pembeli),Nomor Referensi SKU,Nama Produk,Jumlah,Total Harga Produk";

fn shopee_csv(rows: &[&str]) -> String {
    let mut text = format!("Laporan Pesanan\n{HEADER}\n");
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text
}

async fn scan_and_verify(h: &Harness, code: &str) {
    h.stage
        .scan_stage1(&h.mjm, &scan_req(code, Platform::Shopee, "MJM"))
        .await
        .unwrap();
    h.stage.verify_stage2(&h.mjm, code, "sari").await.unwrap();
}

async fn rows_for(h: &Harness, csv: &str) -> Vec<Stage3Row> {
    let outcome = h
        .reconcile
        .reconcile_upload(&h.mjm, csv, &ScanQuery::default())
        .await
        .unwrap();
    h.stage3
        .rows_from_reconciliation(&h.mjm, &outcome.result)
        .await
        .unwrap()
}

#[tokio::test]
async fn duplicate_scan_is_scoped_by_sub_channel_and_store() {
    let h = harness();
    let bjw = StoreCode::parse("bjw").unwrap();

    h.stage
        .scan_stage1(&h.mjm, &scan_req("SPX001", Platform::Shopee, "MJM"))
        .await
        .unwrap();

    let err = h
        .stage
        .scan_stage1(&h.mjm, &scan_req(" SPX001 ", Platform::Shopee, "MJM"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Duplicate { .. }));
    assert_eq!(err.outcome(), OutcomeCode::Duplicate);

    // 不同子渠道、不同仓库都是独立范围
    h.stage
        .scan_stage1(&h.mjm, &scan_req("SPX001", Platform::Shopee, "BJW"))
        .await
        .unwrap();
    h.stage
        .scan_stage1(&bjw, &scan_req("SPX001", Platform::Shopee, "MJM"))
        .await
        .unwrap();

    let all = h.stage.list_receipts(&h.mjm, &ScanQuery::default()).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn blank_fields_are_rejected_before_storage() {
    let h = harness();
    let err = h
        .stage
        .scan_stage1(&h.mjm, &scan_req("  ", Platform::Shopee, "MJM"))
        .await
        .unwrap_err();
    assert_eq!(err.outcome(), OutcomeCode::Validation);

    let err = h
        .stage
        .scan_stage1(&h.mjm, &scan_req("RS1", Platform::Reseller, ""))
        .await
        .unwrap_err();
    assert_eq!(err.outcome(), OutcomeCode::Validation);
}

#[tokio::test]
async fn second_verify_reports_already_verified_not_missing() {
    let h = harness();
    scan_and_verify(&h, "SPX010").await;

    let err = h.stage.verify_stage2(&h.mjm, "SPX010", "sari").await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyVerified(_)));

    let err = h.stage.verify_stage2(&h.mjm, "SPX999", "sari").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn bulk_scan_continues_after_failures() {
    let h = harness();
    let batch = vec![
        scan_req("A1", Platform::Tiktok, "MJM"),
        scan_req("A1", Platform::Tiktok, "MJM"),
        scan_req("", Platform::Tiktok, "MJM"),
        scan_req("B1", Platform::Tiktok, "MJM"),
    ];
    let report = h.stage.scan_stage1_bulk(&h.mjm, &batch).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.items[1].outcome, OutcomeCode::Duplicate);
    assert_eq!(report.items[2].outcome, OutcomeCode::Validation);
    assert_eq!(report.failed_codes(), vec!["A1".to_string(), String::new()]);

    let verify = h
        .stage
        .verify_stage2_bulk(&h.mjm, &["A1".into(), "ZZ".into(), "A1".into()], "sari")
        .await;
    assert_eq!(verify.succeeded, 1);
    assert_eq!(verify.items[1].outcome, OutcomeCode::NotFound);
    assert_eq!(verify.items[2].outcome, OutcomeCode::AlreadyVerified);
}

#[tokio::test]
async fn undo_restores_original_markers_and_respects_duplicates() {
    let h = harness();
    scan_and_verify(&h, "SPX020").await;
    let original = h
        .stage
        .list_receipts(&h.mjm, &ScanQuery::default())
        .await
        .unwrap()
        .remove(0);

    let mut undo = UndoStack::new(1);
    h.stage.delete_receipt(&h.mjm, original.id, &mut undo).await.unwrap();
    assert_eq!(undo.len(), 1);

    let restored = h.stage.undo_delete(&h.mjm, &mut undo).await.unwrap();
    assert_eq!(restored.id, original.id);
    assert_eq!(restored.stage(), Stage::Stage2Verified);
    assert!(undo.is_empty());
    assert_eq!(restored.stage1_scanned_at(), original.stage1_scanned_at());
    let err = h
        .stage
        .scan_stage1(&h.mjm, &scan_req("SPX020", Platform::Shopee, "MJM"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Duplicate { .. }));

    // 删除后重新扫描同一运单, 撤销时按重复拒绝且记录留在栈上
    h.stage.delete_receipt(&h.mjm, original.id, &mut undo).await.unwrap();
    h.stage
        .scan_stage1(&h.mjm, &scan_req("SPX020", Platform::Shopee, "MJM"))
        .await
        .unwrap();
    let err = h.stage.undo_delete(&h.mjm, &mut undo).await.unwrap_err();
    assert!(matches!(err, EngineError::Duplicate { .. }));
    assert_eq!(undo.len(), 1);
}

#[tokio::test]
async fn storage_outage_leaves_undo_stack_untouched() {
    let h = harness();
    let scan = h
        .stage
        .scan_stage1(&h.mjm, &scan_req("SPX030", Platform::Shopee, "MJM"))
        .await
        .unwrap();
    let mut undo = UndoStack::new(1);

    h.mem.set_offline(true);
    let err = h.stage.delete_receipt(&h.mjm, scan.id, &mut undo).await.unwrap_err();
    assert!(err.is_fault());
    assert!(undo.is_empty());

    h.mem.set_offline(false);
    h.stage.delete_receipt(&h.mjm, scan.id, &mut undo).await.unwrap();

    h.mem.set_offline(true);
    assert!(h.stage.undo_delete(&h.mjm, &mut undo).await.is_err());
    assert_eq!(undo.len(), 1);

    h.mem.set_offline(false);
    let restored = h.stage.undo_delete(&h.mjm, &mut undo).await.unwrap();
    assert_eq!(restored.code, "SPX030");
}

#[tokio::test]
async fn unknown_export_format_is_rejected() {
    let h = harness();
    let err = h
        .reconcile
        .reconcile_upload(&h.mjm, "a,b,c\n1,2,3\n", &ScanQuery::default())
        .await
        .unwrap_err();
    assert_eq!(err.outcome(), OutcomeCode::Validation);
}

#[tokio::test]
async fn reconcile_upload_covers_every_row() {
    let h = harness();
    scan_and_verify(&h, "SPX100").await;
    h.stage
        .scan_stage1(&h.mjm, &scan_req("SPX101", Platform::Shopee, "MJM"))
        .await
        .unwrap();

    let csv = shopee_csv(&[
        "O1,Selesai,SPX100,SPX Hemat,budi,KR-01,Kampas Rem,1,\"50,000\"",
        "O1,Selesai,SPX100,SPX Hemat,budi,KR-02,Busi,1,\"25,000\"",
        "O2,Batal,SPX102,SPX Hemat,rina,KR-01,Kampas Rem,1,\"50,000\"",
        "O3,Selesai,SPX103,SPX Hemat,joko,KR-03,Oli,2,\"80,000\"",
    ]);
    let outcome = h
        .reconcile
        .reconcile_upload(&h.mjm, &csv, &ScanQuery::default())
        .await
        .unwrap();

    assert_eq!(outcome.cancelled, 1);
    assert_eq!(outcome.summary.matched_receipts, 1);
    assert_eq!(outcome.summary.matched_items, 2);
    assert_eq!(outcome.summary.scanned_not_in_export, 1);
    assert_eq!(outcome.summary.export_not_scanned, 1);
    assert_eq!(outcome.result.scanned_not_in_export[0].code, "SPX101");
}

#[tokio::test]
async fn commit_posts_sales_and_marks_receipts_processed() {
    let h = harness();
    h.mem.put_stock(&h.mjm, stock("KR-01", "Kampas Rem Depan", 10));
    scan_and_verify(&h, "SPX200").await;

    let csv = shopee_csv(&[
        "O1,Selesai,SPX200,SPX Hemat,budi,KR-01,\"Kampas Rem, Depan\",2,\"150,000\"",
        "O2,Selesai,SPX201,SPX Hemat,rina,KR-01,\"Kampas Rem, Depan\",1,\"75,000\"",
    ]);
    let rows = rows_for(&h, &csv).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, RowStatus::Ready);
    assert_eq!(rows[0].harga_satuan, BigDecimal::from(75000));
    assert_eq!(rows[0].stock_qty, 10);
    assert_eq!(rows[1].status, RowStatus::BelumScanS1);

    let report = h.stage3.commit_stage3(&h.mjm, rows, "andi").await.unwrap();
    assert_eq!(report.committed_receipts, 1);
    assert_eq!(report.committed_rows, 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.failed.is_empty());

    assert_eq!(h.mem.stock_quantity(&h.mjm, "KR-01"), Some(8));
    assert_eq!(h.mem.sold_items(&h.mjm).len(), 1);
    assert_eq!(h.mem.line_items(&h.mjm).len(), 1);
    let scans = h
        .stage
        .list_receipts(&h.mjm, &ScanQuery::default())
        .await
        .unwrap();
    assert_eq!(scans[0].stage(), Stage::Stage3Processed);
    assert!(scans[0].has_valid_chain());

    // 已扣减库存的运单不能删除, 也不会被再次提交
    let mut undo = UndoStack::new(1);
    let err = h.stage.delete_receipt(&h.mjm, scans[0].id, &mut undo).await.unwrap_err();
    assert!(matches!(err, EngineError::Committed(_)));
    assert!(undo.is_empty());

    let again = rows_for(&h, &csv).await;
    assert_eq!(again[0].status, RowStatus::SudahProses);
    let report = h.stage3.commit_stage3(&h.mjm, again, "andi").await.unwrap();
    assert_eq!(report.committed_receipts, 0);
    assert_eq!(h.mem.stock_quantity(&h.mjm, "KR-01"), Some(8));
}

#[tokio::test]
async fn committed_product_names_resolve_blank_skus_later() {
    let h = harness();
    h.mem.put_stock(&h.mjm, stock("KR-01", "Kampas Rem Depan", 10));
    scan_and_verify(&h, "SPX300").await;

    let first = shopee_csv(&["O1,Selesai,SPX300,SPX Hemat,budi,KR-01,Kampas Rem Depan Vario,1,\"75,000\""]);
    let rows = rows_for(&h, &first).await;
    h.stage3.commit_stage3(&h.mjm, rows, "andi").await.unwrap();
    assert_eq!(h.mem.aliases(&h.mjm).len(), 1);

    let second = shopee_csv(&["O9,Selesai,SPX301,SPX Hemat,rina,,Kampas Rem Depan Vario,1,\"75,000\""]);
    let rows = rows_for(&h, &second).await;
    assert_eq!(rows[0].part_number, "KR-01");
}

#[tokio::test]
async fn split_rows_are_assigned_and_committed_together() {
    let h = harness();
    h.mem.put_stock(&h.mjm, stock("P-1", "Filter", 5));
    h.mem.put_stock(&h.mjm, stock("P-2", "Oli", 5));
    h.mem.put_stock(&h.mjm, stock("P-3", "Busi", 5));
    scan_and_verify(&h, "SPX400").await;

    let csv = shopee_csv(&["O1,Selesai,SPX400,SPX Hemat,budi,,Paket Servis,1,\"30,000\""]);
    let rows = rows_for(&h, &csv).await;
    assert_eq!(rows[0].status, RowStatus::ButuhInput);

    let children = h.stage3.split_row(&rows[0], 3).unwrap();
    assert_eq!(children.len(), 3);
    assert!(children.iter().all(|c| c.harga_total == BigDecimal::from(10000)));
    assert!(children.iter().all(|c| c.status == RowStatus::ButuhInput));

    let mut assigned = Vec::new();
    for (child, part) in children.into_iter().zip(["P-1", "P-2", "P-3"]) {
        let edit = RowEdit {
            part_number: part.into(),
            quantity: None,
            harga_total: None,
        };
        let row = h.stage3.assign_part(&h.mjm, child, &edit).await.unwrap();
        assert_eq!(row.status, RowStatus::Ready);
        assigned.push(row);
    }

    let report = h.stage3.commit_stage3(&h.mjm, assigned, "andi").await.unwrap();
    assert_eq!(report.committed_receipts, 1);
    assert_eq!(report.committed_rows, 3);
    assert_eq!(h.mem.stock_quantity(&h.mjm, "P-2"), Some(4));
    assert_eq!(h.mem.line_items(&h.mjm).len(), 3);
}

#[tokio::test]
async fn failed_posting_leaves_receipt_retryable_without_double_sale() {
    let h = harness();
    h.mem.put_stock(&h.mjm, stock("KR-01", "Kampas Rem Depan", 10));
    scan_and_verify(&h, "SPX210").await;
    let csv = shopee_csv(&["O1,Selesai,SPX210,SPX Hemat,budi,KR-01,Kampas Rem Depan,2,\"150,000\""]);

    h.mem.set_fail_on_line_items(true);
    let report = h
        .stage3
        .commit_stage3(&h.mjm, rows_for(&h, &csv).await, "andi")
        .await
        .unwrap();
    assert_eq!(report.committed_receipts, 0);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].outcome, OutcomeCode::Error);

    // 入账失败时库存、已售台账与阶段都保持原样
    assert_eq!(h.mem.stock_quantity(&h.mjm, "KR-01"), Some(10));
    assert!(h.mem.sold_items(&h.mjm).is_empty());
    assert!(h.mem.line_items(&h.mjm).is_empty());
    let scans = h.stage.list_receipts(&h.mjm, &ScanQuery::default()).await.unwrap();
    assert_eq!(scans[0].stage(), Stage::Stage2Verified);

    h.mem.set_fail_on_line_items(false);
    let rows = rows_for(&h, &csv).await;
    assert_eq!(rows[0].status, RowStatus::Ready);
    let report = h.stage3.commit_stage3(&h.mjm, rows, "andi").await.unwrap();
    assert_eq!(report.committed_receipts, 1);
    assert_eq!(h.mem.stock_quantity(&h.mjm, "KR-01"), Some(8));
    assert_eq!(h.mem.sold_items(&h.mjm).len(), 1);
    assert_eq!(h.mem.line_items(&h.mjm).len(), 1);
}

#[tokio::test]
async fn partly_assigned_split_holds_the_whole_receipt() {
    let h = harness();
    h.mem.put_stock(&h.mjm, stock("P-1", "Filter", 5));
    h.mem.put_stock(&h.mjm, stock("P-2", "Oli", 5));
    scan_and_verify(&h, "SPX410").await;

    let csv = shopee_csv(&["O1,Selesai,SPX410,SPX Hemat,budi,,Paket Servis,1,\"20,000\""]);
    let rows = rows_for(&h, &csv).await;
    let children = h.stage3.split_row(&rows[0], 2).unwrap();
    let edit = |part: &str| RowEdit {
        part_number: part.into(),
        quantity: None,
        harga_total: None,
    };
    let first = h
        .stage3
        .assign_part(&h.mjm, children[0].clone(), &edit("P-1"))
        .await
        .unwrap();
    assert_eq!(first.status, RowStatus::Ready);

    // 第二个子行未补录
    let report = h
        .stage3
        .commit_stage3(&h.mjm, vec![first.clone(), children[1].clone()], "andi")
        .await
        .unwrap();
    assert_eq!(report.committed_receipts, 0);
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].code, "SPX410");
    assert_eq!(report.failed[0].outcome, OutcomeCode::Validation);

    // 只提交已补录的子行也不行
    let report = h
        .stage3
        .commit_stage3(&h.mjm, vec![first.clone()], "andi")
        .await
        .unwrap();
    assert_eq!(report.committed_receipts, 0);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(h.mem.stock_quantity(&h.mjm, "P-1"), Some(5));
    assert!(h.mem.sold_items(&h.mjm).is_empty());

    let second = h
        .stage3
        .assign_part(&h.mjm, children[1].clone(), &edit("P-2"))
        .await
        .unwrap();
    assert_eq!(second.status, RowStatus::Ready);
    let report = h
        .stage3
        .commit_stage3(&h.mjm, vec![first, second], "andi")
        .await
        .unwrap();
    assert_eq!(report.committed_receipts, 1);
    assert_eq!(report.committed_rows, 2);
    assert_eq!(h.mem.stock_quantity(&h.mjm, "P-1"), Some(4));
    assert_eq!(h.mem.stock_quantity(&h.mjm, "P-2"), Some(4));
}

#[tokio::test]
async fn commit_checks_stock_cumulatively_per_part() {
    let h = harness();
    h.mem.put_stock(&h.mjm, stock("KR-09", "Rantai", 5));
    scan_and_verify(&h, "SPX500").await;
    scan_and_verify(&h, "SPX501").await;

    let csv = shopee_csv(&[
        "O1,Selesai,SPX500,SPX Hemat,budi,KR-09,Rantai,3,\"90,000\"",
        "O2,Selesai,SPX501,SPX Hemat,rina,KR-09,Rantai,3,\"90,000\"",
    ]);
    let rows = rows_for(&h, &csv).await;
    assert!(rows.iter().all(|r| r.status == RowStatus::Ready));

    let report = h.stage3.commit_stage3(&h.mjm, rows, "andi").await.unwrap();
    assert_eq!(report.committed_receipts, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].code, "SPX501");
    assert_eq!(h.mem.stock_quantity(&h.mjm, "KR-09"), Some(2));
}

#[tokio::test]
async fn pending_rows_list_verified_receipts_without_export() {
    let h = harness();
    h.stage
        .scan_stage1(&h.mjm, &scan_req("RS-1", Platform::Reseller, "Toko Jaya"))
        .await
        .unwrap();
    h.stage.verify_stage2(&h.mjm, "RS-1", "sari").await.unwrap();
    h.stage
        .scan_stage1(&h.mjm, &scan_req("EX-1", Platform::Export, "SG"))
        .await
        .unwrap();

    let rows = h
        .stage3
        .pending_rows(&h.mjm, Some(Platform::Reseller))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].resi, "RS-1");
    assert_eq!(rows[0].status, RowStatus::ButuhInput);
}

#[tokio::test]
async fn kilat_scan_decrements_stock_immediately() {
    let h = harness();
    h.mem.put_stock(&h.mjm, stock("AKI-1", "Aki", 3));
    let req = |code: &str, quantity| KilatRequest {
        code: code.into(),
        part_number: "AKI-1".into(),
        quantity,
        sub_channel: "MJM".into(),
        scanned_by: "andi".into(),
    };

    h.stage.scan_kilat(&h.mjm, &req("KL-1", 2)).await.unwrap();
    assert_eq!(h.mem.stock_quantity(&h.mjm, "AKI-1"), Some(1));

    let err = h.stage.scan_kilat(&h.mjm, &req("KL-1", 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::Duplicate { .. }));

    let err = h.stage.scan_kilat(&h.mjm, &req("KL-2", 5)).await.unwrap_err();
    assert_eq!(err.outcome(), OutcomeCode::Validation);
    assert_eq!(h.mem.stock_quantity(&h.mjm, "AKI-1"), Some(1));
}

#[tokio::test]
async fn update_fixes_misread_code_without_touching_stages() {
    let h = harness();
    scan_and_verify(&h, "SPX6O0").await;
    let other = h
        .stage
        .scan_stage1(&h.mjm, &scan_req("SPX601", Platform::Shopee, "MJM"))
        .await
        .unwrap();
    let target = h
        .stage
        .list_receipts(&h.mjm, &ScanQuery::default())
        .await
        .unwrap()
        .remove(0);

    let fix = ReceiptUpdate {
        code: Some("SPX600".into()),
        ..Default::default()
    };
    let fixed = h.stage.update_receipt(&h.mjm, target.id, &fix).await.unwrap();
    assert_eq!(fixed.code, "SPX600");
    assert_eq!(fixed.stage(), Stage::Stage2Verified);
    assert_eq!(fixed.stage2_verified_at(), target.stage2_verified_at());

    // 改成已存在的运单号时按重复拒绝
    let clash = ReceiptUpdate {
        code: Some("SPX600".into()),
        ..Default::default()
    };
    let err = h.stage.update_receipt(&h.mjm, other.id, &clash).await.unwrap_err();
    assert!(matches!(err, EngineError::Duplicate { .. }));

    let err = h
        .stage
        .update_receipt(&h.mjm, uuid::Uuid::new_v4(), &fix)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn reseller_names_are_unique_ignoring_case() {
    let h = harness();
    let store: Arc<dyn ResiStore> = h.mem.clone();
    let master = MasterDataService::new(store);

    master.add_reseller(&h.mjm, "  Toko Jaya ").await.unwrap();
    master.add_reseller(&h.mjm, "Bengkel Maju").await.unwrap();
    let err = master.add_reseller(&h.mjm, "toko jaya").await.unwrap_err();
    assert!(matches!(err, EngineError::Duplicate { .. }));
    let err = master.add_reseller(&h.mjm, "   ").await.unwrap_err();
    assert_eq!(err.outcome(), OutcomeCode::Validation);

    let names: Vec<String> = master
        .list_resellers(&h.mjm)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["Bengkel Maju".to_string(), "Toko Jaya".to_string()]);
}
