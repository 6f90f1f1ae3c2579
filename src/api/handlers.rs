use axum::{
    extract::{Json, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AppState, UndoSession};
use crate::error::{AlertSignal, EngineError, EngineResult, OutcomeCode};
use crate::models::{
    BulkReport, CommitReport, Platform, ReceiptScan, ReceiptUpdate, ReconciliationSummary,
    ScanQuery, SourcePlatform, Stage3Row, StoreCode,
};
use crate::service::{
    flag_batch, write_rows_csv, KilatRequest, ReconcileOutcome, RowEdit, ScanRequest, UndoStack,
};

/// 统一响应体; `code`/`alert` 供前端选择提示音
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: OutcomeCode,
    pub alert: AlertSignal,
    pub message: String,
    pub data: Option<T>,
}

/// 业务失败按类别返回 4xx, 存储故障返回 500
pub fn status_for(err: &EngineError) -> StatusCode {
    match err.outcome() {
        OutcomeCode::Success => StatusCode::OK,
        OutcomeCode::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        OutcomeCode::NotFound => StatusCode::NOT_FOUND,
        OutcomeCode::Duplicate | OutcomeCode::AlreadyVerified | OutcomeCode::Committed => {
            StatusCode::CONFLICT
        }
        OutcomeCode::Error => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply<T: Serialize>(result: EngineResult<T>, message: impl FnOnce(&T) -> String) -> Response {
    match result {
        Ok(data) => {
            let body = ApiResponse {
                success: true,
                code: OutcomeCode::Success,
                alert: AlertSignal::Success,
                message: message(&data),
                data: Some(data),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            if e.is_fault() {
                tracing::error!("request failed: {}", e);
            }
            let code = e.outcome();
            let body = ApiResponse::<()> {
                success: false,
                code,
                alert: code.alert(),
                message: e.to_string(),
                data: None,
            };
            (status_for(&e), Json(body)).into_response()
        }
    }
}

impl AppState {
    /// 仅接受配置中的仓库分区
    fn store(&self, raw: &str) -> EngineResult<StoreCode> {
        let code = StoreCode::parse(raw)?;
        if !self.stores.contains(&code) {
            return Err(EngineError::NotFound(format!("store {code}")));
        }
        Ok(code)
    }

    fn session_key(&self, store: &StoreCode, headers: &HeaderMap) -> String {
        let sid = headers
            .get("x-session-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or("default");
        format!("{store}:{sid}")
    }

    /// 会话撤销栈句柄; 分片锁只在取句柄时持有, 不跨越 await
    fn undo_session(&self, key: &str) -> UndoSession {
        self.sessions
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UndoStack::new(self.undo_depth))))
            .clone()
    }
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn scan_stage1(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Json(req): Json<ScanRequest>,
) -> Response {
    let result = match state.store(&store) {
        Ok(store) => state.stage.scan_stage1(&store, &req).await,
        Err(e) => Err(e),
    };
    reply(result, |s| format!("resi {} scanned ({})", s.code, s.scope()))
}

pub async fn scan_stage1_bulk(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Json(items): Json<Vec<ScanRequest>>,
) -> Response {
    let result: EngineResult<BulkReport> = match state.store(&store) {
        Ok(store) => Ok(state.stage.scan_stage1_bulk(&store, &items).await),
        Err(e) => Err(e),
    };
    reply(result, |r| format!("{} scanned, {} failed", r.succeeded, r.failed))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub code: String,
    pub verified_by: String,
}

pub async fn verify_stage2(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Json(req): Json<VerifyRequest>,
) -> Response {
    let result = match state.store(&store) {
        Ok(store) => state.stage.verify_stage2(&store, &req.code, &req.verified_by).await,
        Err(e) => Err(e),
    };
    reply(result, |v| format!("resi {} verified ({} records)", req.code.trim(), v.len()))
}

#[derive(Debug, Deserialize)]
pub struct BulkVerifyRequest {
    pub codes: Vec<String>,
    pub verified_by: String,
}

pub async fn verify_stage2_bulk(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Json(req): Json<BulkVerifyRequest>,
) -> Response {
    let result: EngineResult<BulkReport> = match state.store(&store) {
        Ok(store) => Ok(state.stage.verify_stage2_bulk(&store, &req.codes, &req.verified_by).await),
        Err(e) => Err(e),
    };
    reply(result, |r| format!("{} verified, {} failed", r.succeeded, r.failed))
}

pub async fn list_receipts(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Query(query): Query<ScanQuery>,
) -> Response {
    let result = match state.store(&store) {
        Ok(store) => state.stage.list_receipts(&store, &query).await,
        Err(e) => Err(e),
    };
    reply(result, |v| format!("{} receipts", v.len()))
}

pub async fn delete_receipt(
    State(state): State<AppState>,
    Path((store, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> Response {
    let store = match state.store(&store) {
        Ok(store) => store,
        Err(e) => return reply::<()>(Err(e), |_| String::new()),
    };
    let key = state.session_key(&store, &headers);
    let session = state.undo_session(&key);
    let mut undo = session.lock().await;
    let result = state.stage.delete_receipt(&store, id, &mut undo).await;
    drop(undo);
    reply(result, |s| format!("resi {} deleted", s.code))
}

pub async fn undo_delete(
    State(state): State<AppState>,
    Path(store): Path<String>,
    headers: HeaderMap,
) -> Response {
    let store = match state.store(&store) {
        Ok(store) => store,
        Err(e) => return reply::<()>(Err(e), |_| String::new()),
    };
    let key = state.session_key(&store, &headers);
    let session = state.undo_session(&key);
    let mut undo = session.lock().await;
    let result = state.stage.undo_delete(&store, &mut undo).await;
    drop(undo);
    reply(result, |s| format!("resi {} restored", s.code))
}

pub async fn restore_receipt(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Json(prior): Json<ReceiptScan>,
) -> Response {
    let result = match state.store(&store) {
        Ok(store) => state.stage.restore_receipt(&store, &prior).await,
        Err(e) => Err(e),
    };
    reply(result, |s| format!("resi {} restored", s.code))
}

pub async fn update_receipt(
    State(state): State<AppState>,
    Path((store, id)): Path<(String, Uuid)>,
    Json(update): Json<ReceiptUpdate>,
) -> Response {
    let result = match state.store(&store) {
        Ok(store) => state.stage.update_receipt(&store, id, &update).await,
        Err(e) => Err(e),
    };
    reply(result, |s| format!("resi {} updated", s.code))
}

pub async fn flag_duplicates(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Json(codes): Json<Vec<String>>,
) -> Response {
    let result = state.store(&store).map(|_| flag_batch(&codes));
    reply(result, |v| {
        format!("{} duplicates", v.iter().filter(|f| f.duplicate).count())
    })
}

pub async fn reconcile(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Query(window): Query<ScanQuery>,
    body: String,
) -> Response {
    let result: EngineResult<ReconcileOutcome> = match state.store(&store) {
        Ok(store) => state.reconcile.reconcile_upload(&store, &body, &window).await,
        Err(e) => Err(e),
    };
    reply(result, |o| {
        format!(
            "{}: matched {}, scan-only {}, export-only {}",
            o.source,
            o.summary.matched_receipts,
            o.summary.scanned_not_in_export,
            o.summary.export_not_scanned
        )
    })
}

#[derive(Debug, Serialize)]
pub struct Stage3Rows {
    pub source: Option<SourcePlatform>,
    pub summary: Option<ReconciliationSummary>,
    pub rows: Vec<Stage3Row>,
}

/// 上传导出文件, 对账后直接生成第三阶段工作行
pub async fn stage3_rows(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Query(window): Query<ScanQuery>,
    body: String,
) -> Response {
    let result = async move {
        let store = state.store(&store)?;
        let outcome = state.reconcile.reconcile_upload(&store, &body, &window).await?;
        let rows = state.stage3.rows_from_reconciliation(&store, &outcome.result).await?;
        Ok::<_, EngineError>(Stage3Rows {
            source: Some(outcome.source),
            summary: Some(outcome.summary),
            rows,
        })
    }
    .await;
    reply(result, |r| format!("{} rows", r.rows.len()))
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub platform: Option<Platform>,
}

pub async fn stage3_pending(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Query(query): Query<PendingQuery>,
) -> Response {
    let result = match state.store(&store) {
        Ok(store) => state.stage3.pending_rows(&store, query.platform).await,
        Err(e) => Err(e),
    };
    reply(result, |v| format!("{} rows", v.len()))
}

pub async fn stage3_revalidate(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Json(mut rows): Json<Vec<Stage3Row>>,
) -> Response {
    let result = async move {
        let store = state.store(&store)?;
        state.stage3.revalidate(&store, &mut rows).await?;
        Ok::<_, EngineError>(rows)
    }
    .await;
    reply(result, |v| {
        format!("{} rows, {} ready", v.len(), v.iter().filter(|r| r.is_ready()).count())
    })
}

#[derive(Debug, Deserialize)]
pub struct SplitRequest {
    pub row: Stage3Row,
    pub parts: usize,
}

pub async fn stage3_split(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Json(req): Json<SplitRequest>,
) -> Response {
    let result = state
        .store(&store)
        .and_then(|_| state.stage3.split_row(&req.row, req.parts));
    reply(result, |v| format!("resi {} split into {}", req.row.resi, v.len()))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub row: Stage3Row,
    #[serde(flatten)]
    pub edit: RowEdit,
}

pub async fn stage3_assign(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Json(req): Json<AssignRequest>,
) -> Response {
    let result = match state.store(&store) {
        Ok(store) => state.stage3.assign_part(&store, req.row, &req.edit).await,
        Err(e) => Err(e),
    };
    reply(result, |r| format!("resi {}: {}", r.resi, r.status.label()))
}

#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    pub rows: Vec<Stage3Row>,
    pub processed_by: String,
}

pub async fn stage3_commit(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Json(req): Json<CommitRequest>,
) -> Response {
    let result: EngineResult<CommitReport> = match state.store(&store) {
        Ok(store) => state.stage3.commit_stage3(&store, req.rows, &req.processed_by).await,
        Err(e) => Err(e),
    };
    reply(result, |r| {
        format!(
            "{} receipts committed, {} skipped, {} failed",
            r.committed_receipts,
            r.skipped.len(),
            r.failed.len()
        )
    })
}

pub async fn stage3_export(Json(rows): Json<Vec<Stage3Row>>) -> Response {
    let mut buf = Vec::new();
    match write_rows_csv(&rows, &mut buf) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            buf,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("csv export failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn scan_kilat(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Json(req): Json<KilatRequest>,
) -> Response {
    let result = match state.store(&store) {
        Ok(store) => state.stage.scan_kilat(&store, &req).await,
        Err(e) => Err(e),
    };
    reply(result, |k| format!("resi {} took {} x {}", k.resi, k.quantity, k.part_number))
}

pub async fn list_resellers(State(state): State<AppState>, Path(store): Path<String>) -> Response {
    let result = match state.store(&store) {
        Ok(store) => state.master.list_resellers(&store).await,
        Err(e) => Err(e),
    };
    reply(result, |v| format!("{} resellers", v.len()))
}

#[derive(Debug, Deserialize)]
pub struct ResellerRequest {
    pub name: String,
}

pub async fn add_reseller(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Json(req): Json<ResellerRequest>,
) -> Response {
    let result = match state.store(&store) {
        Ok(store) => state.master.add_reseller(&store, &req.name).await,
        Err(e) => Err(e),
    };
    reply(result, |name| format!("reseller {name} added"))
}
