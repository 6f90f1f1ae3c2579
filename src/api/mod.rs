pub mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;

use crate::config::AppConfig;
use crate::db::ResiStore;
use crate::error::EngineResult;
use crate::models::StoreCode;
use crate::parser::CurrencyNormalizer;
use crate::service::{MasterDataService, ReconcileService, Stage3Service, StageService, UndoStack};

pub use handlers::ApiResponse;

/// 会话撤销栈; 同一会话的删除/撤销请求串行执行
pub type UndoSession = Arc<Mutex<UndoStack>>;

/// 共享状态: 各阶段服务 + 按会话持有的撤销栈
#[derive(Clone)]
pub struct AppState {
    pub stage: StageService,
    pub reconcile: ReconcileService,
    pub stage3: Stage3Service,
    pub master: MasterDataService,
    pub sessions: Arc<DashMap<String, UndoSession>>,
    pub undo_depth: usize,
    pub stores: Arc<Vec<StoreCode>>,
}

impl AppState {
    pub fn new(store: Arc<dyn ResiStore>, config: &AppConfig) -> EngineResult<Self> {
        let stores = config
            .engine
            .stores
            .iter()
            .map(|s| StoreCode::parse(s))
            .collect::<EngineResult<Vec<_>>>()?;
        let stage = StageService::new(store.clone());

        Ok(Self {
            reconcile: ReconcileService::new(
                store.clone(),
                CurrencyNormalizer::new(config.rates.clone()),
            ),
            stage3: Stage3Service::new(store.clone(), stage.clone()),
            master: MasterDataService::new(store),
            stage,
            sessions: Arc::new(DashMap::new()),
            undo_depth: config.engine.undo_depth,
            stores: Arc::new(stores),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/:store/stage1/scan", post(handlers::scan_stage1))
        .route("/api/:store/stage1/bulk", post(handlers::scan_stage1_bulk))
        .route("/api/:store/stage2/verify", post(handlers::verify_stage2))
        .route("/api/:store/stage2/bulk", post(handlers::verify_stage2_bulk))
        .route("/api/:store/receipts", get(handlers::list_receipts))
        .route(
            "/api/:store/receipts/:id",
            delete(handlers::delete_receipt).patch(handlers::update_receipt),
        )
        .route("/api/:store/receipts/undo", post(handlers::undo_delete))
        .route("/api/:store/receipts/restore", post(handlers::restore_receipt))
        .route("/api/:store/duplicates", post(handlers::flag_duplicates))
        .route("/api/:store/reconcile", post(handlers::reconcile))
        .route("/api/:store/stage3/rows", post(handlers::stage3_rows))
        .route("/api/:store/stage3/pending", get(handlers::stage3_pending))
        .route("/api/:store/stage3/revalidate", post(handlers::stage3_revalidate))
        .route("/api/:store/stage3/split", post(handlers::stage3_split))
        .route("/api/:store/stage3/assign", post(handlers::stage3_assign))
        .route("/api/:store/stage3/commit", post(handlers::stage3_commit))
        .route("/api/:store/stage3/export", post(handlers::stage3_export))
        .route("/api/:store/kilat", post(handlers::scan_kilat))
        .route(
            "/api/:store/resellers",
            get(handlers::list_resellers).post(handlers::add_reseller),
        )
        .layer(ServiceBuilder::new())
        .with_state(state)
}
