use std::sync::Arc;

use resi_pipeline::api::{self, AppState};
use resi_pipeline::config::StorageKind;
use resi_pipeline::db::ensure_schema;
use resi_pipeline::models::StoreCode;
use resi_pipeline::{create_pool, AppConfig, MemoryStore, PgStore, ResiStore};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!(
        "Starting server: stores={:?}, storage={:?}, undo_depth={}",
        config.engine.stores, config.storage.kind, config.engine.undo_depth
    );

    let store: Arc<dyn ResiStore> = match config.storage.kind {
        StorageKind::Postgres => {
            let pool = create_pool(&config.database).await?;
            info!("Database pool created");
            for raw in &config.engine.stores {
                let code = StoreCode::parse(raw)?;
                ensure_schema(&pool, &code).await?;
                info!("Schema ready for store {}", code);
            }
            Arc::new(PgStore::new(pool))
        }
        StorageKind::Memory => {
            warn!("Using in-memory storage, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(store, &config)?;
    let app = api::router(state);

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/:store/stage1/scan    - Stage 1 scan");
    info!("  POST /api/:store/stage2/verify  - Stage 2 verify");
    info!("  POST /api/:store/stage3/rows    - Upload export, build stage 3 rows");
    info!("  POST /api/:store/stage3/commit  - Post ready rows to the sales ledger");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
