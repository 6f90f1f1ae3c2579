pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod parser;
pub mod service;

pub use config::AppConfig;
pub use db::{create_pool, MemoryStore, PgStore, ResiStore};
pub use error::{EngineError, EngineResult};
pub use service::{MasterDataService, ReconcileService, Stage3Service, StageService, UndoStack};
