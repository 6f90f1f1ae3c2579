use bigdecimal::BigDecimal;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub rates: ExchangeRates,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// 存储后端: postgres 或 memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub kind: StorageKind,
}

/// 引擎参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 物理仓库分区 (每个分区一套表)
    pub stores: Vec<String>,
    /// 每个会话保留的可撤销删除条数
    pub undo_depth: usize,
}

/// 固定汇率表 (折算为基础货币 IDR)
///
/// 部署常量, 不随市场更新; 调用方应视为近似值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRates {
    pub myr: BigDecimal,
    pub php: BigDecimal,
    pub sgd: BigDecimal,
    pub usd: BigDecimal,
}

impl Default for ExchangeRates {
    fn default() -> Self {
        Self {
            myr: BigDecimal::from(3500),
            php: BigDecimal::from(280),
            sgd: BigDecimal::from(11500),
            usd: BigDecimal::from(16000),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/resi_pipeline".to_string()),
                max_connections: 20,
            },
            storage: StorageConfig {
                kind: StorageKind::Postgres,
            },
            engine: EngineConfig {
                stores: vec!["mjm".to_string(), "bjw".to_string()],
                undo_depth: 1,
            },
            rates: ExchangeRates::default(),
        }
    }
}

impl AppConfig {
    /// 加载配置: 默认值 -> resi.toml (可选) -> RESI__* 环境变量 -> 兼容旧环境变量
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Config::try_from(&AppConfig::default())?;
        let path = std::env::var("RESI_CONFIG").unwrap_or_else(|_| "resi".to_string());

        let mut cfg: AppConfig = Config::builder()
            .add_source(defaults)
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("RESI")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("engine.stores")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Ok(host) = std::env::var("SERVER_HOST") {
            cfg.server.host = host;
        }
        if let Some(port) = std::env::var("SERVER_PORT").ok().and_then(|p| p.parse().ok()) {
            cfg.server.port = port;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.stores.is_empty() {
            return Err(ConfigError::Message("engine.stores must not be empty".into()));
        }
        if self.engine.undo_depth == 0 {
            return Err(ConfigError::Message("engine.undo_depth must be at least 1".into()));
        }
        for store in &self.engine.stores {
            crate::models::StoreCode::parse(store)
                .map_err(|e| ConfigError::Message(format!("engine.stores: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.engine.undo_depth, 1);
        assert_eq!(cfg.rates.myr, BigDecimal::from(3500));
    }

    #[test]
    fn rejects_bad_store_code() {
        let mut cfg = AppConfig::default();
        cfg.engine.stores = vec!["mjm; drop".to_string()];
        assert!(cfg.validate().is_err());
    }
}
