use std::sync::Arc;

use crate::db::ResiStore;
use crate::error::{EngineError, EngineResult};
use crate::models::{Reseller, StoreCode};

/// 主数据: 分销商名单 (RESELLER 平台的子渠道下拉)
#[derive(Clone)]
pub struct MasterDataService {
    store: Arc<dyn ResiStore>,
}

impl MasterDataService {
    pub fn new(store: Arc<dyn ResiStore>) -> Self {
        Self { store }
    }

    pub async fn list_resellers(&self, store: &StoreCode) -> EngineResult<Vec<Reseller>> {
        Ok(self.store.list_resellers(store).await?)
    }

    /// 名称不区分大小写去重; 已存在时返回 `Duplicate`
    pub async fn add_reseller(&self, store: &StoreCode, name: &str) -> EngineResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation("reseller name is required".into()));
        }
        if !self.store.add_reseller(store, name).await? {
            return Err(EngineError::Duplicate {
                code: name.to_string(),
                scope: "RESELLER".into(),
            });
        }
        tracing::info!("[MASTER] reseller {} added to {}", name, store);
        Ok(name.to_string())
    }
}
