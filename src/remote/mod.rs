use std::sync::Arc;

use crate::oplog::ReferenceOrigin;
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputItem {
  pub id: i64,
  pub access_hash: i64,
  pub token: Vec<u8>
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSavedItem {
  pub item_id: i64,
  pub access_hash: i64,
  pub token: Option<Vec<u8>>
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavedItemsResult {
  NotModified,
  Items { items: Vec<RemoteSavedItem>, hash: i64 }
}

const REFERENCE_ERROR_PREFIXES: [&str; 2] = ["FILEREF_INVALID", "FILE_REFERENCE_"];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
  #[error("RPC ошибка {code}: {description}")]
  Rpc { code: i32, description: String },
  #[error("сервер недоступен")]
  Unavailable,
  #[error("{0}")]
  Other(String)
}

impl RemoteError {
  pub fn rpc(code: i32, description: impl Into<String>) -> Self {
    RemoteError::Rpc { code, description: description.into() }
  }

  // Ссылка протухла, её можно перезапросить.
  pub fn is_reference_invalid(&self) -> bool {
    match self {
      RemoteError::Rpc { description, .. } => {
        REFERENCE_ERROR_PREFIXES.iter().any(|p| description.starts_with(p))
      }
      _ => false
    }
  }
}

#[async_trait::async_trait]
pub trait RemoteService: Send + Sync {
  async fn fave_item(&self, item: InputItem, unfave: bool) -> Result<bool, RemoteError>;
  async fn revalidate_reference(&self, item_id: i64, origin: &ReferenceOrigin) -> Result<Vec<u8>, RemoteError>;
  async fn fetch_saved_items(&self, hash: i64) -> Result<SavedItemsResult, RemoteError>;
}

#[cfg(feature = "mock_remote")]
mod mock;
#[cfg(feature = "mock_remote")]
pub use mock::{MockRemote, RemoteCall};

pub fn make_remote_service(_settings: &Settings) -> anyhow::Result<Arc<dyn RemoteService>> {
  #[cfg(feature = "mock_remote")]
  {
    return Ok(Arc::new(MockRemote::new()));
  }

  #[cfg(not(feature = "mock_remote"))]
  {
    Err(anyhow::anyhow!(
      "Не выбран сетевой backend. Включи фичу 'mock_remote' или подключи реальный транспорт."
    ))
  }
}
