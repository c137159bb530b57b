use tokio::sync::watch;

mod sqlite;
mod view;
#[cfg(test)]
pub(crate) mod failing;

pub use sqlite::SqliteOperationLog;
pub use view::WindowView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PeerId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct LogTag(pub i32);

pub const SAVED_ITEMS_TAG: LogTag = LogTag(1);

// Все операции избранного ведутся на одном "глобальном" пире.
pub const SAVED_ITEMS_PEER: PeerId = PeerId(0);

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceOrigin {
  SavedItems,
  Message { peer_id: PeerId, message_id: i64 },
  Collection { collection_id: i64 }
}

// Временная ссылка на объект: откуда получена и сам токен, если он известен.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ItemReference {
  pub origin: ReferenceOrigin,
  #[serde(default, with = "token_hex")]
  pub token: Option<Vec<u8>>
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationPayload {
  Add { item_id: i64, access_hash: i64, reference: Option<ItemReference> },
  Remove { item_id: i64, access_hash: i64 },
  Sync
}

impl OperationPayload {
  pub fn kind(&self) -> &'static str {
    match self {
      OperationPayload::Add { .. } => "add",
      OperationPayload::Remove { .. } => "remove",
      OperationPayload::Sync => "sync"
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
  pub peer_id: PeerId,
  pub tag: LogTag,
  pub tag_local_index: i64,
  pub merged_index: Option<i64>,
  pub payload: Option<OperationPayload>
}

// payload = None, если содержимое пустое или не разбирается.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedEntry {
  pub peer_id: PeerId,
  pub tag: LogTag,
  pub tag_local_index: i64,
  pub merged_index: i64,
  pub payload: Option<OperationPayload>
}

#[derive(thiserror::Error, Debug)]
pub enum LogError {
  #[error("ошибка базы данных: {0}")]
  Db(#[from] sqlx::Error),
  #[error("не удалось разобрать операцию: {0}")]
  Decode(#[from] serde_json::Error)
}

#[async_trait::async_trait]
pub trait OperationLog: Send + Sync {
  async fn window(&self, tag: LogTag, limit: usize) -> Result<Vec<MergedEntry>, LogError>;
  fn subscribe(&self) -> watch::Receiver<u64>;

  async fn take_entry(&self, peer_id: PeerId, tag: LogTag, tag_local_index: i64)
    -> Result<Option<MergedEntry>, LogError>;
  async fn remove_entry(&self, peer_id: PeerId, tag: LogTag, tag_local_index: i64) -> Result<bool, LogError>;

  async fn append(
    &self,
    peer_id: PeerId,
    tag: LogTag,
    payloads: Vec<OperationPayload>,
    collapse_trailing_sync: bool
  ) -> Result<Vec<LogEntry>, LogError>;
  async fn pending_count(&self, tag: LogTag) -> Result<i64, LogError>;
}

mod token_hex {
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(token: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
    match token {
      Some(bytes) => s.serialize_some(&hex::encode(bytes)),
      None => s.serialize_none()
    }
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    raw.map(|v| hex::decode(v).map_err(serde::de::Error::custom)).transpose()
  }
}
