use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tokio::sync::watch;

use crate::db::Db;
use super::{LogEntry, LogError, LogTag, MergedEntry, OperationLog, OperationPayload, PeerId};

pub struct SqliteOperationLog {
  db: Db,
  changes: watch::Sender<u64>
}

impl SqliteOperationLog {
  pub fn new(db: Db) -> Self {
    let (changes, _) = watch::channel(0);
    Self { db, changes }
  }

  pub fn db(&self) -> &Db {
    &self.db
  }

  pub(crate) fn notify(&self) {
    self.changes.send_modify(|v| *v = v.wrapping_add(1));
  }

  // Запись в чужой транзакции: после commit вызывающий сам зовёт notify().
  pub(crate) async fn append_in(
    &self,
    tx: &mut Transaction<'_, Sqlite>,
    peer_id: PeerId,
    tag: LogTag,
    payloads: Vec<OperationPayload>,
    collapse_trailing_sync: bool
  ) -> Result<Vec<LogEntry>, LogError> {
    if collapse_trailing_sync {
      let sync_contents = serde_json::to_string(&OperationPayload::Sync)?;
      let collapsed = sqlx::query(
        "DELETE FROM operation_log
         WHERE peer_id = ? AND tag = ? AND taken_at IS NULL AND contents = ?
           AND tag_local_index = (SELECT MAX(tag_local_index) FROM operation_log WHERE peer_id = ? AND tag = ?)"
      )
        .bind(peer_id.0)
        .bind(tag.0)
        .bind(&sync_contents)
        .bind(peer_id.0)
        .bind(tag.0)
        .execute(&mut **tx)
        .await?
        .rows_affected();
      if collapsed > 0 {
        tracing::debug!(event = "oplog_sync_collapsed", peer_id = peer_id.0, tag = tag.0, "Схлопнута ожидающая синхронизация");
      }
    }

    let created_at = Utc::now().timestamp();
    let mut out = Vec::with_capacity(payloads.len());
    for payload in payloads {
      let local = next_index(tx, "local", peer_id.0, tag).await?;
      let merged = next_index(tx, "merged", 0, tag).await?;
      let contents = serde_json::to_string(&payload)?;
      sqlx::query(
        "INSERT INTO operation_log(peer_id, tag, tag_local_index, merged_index, contents, taken_at, created_at)
         VALUES(?, ?, ?, ?, ?, NULL, ?)"
      )
        .bind(peer_id.0)
        .bind(tag.0)
        .bind(local)
        .bind(merged)
        .bind(&contents)
        .bind(created_at)
        .execute(&mut **tx)
        .await?;
      out.push(LogEntry { peer_id, tag, tag_local_index: local, merged_index: Some(merged), payload: Some(payload) });
    }
    Ok(out)
  }
}

fn decode_payload(contents: Option<String>, peer_id: i64, tag_local_index: i64) -> Option<OperationPayload> {
  let contents = contents?;
  match serde_json::from_str::<OperationPayload>(&contents) {
    Ok(payload) => Some(payload),
    Err(e) => {
      tracing::warn!(
        event = "oplog_decode_failed",
        peer_id,
        tag_local_index,
        error = %e,
        "Не удалось разобрать содержимое операции, считаю её пустой"
      );
      None
    }
  }
}

fn merged_entry_from_row(row: &SqliteRow) -> Result<Option<MergedEntry>, LogError> {
  let merged_index: Option<i64> = row.try_get("merged_index")?;
  let Some(merged_index) = merged_index else { return Ok(None); };
  let peer_id: i64 = row.try_get("peer_id")?;
  let tag_local_index: i64 = row.try_get("tag_local_index")?;
  let payload = decode_payload(row.try_get("contents")?, peer_id, tag_local_index);
  Ok(Some(MergedEntry {
    peer_id: PeerId(peer_id),
    tag: LogTag(row.try_get("tag")?),
    tag_local_index,
    merged_index,
    payload
  }))
}

async fn next_index(
  tx: &mut Transaction<'_, Sqlite>,
  kind: &str,
  peer_id: i64,
  tag: LogTag
) -> Result<i64, LogError> {
  let row = sqlx::query(
    "INSERT INTO operation_log_counters(kind, peer_id, tag, next_index) VALUES(?, ?, ?, 1)
     ON CONFLICT(kind, peer_id, tag) DO UPDATE SET next_index = next_index + 1
     RETURNING next_index"
  )
    .bind(kind)
    .bind(peer_id)
    .bind(tag.0)
    .fetch_one(&mut **tx)
    .await?;
  Ok(row.try_get("next_index")?)
}

#[async_trait::async_trait]
impl OperationLog for SqliteOperationLog {
  async fn window(&self, tag: LogTag, limit: usize) -> Result<Vec<MergedEntry>, LogError> {
    let rows = sqlx::query(
      "SELECT peer_id, tag, tag_local_index, merged_index, contents FROM operation_log
       WHERE tag = ? AND merged_index IS NOT NULL
       ORDER BY merged_index ASC
       LIMIT ?"
    )
      .bind(tag.0)
      .bind(limit as i64)
      .fetch_all(self.db.pool())
      .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
      if let Some(entry) = merged_entry_from_row(row)? {
        out.push(entry);
      }
    }
    Ok(out)
  }

  fn subscribe(&self) -> watch::Receiver<u64> {
    self.changes.subscribe()
  }

  async fn take_entry(&self, peer_id: PeerId, tag: LogTag, tag_local_index: i64)
    -> Result<Option<MergedEntry>, LogError> {
    // Сначала запись: транзакция сразу берёт блокировку и не ловит SQLITE_BUSY на апгрейде.
    let mut tx = self.db.pool().begin().await?;
    sqlx::query(
      "UPDATE operation_log SET taken_at = ?
       WHERE peer_id = ? AND tag = ? AND tag_local_index = ? AND merged_index IS NOT NULL"
    )
      .bind(Utc::now().timestamp())
      .bind(peer_id.0)
      .bind(tag.0)
      .bind(tag_local_index)
      .execute(&mut *tx)
      .await?;

    let row = sqlx::query(
      "SELECT peer_id, tag, tag_local_index, merged_index, contents FROM operation_log
       WHERE peer_id = ? AND tag = ? AND tag_local_index = ?"
    )
      .bind(peer_id.0)
      .bind(tag.0)
      .bind(tag_local_index)
      .fetch_optional(&mut *tx)
      .await?;

    let entry = match row {
      Some(row) => merged_entry_from_row(&row)?,
      None => None
    };
    tx.commit().await?;
    Ok(entry)
  }

  async fn remove_entry(&self, peer_id: PeerId, tag: LogTag, tag_local_index: i64) -> Result<bool, LogError> {
    let res = sqlx::query("DELETE FROM operation_log WHERE peer_id = ? AND tag = ? AND tag_local_index = ?")
      .bind(peer_id.0)
      .bind(tag.0)
      .bind(tag_local_index)
      .execute(self.db.pool())
      .await?;
    let removed = res.rows_affected() > 0;
    if removed {
      self.notify();
    }
    Ok(removed)
  }

  async fn append(
    &self,
    peer_id: PeerId,
    tag: LogTag,
    payloads: Vec<OperationPayload>,
    collapse_trailing_sync: bool
  ) -> Result<Vec<LogEntry>, LogError> {
    let mut tx = self.db.pool().begin().await?;
    let out = self.append_in(&mut tx, peer_id, tag, payloads, collapse_trailing_sync).await?;
    tx.commit().await?;
    self.notify();
    Ok(out)
  }

  async fn pending_count(&self, tag: LogTag) -> Result<i64, LogError> {
    let row = sqlx::query("SELECT COUNT(*) AS cnt FROM operation_log WHERE tag = ? AND merged_index IS NOT NULL")
      .bind(tag.0)
      .fetch_one(self.db.pool())
      .await?;
    Ok(row.try_get("cnt")?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::oplog::{SAVED_ITEMS_PEER, SAVED_ITEMS_TAG};
  use tempfile::tempdir;

  async fn open_log(dir: &std::path::Path) -> SqliteOperationLog {
    let db = Db::connect(dir.join("log.sqlite")).await.unwrap();
    db.migrate().await.unwrap();
    SqliteOperationLog::new(db)
  }

  fn add(item_id: i64) -> OperationPayload {
    OperationPayload::Add { item_id, access_hash: 1, reference: None }
  }

  #[tokio::test]
  async fn append_assigns_increasing_indices_and_window_orders_by_merge_key() {
    let dir = tempdir().unwrap();
    let log = open_log(dir.path()).await;

    let first = log.append(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, vec![add(1), add(2)], false).await.unwrap();
    let second = log.append(PeerId(5), SAVED_ITEMS_TAG, vec![add(3)], false).await.unwrap();

    assert_eq!(first[0].tag_local_index, 1);
    assert_eq!(first[1].tag_local_index, 2);
    assert_eq!(second[0].tag_local_index, 1);
    assert_eq!(second[0].merged_index, Some(3));

    let window = log.window(SAVED_ITEMS_TAG, 10).await.unwrap();
    let keys: Vec<i64> = window.iter().map(|e| e.merged_index).collect();
    assert_eq!(keys, vec![1, 2, 3]);

    let limited = log.window(SAVED_ITEMS_TAG, 2).await.unwrap();
    assert_eq!(limited.len(), 2);
  }

  #[tokio::test]
  async fn trailing_sync_is_collapsed_on_append() {
    let dir = tempdir().unwrap();
    let log = open_log(dir.path()).await;

    log.append(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, vec![add(1), OperationPayload::Sync], true).await.unwrap();
    log.append(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, vec![add(2), OperationPayload::Sync], true).await.unwrap();

    let window = log.window(SAVED_ITEMS_TAG, 10).await.unwrap();
    let kinds: Vec<&str> = window.iter().map(|e| e.payload.as_ref().unwrap().kind()).collect();
    assert_eq!(kinds, vec!["add", "add", "sync"]);
  }

  #[tokio::test]
  async fn taken_sync_is_not_collapsed() {
    let dir = tempdir().unwrap();
    let log = open_log(dir.path()).await;

    let entries = log.append(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, vec![OperationPayload::Sync], true).await.unwrap();
    log.take_entry(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, entries[0].tag_local_index).await.unwrap();
    log.append(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, vec![OperationPayload::Sync], true).await.unwrap();

    assert_eq!(log.pending_count(SAVED_ITEMS_TAG).await.unwrap(), 2);
  }

  #[tokio::test]
  async fn take_keeps_entry_visible_and_remove_drops_it_once() {
    let dir = tempdir().unwrap();
    let log = open_log(dir.path()).await;
    let entries = log.append(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, vec![add(9)], false).await.unwrap();
    let local = entries[0].tag_local_index;

    let taken = log.take_entry(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, local).await.unwrap().unwrap();
    assert_eq!(taken.payload, Some(add(9)));
    assert_eq!(log.window(SAVED_ITEMS_TAG, 10).await.unwrap().len(), 1);

    assert!(log.remove_entry(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, local).await.unwrap());
    assert!(!log.remove_entry(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, local).await.unwrap());
    assert!(log.take_entry(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, local).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn undecodable_contents_surface_as_empty_payload() {
    let dir = tempdir().unwrap();
    let log = open_log(dir.path()).await;
    sqlx::query(
      "INSERT INTO operation_log(peer_id, tag, tag_local_index, merged_index, contents, taken_at, created_at)
       VALUES(0, ?, 1, 1, '{\"op\":\"unknown\"}', NULL, 0)"
    )
      .bind(SAVED_ITEMS_TAG.0)
      .execute(log.db.pool())
      .await
      .unwrap();

    let taken = log.take_entry(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, 1).await.unwrap().unwrap();
    assert!(taken.payload.is_none());
  }

  #[tokio::test]
  async fn mutations_bump_change_counter() {
    let dir = tempdir().unwrap();
    let log = open_log(dir.path()).await;
    let mut rx = log.subscribe();
    let before = *rx.borrow_and_update();

    log.append(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, vec![add(1)], false).await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert!(*rx.borrow_and_update() > before);
  }
}
