use std::sync::Arc;

use chrono::Utc;
use sqlx::Row;

use crate::db::Db;
use crate::oplog::{ItemReference, OperationLog, OperationPayload, ReferenceOrigin, SqliteOperationLog, SAVED_ITEMS_PEER, SAVED_ITEMS_TAG};
use crate::remote::{RemoteService, SavedItemsResult};
use crate::settings;

const HASH_KEY: &str = "saved_items_hash";
const SYNCED_AT_KEY: &str = "saved_items_synced_at";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SavedItem {
  pub item_id: i64,
  pub access_hash: i64,
  pub reference: Option<ItemReference>
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncOutcome {
  NotModified,
  Replaced { count: usize, hash: i64 }
}

// Локальная копия избранного. Изменение списка и запись в журнал идут одной транзакцией.
#[derive(Clone)]
pub struct SavedItems {
  db: Db,
  log: Arc<SqliteOperationLog>,
  limit: usize
}

impl SavedItems {
  pub fn new(log: Arc<SqliteOperationLog>, limit: usize) -> Self {
    Self { db: log.db().clone(), log, limit: limit.max(1) }
  }

  pub async fn list(&self) -> anyhow::Result<Vec<SavedItem>> {
    let rows = sqlx::query("SELECT item_id, access_hash, reference FROM saved_items ORDER BY position ASC")
      .fetch_all(self.db.pool())
      .await?;

    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
      let reference: Option<String> = r.try_get("reference")?;
      let reference = match reference {
        Some(raw) => Some(serde_json::from_str::<ItemReference>(&raw)?),
        None => None
      };
      out.push(SavedItem {
        item_id: r.get("item_id"),
        access_hash: r.get("access_hash"),
        reference
      });
    }
    Ok(out)
  }

  pub async fn save_item(&self, item_id: i64, access_hash: i64, reference: Option<ItemReference>) -> anyhow::Result<()> {
    let reference_json = reference.as_ref().map(serde_json::to_string).transpose()?;

    let mut tx = self.db.pool().begin().await?;
    sqlx::query("DELETE FROM saved_items WHERE item_id = ?")
      .bind(item_id)
      .execute(&mut *tx)
      .await?;
    let front: Option<i64> = sqlx::query("SELECT MIN(position) AS pos FROM saved_items")
      .fetch_one(&mut *tx)
      .await?
      .try_get("pos")?;
    sqlx::query("INSERT INTO saved_items(item_id, access_hash, reference, position) VALUES(?, ?, ?, ?)")
      .bind(item_id)
      .bind(access_hash)
      .bind(reference_json.as_deref())
      .bind(front.map(|p| p - 1).unwrap_or(0))
      .execute(&mut *tx)
      .await?;
    let trimmed = sqlx::query(
      "DELETE FROM saved_items WHERE item_id IN (
         SELECT item_id FROM saved_items ORDER BY position ASC LIMIT -1 OFFSET ?
       )"
    )
      .bind(self.limit as i64)
      .execute(&mut *tx)
      .await?
      .rows_affected();
    self.log.append_in(
      &mut tx,
      SAVED_ITEMS_PEER,
      SAVED_ITEMS_TAG,
      vec![OperationPayload::Add { item_id, access_hash, reference }, OperationPayload::Sync],
      true
    ).await?;
    tx.commit().await?;
    self.log.notify();

    if trimmed > 0 {
      tracing::debug!(event = "saved_items_trimmed", trimmed, limit = self.limit, "Список избранного обрезан до лимита");
    }
    tracing::info!(event = "saved_item_added", item_id, "Элемент добавлен в избранное");
    Ok(())
  }

  pub async fn unsave_item(&self, item_id: i64, access_hash: i64) -> anyhow::Result<()> {
    let mut tx = self.db.pool().begin().await?;
    sqlx::query("DELETE FROM saved_items WHERE item_id = ?")
      .bind(item_id)
      .execute(&mut *tx)
      .await?;
    self.log.append_in(
      &mut tx,
      SAVED_ITEMS_PEER,
      SAVED_ITEMS_TAG,
      vec![OperationPayload::Remove { item_id, access_hash }, OperationPayload::Sync],
      true
    ).await?;
    tx.commit().await?;
    self.log.notify();
    tracing::info!(event = "saved_item_removed", item_id, "Элемент удалён из избранного");
    Ok(())
  }

  pub async fn request_resync(&self) -> anyhow::Result<()> {
    self.log.append(SAVED_ITEMS_PEER, SAVED_ITEMS_TAG, vec![OperationPayload::Sync], true).await?;
    Ok(())
  }

  // Сервер главный: список заменяется целиком, если хэш изменился.
  pub async fn resync(&self, remote: &dyn RemoteService) -> anyhow::Result<ResyncOutcome> {
    let pool = self.db.pool();
    let known_hash = settings::get_value(pool, HASH_KEY)
      .await?
      .and_then(|v| v.parse::<i64>().ok())
      .unwrap_or(0);

    let (items, hash) = match remote.fetch_saved_items(known_hash).await? {
      SavedItemsResult::NotModified => {
        tracing::debug!(event = "saved_items_not_modified", hash = known_hash, "Избранное не изменилось");
        return Ok(ResyncOutcome::NotModified);
      }
      SavedItemsResult::Items { items, hash } => (items, hash)
    };

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM saved_items").execute(&mut *tx).await?;
    for (position, item) in items.iter().enumerate() {
      let reference = item.token.clone().map(|token| ItemReference {
        origin: ReferenceOrigin::SavedItems,
        token: Some(token)
      });
      let reference_json = reference.as_ref().map(serde_json::to_string).transpose()?;
      sqlx::query(
        "INSERT INTO saved_items(item_id, access_hash, reference, position) VALUES(?, ?, ?, ?)
         ON CONFLICT(item_id) DO NOTHING"
      )
        .bind(item.item_id)
        .bind(item.access_hash)
        .bind(reference_json.as_deref())
        .bind(position as i64)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    settings::set_value(pool, HASH_KEY, &hash.to_string()).await?;
    settings::set_value(pool, SYNCED_AT_KEY, &Utc::now().to_rfc3339()).await?;
    tracing::info!(event = "saved_items_resynced", count = items.len(), hash, "Избранное синхронизировано с сервером");
    Ok(ResyncOutcome::Replaced { count: items.len(), hash })
  }

  pub async fn last_synced_at(&self) -> anyhow::Result<Option<String>> {
    settings::get_value(self.db.pool(), SYNCED_AT_KEY).await
  }
}
