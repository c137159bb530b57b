use sqlx::{SqlitePool, Row};
use std::env;

pub const DEFAULT_WINDOW_LIMIT: usize = 10;
pub const DEFAULT_SAVED_ITEMS_LIMIT: usize = 5;

const WINDOW_LIMIT_KEY: &str = "window_limit";
const SAVED_ITEMS_LIMIT_KEY: &str = "saved_items_limit";

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Settings {
  pub window_limit: usize,
  pub saved_items_limit: usize
}

impl Default for Settings {
  fn default() -> Self {
    Self { window_limit: DEFAULT_WINDOW_LIMIT, saved_items_limit: DEFAULT_SAVED_ITEMS_LIMIT }
  }
}

// Порядок: значение из sync_state, затем env, затем дефолт.
pub async fn load(pool: &SqlitePool) -> anyhow::Result<Settings> {
  let window_limit = resolve_limit(pool, WINDOW_LIMIT_KEY, "TGOUTBOX_WINDOW_LIMIT", DEFAULT_WINDOW_LIMIT).await?;
  let saved_items_limit = resolve_limit(pool, SAVED_ITEMS_LIMIT_KEY, "TGOUTBOX_SAVED_LIMIT", DEFAULT_SAVED_ITEMS_LIMIT).await?;
  Ok(Settings { window_limit, saved_items_limit })
}

pub async fn set_window_limit(pool: &SqlitePool, limit: Option<usize>) -> anyhow::Result<()> {
  set_limit(pool, WINDOW_LIMIT_KEY, limit).await
}

pub async fn set_saved_items_limit(pool: &SqlitePool, limit: Option<usize>) -> anyhow::Result<()> {
  set_limit(pool, SAVED_ITEMS_LIMIT_KEY, limit).await
}

async fn resolve_limit(pool: &SqlitePool, key: &str, env_key: &str, default: usize) -> anyhow::Result<usize> {
  if let Some(v) = get_value(pool, key).await? {
    let parsed = v.parse::<usize>().map_err(|_| anyhow::anyhow!("Некорректное значение {key}: {v}"))?;
    if parsed > 0 {
      return Ok(parsed);
    }
  }
  Ok(env_limit(env_key).unwrap_or(default))
}

async fn set_limit(pool: &SqlitePool, key: &str, limit: Option<usize>) -> anyhow::Result<()> {
  match limit {
    Some(v) if v > 0 => set_value(pool, key, &v.to_string()).await,
    _ => clear_value(pool, key).await
  }
}

fn env_limit(env_key: &str) -> Option<usize> {
  let raw = env::var(env_key).ok()?;
  let v = raw.trim().parse::<usize>().ok()?;
  if v > 0 { Some(v) } else { None }
}

pub(crate) async fn get_value(pool: &SqlitePool, key: &str) -> anyhow::Result<Option<String>> {
  let row = sqlx::query("SELECT value FROM sync_state WHERE key = ?")
    .bind(key)
    .fetch_optional(pool)
    .await?;
  Ok(row.map(|r| r.get::<String, _>("value")))
}

pub(crate) async fn set_value(pool: &SqlitePool, key: &str, value: &str) -> anyhow::Result<()> {
  sqlx::query("INSERT INTO sync_state(key, value) VALUES(?, ?) ON CONFLICT(key) DO UPDATE SET value=excluded.value")
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
  Ok(())
}

pub(crate) async fn clear_value(pool: &SqlitePool, key: &str) -> anyhow::Result<()> {
  sqlx::query("DELETE FROM sync_state WHERE key = ?")
    .bind(key)
    .execute(pool)
    .await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Db;
  use tempfile::tempdir;

  #[tokio::test]
  async fn stored_overrides_win_and_clear_falls_back() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = Db::connect(dir.path().join("settings.sqlite")).await?;
    db.migrate().await?;

    set_window_limit(db.pool(), Some(3)).await?;
    set_saved_items_limit(db.pool(), Some(7)).await?;
    let s = load(db.pool()).await?;
    assert_eq!(s.window_limit, 3);
    assert_eq!(s.saved_items_limit, 7);

    set_window_limit(db.pool(), None).await?;
    assert!(get_value(db.pool(), WINDOW_LIMIT_KEY).await?.is_none());
    Ok(())
  }

  #[tokio::test]
  async fn garbage_override_is_an_error() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = Db::connect(dir.path().join("settings.sqlite")).await?;
    db.migrate().await?;

    set_value(db.pool(), WINDOW_LIMIT_KEY, "ten").await?;
    assert!(load(db.pool()).await.is_err());
    Ok(())
  }
}
