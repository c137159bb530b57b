use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const MAX_CONNECTIONS: u32 = 4;
// Журнал одновременно пишут раннеры и локальные команды.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Db {
  pool: SqlitePool
}

impl Db {
  pub async fn connect(path: impl AsRef<Path>) -> anyhow::Result<Self> {
    let path = path.as_ref();
    let opts = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .synchronous(SqliteSynchronous::Normal)
      .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
      .max_connections(MAX_CONNECTIONS)
      .connect_with(opts)
      .await
      .with_context(|| format!("Не удалось открыть базу {}", path.display()))?;
    Ok(Self { pool })
  }

  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }

  pub async fn migrate(&self) -> anyhow::Result<()> {
    MIGRATOR.run(&self.pool).await.context("Не удалось применить миграции")?;
    tracing::debug!(event = "db_migrated", known = MIGRATOR.iter().count(), "Миграции применены");
    Ok(())
  }
}
