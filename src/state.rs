use std::sync::Arc;

use crate::app::{ManagedOperations, SavedItems, SyncContext};
use crate::db::Db;
use crate::oplog::{OperationLog, SqliteOperationLog, SAVED_ITEMS_TAG};
use crate::paths::Paths;
use crate::remote::{make_remote_service, RemoteService};
use crate::settings::{self, Settings};

#[derive(Clone)]
pub struct AppState {
  pub paths: Paths,
  pub db: Db,
  pub settings: Settings,
  pub log: Arc<dyn OperationLog>,
  pub remote: Arc<dyn RemoteService>,
  pub saved: SavedItems
}

impl AppState {
  pub async fn init(paths: Paths) -> anyhow::Result<Self> {
    paths.ensure_dirs()?;
    tracing::info!(event = "init_paths", base_dir = %paths.base_dir.display(), "Пути приложения инициализированы");

    let db = Db::connect(paths.sqlite_path()).await?;
    db.migrate().await?;
    tracing::info!(event = "init_db", db_path = %paths.sqlite_path().display(), "База данных подключена");

    let settings = settings::load(db.pool()).await?;
    let remote = make_remote_service(&settings)?;
    Ok(Self::with_remote(paths, db, settings, remote))
  }

  pub fn with_remote(paths: Paths, db: Db, settings: Settings, remote: Arc<dyn RemoteService>) -> Self {
    let store = Arc::new(SqliteOperationLog::new(db.clone()));
    let saved = SavedItems::new(store.clone(), settings.saved_items_limit);
    let log: Arc<dyn OperationLog> = store;
    Self { paths, db, settings, log, remote, saved }
  }

  pub fn sync_context(&self) -> SyncContext {
    SyncContext { log: self.log.clone(), remote: self.remote.clone(), saved: self.saved.clone() }
  }

  pub fn start_sync(&self) -> ManagedOperations {
    ManagedOperations::spawn(self.sync_context(), SAVED_ITEMS_TAG, self.settings.window_limit)
  }
}
