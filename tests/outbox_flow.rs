use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use tgoutbox_lib::db::Db;
use tgoutbox_lib::oplog::{ItemReference, ReferenceOrigin, SAVED_ITEMS_TAG};
use tgoutbox_lib::paths::Paths;
use tgoutbox_lib::remote::{MockRemote, RemoteCall, RemoteError, RemoteSavedItem, SavedItemsResult};
use tgoutbox_lib::settings::Settings;
use tgoutbox_lib::state::AppState;

async fn app(dir: &std::path::Path, remote: Arc<MockRemote>) -> anyhow::Result<AppState> {
  let paths = Paths::from_base(dir.to_path_buf());
  paths.ensure_dirs()?;
  let db = Db::connect(paths.sqlite_path()).await?;
  db.migrate().await?;
  Ok(AppState::with_remote(paths, db, Settings::default(), remote))
}

async fn wait_drained(state: &AppState) -> anyhow::Result<()> {
  let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
  while state.log.pending_count(SAVED_ITEMS_TAG).await? > 0 {
    anyhow::ensure!(tokio::time::Instant::now() < deadline, "журнал не опустел вовремя");
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  Ok(())
}

fn reference(token: &[u8]) -> Option<ItemReference> {
  Some(ItemReference { origin: ReferenceOrigin::SavedItems, token: Some(token.to_vec()) })
}

#[tokio::test]
async fn queued_changes_reach_the_server_in_order() -> anyhow::Result<()> {
  let dir = tempdir()?;
  let remote = Arc::new(MockRemote::new());
  let state = app(dir.path(), remote.clone()).await?;

  state.saved.save_item(1, 10, reference(b"a")).await?;
  state.saved.save_item(2, 20, reference(b"b")).await?;
  state.saved.unsave_item(1, 10).await?;

  remote.push_saved_result(Ok(SavedItemsResult::Items {
    items: vec![RemoteSavedItem { item_id: 2, access_hash: 20, token: Some(b"b".to_vec()) }],
    hash: 42
  }));

  let mut managed = state.start_sync();
  wait_drained(&state).await?;
  managed.shutdown();

  assert_eq!(remote.calls(), vec![
    RemoteCall::Fave { item_id: 1, token: b"a".to_vec(), unfave: false },
    RemoteCall::Fave { item_id: 2, token: b"b".to_vec(), unfave: false },
    RemoteCall::Fave { item_id: 1, token: Vec::new(), unfave: true },
    RemoteCall::FetchSaved { hash: 0 }
  ]);
  let items = state.saved.list().await?;
  assert_eq!(items.len(), 1);
  assert_eq!(items[0].item_id, 2);
  Ok(())
}

#[tokio::test]
async fn failing_entries_do_not_block_the_outbox() -> anyhow::Result<()> {
  let dir = tempdir()?;
  let remote = Arc::new(MockRemote::new());
  let state = app(dir.path(), remote.clone()).await?;

  remote.push_fave_result(Err(RemoteError::rpc(500, "INTERNAL")));
  state.saved.save_item(1, 10, reference(b"a")).await?;
  state.saved.save_item(2, 20, reference(b"b")).await?;

  let mut managed = state.start_sync();
  wait_drained(&state).await?;
  managed.shutdown();

  assert_eq!(remote.fave_calls().len(), 2);
  Ok(())
}

#[tokio::test]
async fn entries_left_by_a_stopped_coordinator_run_on_restart() -> anyhow::Result<()> {
  let dir = tempdir()?;
  let remote = Arc::new(MockRemote::new());
  let state = app(dir.path(), remote.clone()).await?;

  remote.set_fave_delay(Some(Duration::from_secs(30)));
  state.saved.save_item(1, 10, reference(b"a")).await?;

  let mut first = state.start_sync();
  let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
  while remote.fave_calls().is_empty() {
    anyhow::ensure!(tokio::time::Instant::now() < deadline, "операция не стартовала");
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  first.shutdown();
  assert_eq!(state.log.pending_count(SAVED_ITEMS_TAG).await?, 2);

  remote.set_fave_delay(None);
  let mut second = state.start_sync();
  wait_drained(&state).await?;
  second.shutdown();

  assert_eq!(remote.fave_calls().len(), 2);
  Ok(())
}
