use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::oplog::{LogTag, MergedEntry, WindowView};
use super::runner::{run_entry, RunOutcome};
use super::tracker::{OperationTracker, Reconciled};
use super::SyncContext;

struct Inner {
  tracker: OperationTracker,
  closed: bool
}

// Drop останавливает цикл и прерывает все запущенные операции.
pub struct ManagedOperations {
  inner: Arc<Mutex<Inner>>,
  task: Option<AbortHandle>,
  tag: LogTag
}

impl ManagedOperations {
  pub fn spawn(ctx: SyncContext, tag: LogTag, window_limit: usize) -> Self {
    let inner = Arc::new(Mutex::new(Inner { tracker: OperationTracker::new(), closed: false }));
    let mut view = WindowView::new(ctx.log.clone(), tag, window_limit);

    // Будит цикл, когда запись осталась в журнале и её нужно запустить заново.
    let rescan = Arc::new(Notify::new());

    let loop_inner = inner.clone();
    let task = tokio::spawn(async move {
      loop {
        let entries = tokio::select! {
          next = view.next() => match next {
            Some(entries) => entries,
            None => break
          },
          _ = rescan.notified() => match view.current().await {
            Some(entries) => entries,
            None => continue
          }
        };
        apply_window(&ctx, &loop_inner, &rescan, &entries);
      }
      tracing::debug!(event = "managed_operations_view_closed", tag = tag.0, "Журнал операций закрыт");
    });

    tracing::info!(event = "managed_operations_started", tag = tag.0, window_limit, "Синхронизация журнала запущена");
    Self { inner, task: Some(task.abort_handle()), tag }
  }

  pub fn in_flight(&self) -> usize {
    self.inner.lock().tracker.len()
  }

  pub fn shutdown(&mut self) {
    let Some(task) = self.task.take() else { return; };
    task.abort();

    let slots = {
      let mut g = self.inner.lock();
      g.closed = true;
      g.tracker.teardown()
    };
    for slot in &slots {
      slot.cancel();
    }
    tracing::info!(event = "managed_operations_stopped", tag = self.tag.0, cancelled = slots.len(), "Синхронизация журнала остановлена");
  }
}

impl Drop for ManagedOperations {
  fn drop(&mut self) {
    self.shutdown();
  }
}

fn apply_window(ctx: &SyncContext, inner: &Arc<Mutex<Inner>>, rescan: &Arc<Notify>, entries: &[MergedEntry]) {
  let Reconciled { cancel, start } = {
    let mut g = inner.lock();
    if g.closed {
      return;
    }
    g.tracker.reconcile(entries)
  };

  for slot in cancel {
    slot.cancel();
  }

  for (entry, slot) in start {
    tracing::debug!(
      event = "saved_items_operation_start",
      merged_index = entry.merged_index,
      peer_id = entry.peer_id.0,
      "Запуск операции из журнала"
    );
    let ctx = ctx.clone();
    let inner = inner.clone();
    let rescan = rescan.clone();
    let own = slot.clone();
    let handle = tokio::spawn(async move {
      if let RunOutcome::Retained(_) = run_entry(&ctx, &entry).await {
        let forgotten = inner.lock().tracker.forget(entry.merged_index, &own);
        if forgotten {
          rescan.notify_one();
        }
      }
    });
    // Слот мог быть отменён между reconcile и set, тогда задача прервётся сразу.
    slot.set(handle.abort_handle());
  }
}
