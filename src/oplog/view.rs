use std::sync::Arc;

use tokio::sync::watch;

use super::{LogTag, MergedEntry, OperationLog};

pub struct WindowView {
  log: Arc<dyn OperationLog>,
  changes: watch::Receiver<u64>,
  tag: LogTag,
  limit: usize,
  primed: bool
}

impl WindowView {
  pub fn new(log: Arc<dyn OperationLog>, tag: LogTag, limit: usize) -> Self {
    let changes = log.subscribe();
    Self { log, changes, tag, limit: limit.max(1), primed: false }
  }

  // Первый вызов сразу отдаёт текущее окно.
  pub async fn next(&mut self) -> Option<Vec<MergedEntry>> {
    loop {
      if self.primed {
        self.changes.changed().await.ok()?;
      }
      self.primed = true;
      self.changes.borrow_and_update();

      if let Some(entries) = self.current().await {
        return Some(entries);
      }
    }
  }

  pub async fn current(&self) -> Option<Vec<MergedEntry>> {
    match self.log.window(self.tag, self.limit).await {
      Ok(entries) => Some(entries),
      Err(e) => {
        tracing::warn!(event = "oplog_window_failed", tag = self.tag.0, error = %e, "Не удалось прочитать окно операций");
        None
      }
    }
  }
}
