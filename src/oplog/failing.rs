use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use super::{LogEntry, LogError, LogTag, MergedEntry, OperationLog, OperationPayload, PeerId};

// Обёртка над настоящим журналом для тестов: роняет заданное число удалений.
pub(crate) struct FailingLog {
  inner: Arc<dyn OperationLog>,
  remove_failures: AtomicUsize,
  remove_attempts: AtomicUsize
}

impl FailingLog {
  pub(crate) fn new(inner: Arc<dyn OperationLog>) -> Self {
    Self { inner, remove_failures: AtomicUsize::new(0), remove_attempts: AtomicUsize::new(0) }
  }

  pub(crate) fn fail_removes(&self, count: usize) {
    self.remove_failures.store(count, Ordering::SeqCst);
  }

  pub(crate) fn remove_attempts(&self) -> usize {
    self.remove_attempts.load(Ordering::SeqCst)
  }
}

#[async_trait::async_trait]
impl OperationLog for FailingLog {
  async fn window(&self, tag: LogTag, limit: usize) -> Result<Vec<MergedEntry>, LogError> {
    self.inner.window(tag, limit).await
  }

  fn subscribe(&self) -> watch::Receiver<u64> {
    self.inner.subscribe()
  }

  async fn take_entry(&self, peer_id: PeerId, tag: LogTag, tag_local_index: i64)
    -> Result<Option<MergedEntry>, LogError> {
    self.inner.take_entry(peer_id, tag, tag_local_index).await
  }

  async fn remove_entry(&self, peer_id: PeerId, tag: LogTag, tag_local_index: i64) -> Result<bool, LogError> {
    self.remove_attempts.fetch_add(1, Ordering::SeqCst);
    let fail = self
      .remove_failures
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if fail {
      return Err(LogError::Db(sqlx::Error::PoolTimedOut));
    }
    self.inner.remove_entry(peer_id, tag, tag_local_index).await
  }

  async fn append(
    &self,
    peer_id: PeerId,
    tag: LogTag,
    payloads: Vec<OperationPayload>,
    collapse_trailing_sync: bool
  ) -> Result<Vec<LogEntry>, LogError> {
    self.inner.append(peer_id, tag, payloads, collapse_trailing_sync).await
  }

  async fn pending_count(&self, tag: LogTag) -> Result<i64, LogError> {
    self.inner.pending_count(tag).await
  }
}
