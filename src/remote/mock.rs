use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::oplog::ReferenceOrigin;
use super::{InputItem, RemoteError, RemoteService, SavedItemsResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
  Fave { item_id: i64, token: Vec<u8>, unfave: bool },
  Revalidate { item_id: i64, origin: ReferenceOrigin },
  FetchSaved { hash: i64 }
}

// Пустая очередь ответов = успех.
pub struct MockRemote {
  inner: Mutex<MockState>
}

#[derive(Default)]
struct MockState {
  fave_results: VecDeque<Result<bool, RemoteError>>,
  revalidate_results: VecDeque<Result<Vec<u8>, RemoteError>>,
  saved_results: VecDeque<Result<SavedItemsResult, RemoteError>>,
  fave_delay: Option<Duration>,
  calls: Vec<RemoteCall>
}

impl MockRemote {
  pub fn new() -> Self {
    Self { inner: Mutex::new(MockState::default()) }
  }

  pub fn push_fave_result(&self, result: Result<bool, RemoteError>) {
    self.inner.lock().fave_results.push_back(result);
  }

  pub fn push_revalidate_result(&self, result: Result<Vec<u8>, RemoteError>) {
    self.inner.lock().revalidate_results.push_back(result);
  }

  pub fn push_saved_result(&self, result: Result<SavedItemsResult, RemoteError>) {
    self.inner.lock().saved_results.push_back(result);
  }

  pub fn set_fave_delay(&self, delay: Option<Duration>) {
    self.inner.lock().fave_delay = delay;
  }

  pub fn calls(&self) -> Vec<RemoteCall> {
    self.inner.lock().calls.clone()
  }

  pub fn fave_calls(&self) -> Vec<RemoteCall> {
    self.calls().into_iter().filter(|c| matches!(c, RemoteCall::Fave { .. })).collect()
  }
}

impl Default for MockRemote {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait::async_trait]
impl RemoteService for MockRemote {
  async fn fave_item(&self, item: InputItem, unfave: bool) -> Result<bool, RemoteError> {
    let (delay, result) = {
      let mut g = self.inner.lock();
      g.calls.push(RemoteCall::Fave { item_id: item.id, token: item.token, unfave });
      (g.fave_delay, g.fave_results.pop_front())
    };
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    tracing::debug!(event = "mock_fave_item", item_id = item.id, unfave, "mock: избранное");
    result.unwrap_or(Ok(true))
  }

  async fn revalidate_reference(&self, item_id: i64, origin: &ReferenceOrigin) -> Result<Vec<u8>, RemoteError> {
    let mut g = self.inner.lock();
    g.calls.push(RemoteCall::Revalidate { item_id, origin: origin.clone() });
    g.revalidate_results.pop_front().unwrap_or_else(|| Ok(format!("ref-{item_id}").into_bytes()))
  }

  async fn fetch_saved_items(&self, hash: i64) -> Result<SavedItemsResult, RemoteError> {
    let mut g = self.inner.lock();
    g.calls.push(RemoteCall::FetchSaved { hash });
    g.saved_results.pop_front().unwrap_or(Ok(SavedItemsResult::NotModified))
  }
}
