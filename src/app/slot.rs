use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

// Одна задача на слот. После cancel любая новая задача прерывается сразу.
#[derive(Clone, Default)]
pub struct OperationSlot {
  inner: Arc<Mutex<SlotState>>
}

#[derive(Default)]
struct SlotState {
  current: Option<AbortHandle>,
  cancelled: bool
}

impl OperationSlot {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&self, handle: AbortHandle) {
    let previous = {
      let mut g = self.inner.lock();
      if g.cancelled {
        Some(handle)
      } else {
        g.current.replace(handle)
      }
    };
    if let Some(previous) = previous {
      previous.abort();
    }
  }

  pub fn cancel(&self) {
    let current = {
      let mut g = self.inner.lock();
      g.cancelled = true;
      g.current.take()
    };
    if let Some(handle) = current {
      handle.abort();
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.lock().cancelled
  }

  pub fn is_finished(&self) -> bool {
    self.inner.lock().current.as_ref().map(|h| h.is_finished()).unwrap_or(true)
  }

  pub fn same_as(&self, other: &OperationSlot) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl fmt::Debug for OperationSlot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let g = self.inner.lock();
    f.debug_struct("OperationSlot")
      .field("running", &g.current.is_some())
      .field("cancelled", &g.cancelled)
      .finish()
  }
}
