use std::collections::{HashMap, HashSet};

use crate::oplog::{MergedEntry, PeerId};
use super::slot::OperationSlot;

#[derive(Debug, Default)]
pub struct Reconciled {
  pub cancel: Vec<OperationSlot>,
  pub start: Vec<(MergedEntry, OperationSlot)>
}

// merged_index -> слот операции, которая сейчас по нему выполняется.
#[derive(Debug, Default)]
pub struct OperationTracker {
  slots: HashMap<i64, OperationSlot>
}

impl OperationTracker {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn reconcile(&mut self, entries: &[MergedEntry]) -> Reconciled {
    let mut out = Reconciled::default();
    let mut claimed_peers: HashSet<PeerId> = HashSet::new();
    let mut valid: HashSet<i64> = HashSet::new();

    // Первая запись пира в окне выигрывает, остальные ждут следующего прохода.
    for entry in entries {
      if !claimed_peers.insert(entry.peer_id) {
        continue;
      }
      valid.insert(entry.merged_index);
      if !self.slots.contains_key(&entry.merged_index) {
        let slot = OperationSlot::new();
        self.slots.insert(entry.merged_index, slot.clone());
        out.start.push((entry.clone(), slot));
      }
    }

    let stale: Vec<i64> = self.slots.keys().copied().filter(|k| !valid.contains(k)).collect();
    for key in stale {
      if let Some(slot) = self.slots.remove(&key) {
        out.cancel.push(slot);
      }
    }

    out
  }

  pub fn teardown(&mut self) -> Vec<OperationSlot> {
    self.slots.drain().map(|(_, slot)| slot).collect()
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub fn contains(&self, merged_index: i64) -> bool {
    self.slots.contains_key(&merged_index)
  }

  pub fn slot(&self, merged_index: i64) -> Option<&OperationSlot> {
    self.slots.get(&merged_index)
  }

  // Забыть ключ, только если за ним всё ещё этот же слот.
  pub fn forget(&mut self, merged_index: i64, slot: &OperationSlot) -> bool {
    match self.slots.get(&merged_index) {
      Some(current) if current.same_as(slot) => {
        self.slots.remove(&merged_index);
        true
      }
      _ => false
    }
  }
}
