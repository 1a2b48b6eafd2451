//! Transaction-scoped rollback deduplication table

use crate::{OperationId, RollbackFailure};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Progress of an operation's rollback
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RollbackStatus {
    #[default]
    NotStarted,
    InProgress,
    Done,
    Failed,
}

/// Per-operation rollback record
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub status: RollbackStatus,
    pub attempts: u32,
    pub last_error: Option<Box<str>>,
}

/// Final result of an attempt sequence: attempts used, or the failure
pub(crate) type RollbackResult = Result<u32, RollbackFailure>;

/// One operation's rollback: its record plus the result every requester awaits
pub(crate) struct RollbackSlot {
    record: Mutex<RollbackRecord>,
    result: watch::Sender<Option<RollbackResult>>,
}

impl RollbackSlot {
    fn new() -> Self {
        let (result, _) = watch::channel(None);
        Self {
            record: Mutex::new(RollbackRecord::default()),
            result,
        }
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut RollbackRecord)) {
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut record);
    }

    pub(crate) fn record(&self) -> RollbackRecord {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<RollbackResult>> {
        self.result.subscribe()
    }

    /// Publish the final result. Only the first call takes effect.
    pub(crate) fn finish(&self, result: RollbackResult) {
        self.result.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(result);
            true
        });
    }
}

/// Outcome of a get-or-create lookup
pub(crate) enum SlotEntry {
    /// This caller created the slot and must start the attempt sequence
    Created(Arc<RollbackSlot>),
    /// A sequence already exists; attach to it
    Existing(Arc<RollbackSlot>),
}

/// Map from operation ID to its (possibly still running) rollback.
///
/// Lives exactly as long as one transaction. Every lookup is an atomic
/// check-and-insert under the map lock, so two concurrent requests for the
/// same ID can never both observe `Created`.
#[derive(Default)]
pub struct RollbackTable {
    slots: Mutex<HashMap<OperationId, Arc<RollbackSlot>>>,
}

impl RollbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get_or_create(&self, operation_id: &OperationId) -> SlotEntry {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(operation_id) {
            return SlotEntry::Existing(slot.clone());
        }
        let slot = Arc::new(RollbackSlot::new());
        slots.insert(operation_id.clone(), slot.clone());
        SlotEntry::Created(slot)
    }

    /// Snapshot of one operation's record
    pub fn record(&self, operation_id: &OperationId) -> Option<RollbackRecord> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(operation_id).map(|slot| slot.record())
    }

    /// Snapshot of every record, ordered by operation ID
    pub fn records(&self) -> BTreeMap<OperationId, RollbackRecord> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .map(|(id, slot)| (id.clone(), slot.record()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lookup_attaches() {
        let table = RollbackTable::new();
        let id: OperationId = "a".into();

        assert!(matches!(table.get_or_create(&id), SlotEntry::Created(_)));
        assert!(matches!(table.get_or_create(&id), SlotEntry::Existing(_)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.record(&id), Some(RollbackRecord::default()));
    }

    #[test]
    fn finish_is_write_once() {
        let table = RollbackTable::new();
        let SlotEntry::Created(slot) = table.get_or_create(&"a".into()) else {
            panic!("expected a new slot");
        };
        let rx = slot.subscribe();

        slot.finish(Ok(1));
        slot.finish(Ok(2));

        assert_eq!(*rx.borrow(), Some(Ok(1)));
    }
}
