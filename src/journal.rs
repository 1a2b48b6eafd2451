//! Transaction journal storage trait
//!
//! The journal is a diagnostic record of what happened during a run. It is
//! never replayed; transactions do not survive the process.

use super::{TransactionEvent, TransactionId};
use serde::{Deserialize, Serialize};

/// Journal storage trait
pub trait TransactionJournal: Send + Sync + 'static {
    fn append(&self, txn_id: TransactionId, event: TransactionEvent) -> Result<u64, JournalError>;
    fn read(&self, txn_id: TransactionId) -> Result<Vec<JournalEntry>, JournalError>;
    fn list_transactions(&self) -> Result<Vec<TransactionId>, JournalError>;
    fn prune(&self, txn_id: TransactionId) -> Result<(), JournalError>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub sequence: u64,
    pub recorded_at_millis: u64,
    pub event: TransactionEvent,
}

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Storage error: {0}")]
    Storage(Box<str>),
    #[error("Not found: {0}")]
    NotFound(TransactionId),
}

/// Append an event, logging instead of failing the run on storage errors
pub(crate) fn record_event(
    journal: &dyn TransactionJournal,
    txn_id: TransactionId,
    event: TransactionEvent,
) {
    if let Err(err) = journal.append(txn_id, event) {
        tracing::warn!(txn_id = %txn_id, error = %err, "Failed to journal transaction event");
    }
}

/// Journal that records nothing
pub struct NoOpJournal;

impl TransactionJournal for NoOpJournal {
    fn append(
        &self,
        _txn_id: TransactionId,
        _event: TransactionEvent,
    ) -> Result<u64, JournalError> {
        Ok(0)
    }

    fn read(&self, txn_id: TransactionId) -> Result<Vec<JournalEntry>, JournalError> {
        Err(JournalError::NotFound(txn_id))
    }

    fn list_transactions(&self) -> Result<Vec<TransactionId>, JournalError> {
        Ok(Vec::new())
    }

    fn prune(&self, _txn_id: TransactionId) -> Result<(), JournalError> {
        Ok(())
    }
}

/// In-memory journal
pub struct InMemoryJournal {
    data: std::sync::RwLock<std::collections::HashMap<u64, Vec<JournalEntry>>>,
    counter: std::sync::atomic::AtomicU64,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self {
            data: std::sync::RwLock::new(std::collections::HashMap::new()),
            counter: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Events recorded for a transaction, in append order
    pub fn events(&self, txn_id: TransactionId) -> Vec<TransactionEvent> {
        self.read(txn_id)
            .map(|entries| entries.into_iter().map(|entry| entry.event).collect())
            .unwrap_or_default()
    }
}

impl TransactionJournal for InMemoryJournal {
    fn append(&self, txn_id: TransactionId, event: TransactionEvent) -> Result<u64, JournalError> {
        let seq = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let entry = JournalEntry {
            sequence: seq,
            recorded_at_millis: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            event,
        };

        let mut data = self.data.write().map_err(|e| JournalError::Storage(e.to_string().into()))?;
        data.entry(txn_id.0).or_default().push(entry);

        Ok(seq)
    }

    fn read(&self, txn_id: TransactionId) -> Result<Vec<JournalEntry>, JournalError> {
        let data = self.data.read().map_err(|e| JournalError::Storage(e.to_string().into()))?;
        Ok(data.get(&txn_id.0).cloned().unwrap_or_default())
    }

    fn list_transactions(&self) -> Result<Vec<TransactionId>, JournalError> {
        let data = self.data.read().map_err(|e| JournalError::Storage(e.to_string().into()))?;
        Ok(data.keys().map(|&id| TransactionId::new(id)).collect())
    }

    fn prune(&self, txn_id: TransactionId) -> Result<(), JournalError> {
        let mut data = self.data.write().map_err(|e| JournalError::Storage(e.to_string().into()))?;
        data.remove(&txn_id.0);
        Ok(())
    }
}

impl Default for InMemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}
