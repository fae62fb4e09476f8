//! In-memory sink keeping every event and span it receives.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::sink::{CaptureSink, Event, EventId, TransactionRecord};

/// Sink that records in memory. Useful for tests and local inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
    transactions: Mutex<Vec<TransactionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        lock(&self.transactions).clone()
    }

    /// Finished spans whose name is `name`.
    pub fn transactions_named(&self, name: &str) -> Vec<TransactionRecord> {
        lock(&self.transactions)
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    pub fn capture_count(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
        lock(&self.transactions).clear();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl CaptureSink for MemorySink {
    fn capture_event(&self, event: Event) -> Option<EventId> {
        let id = event.event_id;
        lock(&self.events).push(event);
        Some(id)
    }

    fn record_transaction(&self, record: TransactionRecord) {
        lock(&self.transactions).push(record);
    }

    async fn flush(&self, _timeout: Duration) -> bool {
        true
    }
}
