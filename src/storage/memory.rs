//! In-memory session storage for testing and dry runs.
//!
//! Not durable: data is lost on restart. Every session's record stays
//! reachable through the factory so callers can inspect it afterwards.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{DataLossTracker, SessionStorage, StorageError, StorageFactory};
use crate::types::Sample;

/// Everything written to one in-memory session.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecord {
    pub name: String,
    pub channel_count: usize,
    pub samples: Vec<Sample>,
    pub meta: BTreeMap<String, serde_json::Value>,
    pub close_calls: usize,
}

pub struct InMemoryStorage {
    record: Arc<Mutex<MemoryRecord>>,
    loss: DataLossTracker,
    closed: bool,
}

impl InMemoryStorage {
    pub fn new(name: &str, channel_count: usize) -> Self {
        Self {
            record: Arc::new(Mutex::new(MemoryRecord {
                name: name.to_string(),
                channel_count,
                ..MemoryRecord::default()
            })),
            loss: DataLossTracker::default(),
            closed: false,
        }
    }

    pub fn record(&self) -> Arc<Mutex<MemoryRecord>> {
        Arc::clone(&self.record)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStorage for InMemoryStorage {
    async fn write_sample(&mut self, sample: &Sample) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        let mut record = self.lock();
        if sample.values.len() != record.channel_count {
            return Err(StorageError::ChannelMismatch {
                expected: record.channel_count,
                got: sample.values.len(),
            });
        }
        record.samples.push(sample.clone());
        drop(record);
        self.loss.record(sample.counter);
        Ok(())
    }

    async fn write_meta(&mut self, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        self.lock().meta.insert(key.to_string(), value);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.lock().close_calls += 1;
        self.closed = true;
        Ok(())
    }

    fn data_loss_fraction(&self) -> f64 {
        self.loss.fraction()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Factory keeping a handle to every session it opened.
#[derive(Default)]
pub struct InMemoryStorageFactory {
    sessions: Mutex<Vec<Arc<Mutex<MemoryRecord>>>>,
}

impl InMemoryStorageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots of every session opened so far, oldest first.
    pub fn sessions(&self) -> Vec<MemoryRecord> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }
}

#[async_trait]
impl StorageFactory for InMemoryStorageFactory {
    async fn open(
        &self,
        session_name: &str,
        channel_count: usize,
    ) -> Result<Box<dyn SessionStorage>, StorageError> {
        let storage = InMemoryStorage::new(session_name, channel_count);
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(storage.record());
        Ok(Box::new(storage))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
