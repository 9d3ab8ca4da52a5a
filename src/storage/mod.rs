//! Session storage
//!
//! The session core persists through the [`SessionStorage`] trait so backends
//! can be swapped without touching pipeline code:
//! - [`ColumnarFileStorage`]: compressed columnar session files on disk
//! - [`InMemoryStorage`]: non-durable store for tests and dry runs
//!
//! One storage instance is opened per session through a [`StorageFactory`].
//! Finished session files are listed, read back and removed through
//! [`SessionFiles`].

pub mod columnar;
pub mod disk;
pub mod files;
pub mod lockfile;
pub mod memory;

pub use columnar::{ColumnarFileStorage, ColumnarStorageFactory, SessionFileContents};
pub use disk::disk_capacity;
pub use files::{check_file_name, FileAccessError, MeasurementFileDetails, SessionFiles};
pub use lockfile::DataDirLock;
pub use memory::{InMemoryStorage, InMemoryStorageFactory, MemoryRecord};

use async_trait::async_trait;

use crate::config::defaults::COUNTER_MODULUS;
use crate::types::Sample;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("sample has {got} values, session has {expected} channels")]
    ChannelMismatch { expected: usize, got: usize },
    #[error("storage already closed")]
    Closed,
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Durable sink for one measurement session.
///
/// The coordinator writes metadata before the first sample, every sample in
/// stream order, and closes exactly once.
#[async_trait]
pub trait SessionStorage: Send {
    async fn write_sample(&mut self, sample: &Sample) -> Result<(), StorageError>;

    /// Attach a metadata entry. Later writes to the same key replace earlier ones.
    async fn write_meta(&mut self, key: &str, value: serde_json::Value) -> Result<(), StorageError>;

    async fn close(&mut self) -> Result<(), StorageError>;

    /// Fraction of frames lost, judged by gaps in the wrapping counter.
    fn data_loss_fraction(&self) -> f64;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Opens a storage instance per session.
#[async_trait]
pub trait StorageFactory: Send + Sync + 'static {
    async fn open(
        &self,
        session_name: &str,
        channel_count: usize,
    ) -> Result<Box<dyn SessionStorage>, StorageError>;

    fn backend_name(&self) -> &'static str;
}

/// Counts lost frames from gaps in the 8-bit message counter.
#[derive(Debug, Clone, Default)]
pub struct DataLossTracker {
    last: Option<u8>,
    received: u64,
    lost: u64,
}

impl DataLossTracker {
    pub fn record(&mut self, counter: u8) {
        if let Some(last) = self.last {
            let step = (u16::from(counter) + COUNTER_MODULUS - u16::from(last)) % COUNTER_MODULUS;
            // step 0 is a repeated counter, not a full wrap of lost frames
            if step > 1 {
                self.lost += u64::from(step - 1);
            }
        }
        self.last = Some(counter);
        self.received += 1;
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn fraction(&self) -> f64 {
        let expected = self.received + self.lost;
        if expected == 0 {
            0.0
        } else {
            self.lost as f64 / expected as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_loss_across_wrap() {
        let mut t = DataLossTracker::default();
        for c in 250..=255u8 {
            t.record(c);
        }
        for c in 0..10u8 {
            t.record(c);
        }
        assert_eq!(t.lost(), 0);
        assert_eq!(t.fraction(), 0.0);
    }

    #[test]
    fn test_gap_counts_missing_frames() {
        let mut t = DataLossTracker::default();
        t.record(10);
        t.record(11);
        t.record(15); // 12, 13, 14 lost
        assert_eq!(t.lost(), 3);
        assert_eq!(t.received(), 3);
        assert!((t.fraction() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_gap_across_wrap() {
        let mut t = DataLossTracker::default();
        t.record(254);
        t.record(1); // 255, 0 lost
        assert_eq!(t.lost(), 2);
    }

    #[test]
    fn test_empty_session_has_zero_loss() {
        assert_eq!(DataLossTracker::default().fraction(), 0.0);
    }
}
