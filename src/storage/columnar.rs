//! Columnar session file writer.
//!
//! Layout of `<data_dir>/<session>.icod`:
//!
//! ```text
//! header   "ICOD" | version: u8 | channels: u8
//! chunk    0x01 | rows: u32 | column*        (repeated)
//! column   len: u32 | zstd(little-endian values)
//!          timestamp f64, counter u8, then one f32 column per channel
//! trailer  0xFF | len: u32 | zstd(JSON metadata)
//! ```
//!
//! The trailer holds every `write_meta` entry plus `data_loss` and
//! `sample_count`, and is written on close.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use super::{DataLossTracker, SessionStorage, StorageError, StorageFactory};
use crate::config::defaults::{SESSION_FILE_EXTENSION, STORAGE_ZSTD_LEVEL};
use crate::types::Sample;

const MAGIC: &[u8; 4] = b"ICOD";
const FORMAT_VERSION: u8 = 1;
const TAG_CHUNK: u8 = 0x01;
const TAG_TRAILER: u8 = 0xFF;

/// Column buffers for the chunk being assembled.
#[derive(Debug, Default)]
struct ChunkBuffer {
    timestamps: Vec<f64>,
    counters: Vec<u8>,
    channels: Vec<Vec<f32>>,
}

impl ChunkBuffer {
    fn new(channel_count: usize, capacity: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(capacity),
            counters: Vec::with_capacity(capacity),
            channels: (0..channel_count).map(|_| Vec::with_capacity(capacity)).collect(),
        }
    }

    fn len(&self) -> usize {
        self.timestamps.len()
    }

    fn push(&mut self, sample: &Sample) {
        self.timestamps.push(sample.timestamp);
        self.counters.push(sample.counter);
        for (column, value) in self.channels.iter_mut().zip(&sample.values) {
            #[allow(clippy::cast_possible_truncation)]
            column.push(*value as f32);
        }
    }

    /// Serialize and clear the buffer.
    fn encode(&mut self) -> Result<Vec<u8>, StorageError> {
        let rows = u32::try_from(self.len())
            .map_err(|_| StorageError::Serialization("chunk too large".to_string()))?;
        let mut out = Vec::new();
        out.push(TAG_CHUNK);
        out.extend_from_slice(&rows.to_le_bytes());

        let ts: Vec<u8> = self.timestamps.iter().flat_map(|v| v.to_le_bytes()).collect();
        write_column(&mut out, &ts)?;
        write_column(&mut out, &self.counters)?;
        for column in &self.channels {
            let bytes: Vec<u8> = column.iter().flat_map(|v| v.to_le_bytes()).collect();
            write_column(&mut out, &bytes)?;
        }

        self.timestamps.clear();
        self.counters.clear();
        self.channels.iter_mut().for_each(Vec::clear);
        Ok(out)
    }
}

fn write_column(out: &mut Vec<u8>, raw: &[u8]) -> Result<(), StorageError> {
    let compressed = zstd::bulk::compress(raw, STORAGE_ZSTD_LEVEL)?;
    let len = u32::try_from(compressed.len())
        .map_err(|_| StorageError::Serialization("column too large".to_string()))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(())
}

/// Writes one session to a columnar file.
pub struct ColumnarFileStorage {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    channel_count: usize,
    chunk_rows: usize,
    buffer: ChunkBuffer,
    meta: serde_json::Map<String, serde_json::Value>,
    loss: DataLossTracker,
}

impl ColumnarFileStorage {
    pub async fn create(
        path: PathBuf,
        channel_count: usize,
        chunk_rows: usize,
    ) -> Result<Self, StorageError> {
        let channels = u8::try_from(channel_count)
            .map_err(|_| StorageError::Serialization(format!("{channel_count} channels")))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut writer = BufWriter::new(File::create(&path).await?);
        writer.write_all(MAGIC).await?;
        writer.write_all(&[FORMAT_VERSION, channels]).await?;

        info!(path = %path.display(), channels = channel_count, "Opened session file");
        Ok(Self {
            path,
            writer: Some(writer),
            channel_count,
            chunk_rows: chunk_rows.max(1),
            buffer: ChunkBuffer::new(channel_count, chunk_rows),
            meta: serde_json::Map::new(),
            loss: DataLossTracker::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush_chunk(&mut self) -> Result<(), StorageError> {
        if self.buffer.len() == 0 {
            return Ok(());
        }
        let bytes = self.buffer.encode()?;
        let writer = self.writer.as_mut().ok_or(StorageError::Closed)?;
        writer.write_all(&bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for ColumnarFileStorage {
    async fn write_sample(&mut self, sample: &Sample) -> Result<(), StorageError> {
        if self.writer.is_none() {
            return Err(StorageError::Closed);
        }
        if sample.values.len() != self.channel_count {
            return Err(StorageError::ChannelMismatch {
                expected: self.channel_count,
                got: sample.values.len(),
            });
        }
        self.buffer.push(sample);
        self.loss.record(sample.counter);
        if self.buffer.len() >= self.chunk_rows {
            self.flush_chunk().await?;
        }
        Ok(())
    }

    async fn write_meta(&mut self, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        if self.writer.is_none() {
            return Err(StorageError::Closed);
        }
        self.meta.insert(key.to_string(), value);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if self.writer.is_none() {
            debug!(path = %self.path.display(), "Session file already closed");
            return Ok(());
        }
        self.flush_chunk().await?;

        let mut meta = self.meta.clone();
        meta.insert("data_loss".to_string(), self.loss.fraction().into());
        meta.insert("sample_count".to_string(), self.loss.received().into());
        let json = serde_json::to_vec(&serde_json::Value::Object(meta))?;
        let compressed = zstd::bulk::compress(&json, STORAGE_ZSTD_LEVEL)?;
        let len = u32::try_from(compressed.len())
            .map_err(|_| StorageError::Serialization("metadata too large".to_string()))?;

        if let Some(mut writer) = self.writer.take() {
            writer.write_all(&[TAG_TRAILER]).await?;
            writer.write_all(&len.to_le_bytes()).await?;
            writer.write_all(&compressed).await?;
            writer.flush().await?;
            writer.into_inner().sync_all().await?;
        }
        info!(
            path = %self.path.display(),
            samples = self.loss.received(),
            data_loss = self.loss.fraction(),
            "Closed session file"
        );
        Ok(())
    }

    fn data_loss_fraction(&self) -> f64 {
        self.loss.fraction()
    }

    fn backend_name(&self) -> &'static str {
        "columnar"
    }
}

impl Drop for ColumnarFileStorage {
    fn drop(&mut self) {
        if self.writer.is_some() {
            warn!(path = %self.path.display(), "Session file dropped without close, trailer missing");
        }
    }
}

/// Opens one `<name>.icod` per session under the data directory.
pub struct ColumnarStorageFactory {
    data_dir: PathBuf,
    chunk_rows: usize,
}

impl ColumnarStorageFactory {
    pub fn new(data_dir: PathBuf, chunk_rows: usize) -> Self {
        Self { data_dir, chunk_rows }
    }

    pub fn session_path(&self, session_name: &str) -> PathBuf {
        self.data_dir
            .join(format!("{session_name}.{SESSION_FILE_EXTENSION}"))
    }
}

#[async_trait]
impl StorageFactory for ColumnarStorageFactory {
    async fn open(
        &self,
        session_name: &str,
        channel_count: usize,
    ) -> Result<Box<dyn SessionStorage>, StorageError> {
        let storage = ColumnarFileStorage::create(
            self.session_path(session_name),
            channel_count,
            self.chunk_rows,
        )
        .await?;
        Ok(Box::new(storage))
    }

    fn backend_name(&self) -> &'static str {
        "columnar"
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Decoded contents of a session file.
#[derive(Debug, Clone, Default)]
pub struct SessionFileContents {
    pub channel_count: usize,
    pub timestamps: Vec<f64>,
    pub counters: Vec<u8>,
    pub channels: Vec<Vec<f32>>,
    /// `None` if the file was never closed.
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], StorageError> {
        let end = self.pos.checked_add(n).filter(|e| *e <= self.bytes.len()).ok_or_else(|| {
            StorageError::Serialization(format!("truncated session file at byte {}", self.pos))
        })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, StorageError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, StorageError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn column(&mut self, expected_len: usize) -> Result<Vec<u8>, StorageError> {
        let len = self.u32()? as usize;
        let raw = zstd::bulk::decompress(self.take(len)?, expected_len)?;
        if raw.len() != expected_len {
            return Err(StorageError::Serialization(format!(
                "column holds {} bytes, expected {expected_len}",
                raw.len()
            )));
        }
        Ok(raw)
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

impl SessionFileContents {
    pub async fn read(path: &Path) -> Result<Self, StorageError> {
        let bytes = tokio::fs::read(path).await?;
        Self::decode(&bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let mut cur = Cursor { bytes, pos: 0 };
        if cur.take(4)? != MAGIC {
            return Err(StorageError::Serialization("not a session file".to_string()));
        }
        let version = cur.u8()?;
        if version != FORMAT_VERSION {
            return Err(StorageError::Serialization(format!(
                "unsupported format version {version}"
            )));
        }
        let channel_count = usize::from(cur.u8()?);
        let mut out = Self {
            channel_count,
            channels: vec![Vec::new(); channel_count],
            ..Self::default()
        };

        while !cur.is_empty() {
            match cur.u8()? {
                TAG_CHUNK => {
                    let rows = cur.u32()? as usize;
                    let ts = cur.column(rows * 8)?;
                    out.timestamps.extend(ts.chunks_exact(8).map(|c| {
                        let mut b = [0u8; 8];
                        b.copy_from_slice(c);
                        f64::from_le_bytes(b)
                    }));
                    out.counters.extend(cur.column(rows)?);
                    for channel in &mut out.channels {
                        let raw = cur.column(rows * 4)?;
                        channel.extend(raw.chunks_exact(4).map(|c| {
                            let mut b = [0u8; 4];
                            b.copy_from_slice(c);
                            f32::from_le_bytes(b)
                        }));
                    }
                }
                TAG_TRAILER => {
                    let len = cur.u32()? as usize;
                    let json = zstd::stream::decode_all(cur.take(len)?)?;
                    match serde_json::from_slice(&json)? {
                        serde_json::Value::Object(map) => out.metadata = Some(map),
                        _ => {
                            return Err(StorageError::Serialization(
                                "metadata trailer is not an object".to_string(),
                            ))
                        }
                    }
                }
                tag => {
                    return Err(StorageError::Serialization(format!(
                        "unknown block tag {tag:#04x}"
                    )))
                }
            }
        }
        Ok(out)
    }
}
