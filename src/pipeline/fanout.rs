//! Observer fan-out
//!
//! Converted samples are batched and pushed to every connected observer as
//! one JSON array per batch, roughly `update_rate_hz` times per second of
//! acquisition. Observer failures never reach the session loop.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::observer::{Observer, ObserverId};
use crate::acquisition::ChannelLayout;
use crate::types::{Sample, StreamEnvelope};

#[derive(Debug, Clone, Copy)]
enum Delivery {
    Batch,
    Control,
}

/// The set of connected observers.
pub struct ObserverHub {
    observers: RwLock<HashMap<ObserverId, Arc<dyn Observer>>>,
    next_id: AtomicU64,
}

impl Default for ObserverHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverHub {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn add(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut observers = self.observers.write().await;
        observers.insert(id, observer);
        debug!(observer = id, total = observers.len(), "Observer added");
        id
    }

    /// Returns whether the handle was still registered.
    pub async fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().await;
        let removed = observers.remove(&id).is_some();
        debug!(observer = id, removed, total = observers.len(), "Observer removed");
        removed
    }

    pub async fn len(&self) -> usize {
        self.observers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.observers.read().await.is_empty()
    }

    /// Send a sample batch to every observer. Returns how many accepted it.
    ///
    /// Failed handles stay registered; the connection's own disconnect
    /// handling removes them.
    pub async fn broadcast(&self, payload: &str) -> usize {
        self.fan_out(payload, Delivery::Batch).await
    }

    /// Send an end-of-session message to every observer.
    pub async fn broadcast_control(&self, payload: &str) -> usize {
        self.fan_out(payload, Delivery::Control).await
    }

    pub async fn broadcast_json<T: Serialize + ?Sized>(&self, message: &T) -> usize {
        match serde_json::to_string(message) {
            Ok(payload) => self.broadcast(&payload).await,
            Err(e) => {
                warn!("Failed to serialize observer message: {}", e);
                0
            }
        }
    }

    pub async fn broadcast_control_json<T: Serialize + ?Sized>(&self, message: &T) -> usize {
        match serde_json::to_string(message) {
            Ok(payload) => self.broadcast_control(&payload).await,
            Err(e) => {
                warn!("Failed to serialize observer message: {}", e);
                0
            }
        }
    }

    async fn fan_out(&self, payload: &str, delivery: Delivery) -> usize {
        let snapshot: Vec<(ObserverId, Arc<dyn Observer>)> = self
            .observers
            .read()
            .await
            .iter()
            .map(|(id, o)| (*id, Arc::clone(o)))
            .collect();

        let mut delivered = 0;
        for (id, observer) in snapshot {
            let sent = match delivery {
                Delivery::Batch => observer.send(payload).await,
                Delivery::Control => observer.send_control(payload).await,
            };
            match sent {
                Ok(()) => delivered += 1,
                Err(e) => warn!(observer = id, ?delivery, "Failed to send to observer: {}", e),
            }
        }
        delivered
    }

    /// Remove every observer and close each one. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<dyn Observer>> =
            self.observers.write().await.drain().map(|(_, o)| o).collect();
        for observer in &drained {
            observer.close().await;
        }
        drained.len()
    }

    /// Remove every observer without closing. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let mut observers = self.observers.write().await;
        let count = observers.len();
        observers.clear();
        count
    }
}

/// Envelope for one converted sample.
pub fn sample_envelope(layout: &ChannelLayout, sample: &Sample) -> StreamEnvelope {
    let [first, second, third] = layout.slots(sample);
    StreamEnvelope {
        timestamp: Some(sample.timestamp),
        first,
        second,
        third,
        ift: None,
        counter: Some(sample.counter),
        dataloss: None,
    }
}

/// Accumulates sample envelopes until a batch is due.
#[derive(Debug)]
pub struct SampleBatcher {
    layout: ChannelLayout,
    threshold: usize,
    buffer: Vec<StreamEnvelope>,
}

impl SampleBatcher {
    /// Threshold is `max(1, floor(sample_rate / update_rate_hz))`.
    pub fn new(layout: ChannelLayout, sample_rate: f64, update_rate_hz: u32) -> Self {
        let per_batch = sample_rate / f64::from(update_rate_hz.max(1));
        let threshold = if per_batch.is_finite() && per_batch >= 1.0 {
            per_batch.floor() as usize
        } else {
            1
        };
        Self {
            layout,
            threshold,
            buffer: Vec::with_capacity(threshold),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Add a sample; returns the full batch once the threshold is reached.
    pub fn push(&mut self, sample: &Sample) -> Option<Vec<StreamEnvelope>> {
        self.buffer.push(sample_envelope(&self.layout, sample));
        if self.buffer.len() >= self.threshold {
            Some(std::mem::replace(
                &mut self.buffer,
                Vec::with_capacity(self.threshold),
            ))
        } else {
            None
        }
    }

    /// Whatever is buffered, if anything.
    pub fn take_remaining(&mut self) -> Option<Vec<StreamEnvelope>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
