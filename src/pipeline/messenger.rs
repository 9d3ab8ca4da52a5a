//! State channel: pushes [`SystemState`] to subscribed clients whenever a
//! client-visible part of it changes.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::acquisition::Holder;
use crate::config::defaults::STATE_CHANNEL_CAPACITY;
use crate::storage::disk_capacity;
use crate::types::{MeasurementStatus, SystemState};

pub struct StateMessenger {
    holder: Arc<dyn Holder>,
    data_dir: PathBuf,
    tx: broadcast::Sender<String>,
}

impl StateMessenger {
    pub fn new(holder: Arc<dyn Holder>, data_dir: PathBuf) -> Self {
        let (tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self { holder, data_dir, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Full system state around the given measurement status.
    pub async fn snapshot(&self, measurement_status: MeasurementStatus) -> SystemState {
        SystemState {
            can_ready: self.holder.is_ready().await,
            disk_capacity: disk_capacity(&self.data_dir),
            measurement_status,
        }
    }

    /// Broadcast the current state. Returns how many subscribers got it.
    pub async fn push_update(&self, measurement_status: MeasurementStatus) -> usize {
        if self.tx.receiver_count() == 0 {
            return 0;
        }
        let state = self.snapshot(measurement_status).await;
        match serde_json::to_string(&state) {
            Ok(payload) => {
                let sent = self.tx.send(payload).unwrap_or(0);
                debug!(subscribers = sent, running = state.measurement_status.running, "State pushed");
                sent
            }
            Err(e) => {
                warn!("Failed to serialize system state: {}", e);
                0
            }
        }
    }
}
