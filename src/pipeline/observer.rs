//! Observer handles: the live clients a session streams to.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::defaults::{OBSERVER_CONTROL_DEPTH, OBSERVER_QUEUE_DEPTH};

/// Registry-assigned handle identity.
pub type ObserverId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObserverError {
    #[error("observer disconnected")]
    Disconnected,
    #[error("observer queue full, message dropped")]
    QueueFull,
}

/// A connected client. Sends may fail at any time when the peer goes away;
/// callers treat that as non-fatal.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Send a sample batch. May be dropped for a client that falls behind.
    async fn send(&self, payload: &str) -> Result<(), ObserverError>;

    /// Send an end-of-session message: a stream notice, the final batch,
    /// the data-loss message or the metric. Must not be lost to a backlog
    /// of sample batches.
    async fn send_control(&self, payload: &str) -> Result<(), ObserverError> {
        self.send(payload).await
    }

    /// Ask the peer connection to close. Called at most once per session.
    async fn close(&self);
}

/// Frames handed to a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

/// Observer backed by two bounded queues drained by a socket writer task.
///
/// Sample batches go through the data queue and never wait: a slow client
/// gets `QueueFull` instead of stalling acquisition. End-of-session messages
/// and the close frame go through a short control queue of their own, so a
/// full data queue cannot crowd them out.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    data: mpsc::Sender<OutboundFrame>,
    control: mpsc::Sender<OutboundFrame>,
}

impl ChannelObserver {
    pub fn new() -> (Self, FrameReceiver) {
        Self::with_capacity(OBSERVER_QUEUE_DEPTH)
    }

    pub fn with_capacity(capacity: usize) -> (Self, FrameReceiver) {
        let (data_tx, data_rx) = mpsc::channel(capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(OBSERVER_CONTROL_DEPTH);
        (
            Self {
                data: data_tx,
                control: control_tx,
            },
            FrameReceiver {
                data: data_rx,
                control: control_rx,
            },
        )
    }
}

fn try_enqueue(tx: &mpsc::Sender<OutboundFrame>, frame: OutboundFrame) -> Result<(), ObserverError> {
    tx.try_send(frame).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => ObserverError::QueueFull,
        mpsc::error::TrySendError::Closed(_) => ObserverError::Disconnected,
    })
}

#[async_trait]
impl Observer for ChannelObserver {
    async fn send(&self, payload: &str) -> Result<(), ObserverError> {
        try_enqueue(&self.data, OutboundFrame::Text(payload.to_string()))
    }

    async fn send_control(&self, payload: &str) -> Result<(), ObserverError> {
        try_enqueue(&self.control, OutboundFrame::Text(payload.to_string()))
    }

    async fn close(&self) {
        // a writer that is already gone needs no close frame
        let _ = try_enqueue(&self.control, OutboundFrame::Close);
    }
}

/// Receiving half of a [`ChannelObserver`].
///
/// Yields every queued sample batch before the next control frame. Control
/// frames are only sent after the batches they follow, so arrival order
/// matches send order.
#[derive(Debug)]
pub struct FrameReceiver {
    data: mpsc::Receiver<OutboundFrame>,
    control: mpsc::Receiver<OutboundFrame>,
}

impl FrameReceiver {
    /// Next frame, or `None` once the observer is dropped and both queues are empty.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        tokio::select! {
            biased;
            Some(frame) = self.data.recv() => Some(frame),
            Some(frame) = self.control.recv() => Some(frame),
            else => None,
        }
    }

    /// Next frame if one is queued right now.
    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.data
            .try_recv()
            .or_else(|_| self.control.try_recv())
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_close_frames() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.send("[1]").await.unwrap();
        observer.close().await;
        assert_eq!(rx.recv().await, Some(OutboundFrame::Text("[1]".to_string())));
        assert_eq!(rx.recv().await, Some(OutboundFrame::Close));
    }

    #[tokio::test]
    async fn test_full_and_disconnected() {
        let (observer, rx) = ChannelObserver::with_capacity(1);
        observer.send("a").await.unwrap();
        assert_eq!(observer.send("b").await, Err(ObserverError::QueueFull));
        drop(rx);
        assert_eq!(observer.send("c").await, Err(ObserverError::Disconnected));
        assert_eq!(observer.send_control("d").await, Err(ObserverError::Disconnected));
    }

    #[tokio::test]
    async fn test_control_frames_survive_full_data_queue() {
        let (observer, mut rx) = ChannelObserver::with_capacity(2);
        observer.send("batch-1").await.unwrap();
        observer.send("batch-2").await.unwrap();
        assert_eq!(observer.send("batch-3").await, Err(ObserverError::QueueFull));

        observer.send_control("dataloss").await.unwrap();
        observer.send_control("metric").await.unwrap();
        observer.close().await;

        let mut frames = Vec::new();
        while let Some(frame) = rx.try_recv() {
            frames.push(frame);
        }
        let text = |s: &str| OutboundFrame::Text(s.to_string());
        assert_eq!(
            frames,
            [
                text("batch-1"),
                text("batch-2"),
                text("dataloss"),
                text("metric"),
                OutboundFrame::Close
            ]
        );
    }

    #[tokio::test]
    async fn test_recv_ends_when_observer_dropped() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.send_control("last").await.unwrap();
        drop(observer);
        assert_eq!(rx.recv().await, Some(OutboundFrame::Text("last".to_string())));
        assert_eq!(rx.recv().await, None);
    }
}
