//! Session coordinator: the per-session state machine
//!
//! ```text
//! Idle -> Configuring -> Streaming -> Finalizing -> Idle
//! ```
//!
//! Every exit path (time limit, stop request, end of stream, stream timeout,
//! storage or holder error, panic, cancellation) ends in the same
//! [`Finalizing`](SessionPhase::Finalizing) pass, which closes storage once,
//! closes the observers once and resets the registry once.

use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::fanout::SampleBatcher;
use super::metric::{MetricAccumulator, MetricFunction};
use super::registry::SessionRegistry;
use crate::acquisition::{
    configure, AcquisitionSetup, ChannelLayout, ConfigurationError, ConversionPipeline, Holder,
    HolderError, SampleStream, StreamEvent,
};
use crate::config::DaqConfig;
use crate::sensors::SensorResolver;
use crate::storage::{SessionStorage, StorageError, StorageFactory};
use crate::types::{MeasurementInstructions, Sample, Sensor, StreamEnvelope, StreamNotice};

// ============================================================================
// Wiring
// ============================================================================

/// Session tuning taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub update_rate_hz: u32,
    /// `None` waits for post-metadata until it arrives.
    pub post_meta_timeout: Option<Duration>,
    pub post_meta_poll: Duration,
    pub stream_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &DaqConfig) -> Self {
        Self {
            update_rate_hz: config.measurement.update_rate_hz,
            post_meta_timeout: config.measurement.post_meta_timeout(),
            post_meta_poll: config.measurement.post_meta_poll(),
            stream_timeout: config.holder.stream_timeout(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&DaqConfig::default())
    }
}

/// Collaborators a session runs against.
#[derive(Clone)]
pub struct SessionDeps {
    pub holder: Arc<dyn Holder>,
    pub resolver: Arc<SensorResolver>,
    pub storage: Arc<dyn StorageFactory>,
    pub metric: Arc<dyn MetricFunction>,
    pub settings: SessionSettings,
}

/// What the registry hands to a new session task.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub name: String,
    pub instructions: MeasurementInstructions,
}

// ============================================================================
// States and outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Configuring,
    Streaming,
    Finalizing,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "Idle"),
            SessionPhase::Configuring => write!(f, "Configuring"),
            SessionPhase::Streaming => write!(f, "Streaming"),
            SessionPhase::Finalizing => write!(f, "Finalizing"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("configuration failed: {0}")]
    Configuration(#[source] ConfigurationError),

    #[error("{0}")]
    UnsupportedChannelConfiguration(#[source] ConfigurationError),

    #[error("stream failed: {0}")]
    Stream(#[from] HolderError),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("session cancelled")]
    Cancelled,

    #[error("session panicked: {0}")]
    Panicked(String),
}

impl From<ConfigurationError> for SessionError {
    fn from(e: ConfigurationError) -> Self {
        match e {
            ConfigurationError::UnsupportedChannels { .. } => {
                SessionError::UnsupportedChannelConfiguration(e)
            }
            ConfigurationError::InvalidAdc(_) | ConfigurationError::Adc(_) => {
                SessionError::Configuration(e)
            }
        }
    }
}

/// Why streaming ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamExit {
    TimeLimit,
    StopRequested,
    EndOfStream,
    StreamTimeout,
    Cancelled,
    /// Configuration fault; streaming never started.
    Aborted,
    /// Storage or holder error, or a panic, during streaming.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub name: String,
    pub exit: StreamExit,
    /// Samples read from the holder (and written to storage).
    pub samples: u64,
    pub data_loss: Option<f64>,
    pub metric_sent: bool,
}

/// Value of the session task's `JoinHandle`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed(SessionReport),
    /// Cancelled from outside; teardown has run.
    Cancelled(SessionReport),
}

impl SessionOutcome {
    pub fn report(&self) -> &SessionReport {
        match self {
            SessionOutcome::Completed(r) | SessionOutcome::Cancelled(r) => r,
        }
    }
}

// ============================================================================
// Session task
// ============================================================================

/// Run one session to completion. Spawned by [`SessionRegistry::start`].
pub async fn run_session(
    registry: Arc<SessionRegistry>,
    plan: SessionPlan,
    cancel: CancellationToken,
) -> SessionOutcome {
    let mut session = Session::new(&registry, plan);

    let result = AssertUnwindSafe(session.stream(&registry, &cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(SessionError::Panicked(panic_message(panic.as_ref()))));

    let exit = match result {
        Ok(exit) => exit,
        Err(SessionError::Cancelled) => StreamExit::Cancelled,
        Err(e @ (SessionError::Configuration(_) | SessionError::UnsupportedChannelConfiguration(_))) => {
            error!(session = %session.name, "Configuration fault: {}", e);
            registry
                .observers()
                .broadcast_control_json(&StreamNotice { error: e.to_string() })
                .await;
            StreamExit::Aborted
        }
        Err(e) => {
            error!(session = %session.name, phase = %session.phase, "Session error: {}", e);
            StreamExit::Failed
        }
    };

    let report = session.finalize(&registry, exit, &cancel).await;
    if exit == StreamExit::Cancelled {
        SessionOutcome::Cancelled(report)
    } else {
        SessionOutcome::Completed(report)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

struct Session {
    name: String,
    instructions: MeasurementInstructions,
    deps: SessionDeps,
    phase: SessionPhase,
    sample_rate: f64,
    storage: Option<Box<dyn SessionStorage>>,
    batcher: Option<SampleBatcher>,
    metric: MetricAccumulator,
    samples: u64,
}

impl Session {
    fn new(registry: &SessionRegistry, plan: SessionPlan) -> Self {
        Self {
            name: plan.name,
            instructions: plan.instructions,
            deps: registry.deps().clone(),
            phase: SessionPhase::Idle,
            sample_rate: 0.0,
            storage: None,
            batcher: None,
            metric: MetricAccumulator::disabled(),
            samples: 0,
        }
    }

    fn enter(&mut self, phase: SessionPhase) {
        debug!(session = %self.name, from = %self.phase, to = %phase, "Session phase change");
        self.phase = phase;
    }

    /// Configuring and Streaming. Returns why streaming ended.
    async fn stream(
        &mut self,
        registry: &SessionRegistry,
        cancel: &CancellationToken,
    ) -> Result<StreamExit, SessionError> {
        self.enter(SessionPhase::Configuring);
        let deps = self.deps.clone();

        // pick up catalogue edits made since the last session
        deps.resolver.reload().await;
        let sensors = deps.resolver.resolve_all(self.instructions.channels()).await;
        let setup = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            setup = configure(deps.holder.as_ref(), &self.instructions.adc, self.instructions.channels()) => setup?,
        };
        self.sample_rate = setup.sample_rate;

        let layout = ChannelLayout::new(&setup.streaming);
        let conversion =
            ConversionPipeline::new(layout, &sensors, setup.adc.reference_voltage);
        self.metric = MetricAccumulator::new(&self.instructions, &layout);
        self.batcher = Some(SampleBatcher::new(
            layout,
            setup.sample_rate,
            deps.settings.update_rate_hz,
        ));

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            stream = deps.holder.open_stream(&setup.streaming) => stream?,
        };
        self.open_storage(registry, &setup, &sensors).await?;

        self.enter(SessionPhase::Streaming);
        info!(
            session = %self.name,
            holder = deps.holder.source_name(),
            rate = setup.sample_rate,
            channels = %setup.channels,
            "Streaming started"
        );

        let time_limit = self.instructions.time_limit();
        let mut origin: Option<f64> = None;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(session = %self.name, "Cancellation received while streaming");
                    self.send_metric(registry).await;
                    return Ok(StreamExit::Cancelled);
                }
                event = next_event(stream.as_mut(), deps.settings.stream_timeout) => event,
            };

            let mut sample = match event {
                Ok(StreamEvent::Sample(sample, _aux)) => sample,
                Ok(StreamEvent::Eof) => {
                    info!(session = %self.name, samples = self.samples, "Holder closed the stream");
                    return Ok(StreamExit::EndOfStream);
                }
                Err(e @ (HolderError::StreamTimeout(_) | HolderError::Disconnected(_))) => {
                    warn!(session = %self.name, "Stream lost: {}", e);
                    let observers = registry.observers();
                    observers
                        .broadcast_control_json(&StreamNotice { error: e.to_string() })
                        .await;
                    let closed = observers.close_all().await;
                    debug!(closed, "Observers closed after stream loss");
                    return Ok(StreamExit::StreamTimeout);
                }
                Err(e) => return Err(e.into()),
            };

            let first = origin.is_none();
            let start = *origin.get_or_insert(sample.timestamp);
            sample.timestamp -= start;

            conversion.convert(&mut sample);
            self.process(registry, &sample).await?;

            if first {
                continue;
            }
            match time_limit {
                Some(limit) if sample.timestamp >= limit => {
                    info!(session = %self.name, limit, "Time limit reached");
                    return Ok(StreamExit::TimeLimit);
                }
                Some(_) => {}
                None if registry.stop_requested() => {
                    info!(session = %self.name, "Stop requested");
                    return Ok(StreamExit::StopRequested);
                }
                None => {}
            }
        }
    }

    async fn open_storage(
        &mut self,
        registry: &SessionRegistry,
        setup: &AcquisitionSetup,
        sensors: &[Option<Arc<Sensor>>; 3],
    ) -> Result<(), SessionError> {
        let mut storage = self
            .deps
            .storage
            .open(&self.name, setup.streaming.width())
            .await?;

        let active_sensors: Vec<&Sensor> = sensors.iter().flatten().map(Arc::as_ref).collect();
        storage
            .write_meta("reference_voltage", setup.adc.reference_voltage.into())
            .await?;
        storage.write_meta("sample_rate", setup.sample_rate.into()).await?;
        storage
            .write_meta("sensors", serde_json::to_value(&active_sensors).map_err(StorageError::from)?)
            .await?;
        if let Some(pre_meta) = registry.pre_meta().await {
            storage
                .write_meta("pre_metadata", serde_json::to_value(&pre_meta).map_err(StorageError::from)?)
                .await?;
        }
        storage
            .write_meta(
                "instructions",
                serde_json::to_value(&self.instructions).map_err(StorageError::from)?,
            )
            .await?;

        debug!(session = %self.name, backend = storage.backend_name(), "Session storage opened");
        self.storage = Some(storage);
        Ok(())
    }

    /// Persist, accumulate and fan out one converted sample.
    async fn process(&mut self, registry: &SessionRegistry, sample: &Sample) -> Result<(), SessionError> {
        let storage = self.storage.as_mut().ok_or(StorageError::Closed)?;
        storage.write_sample(sample).await?;
        self.samples += 1;

        self.metric.push(sample);

        if let Some(batch) = self.batcher.as_mut().and_then(|b| b.push(sample)) {
            let observers = registry.observers();
            if !observers.is_empty().await {
                observers.broadcast_json(&batch).await;
            }
        }
        Ok(())
    }

    /// Send the metric message if it is still owed. Returns whether it was sent now.
    async fn send_metric(&mut self, registry: &SessionRegistry) -> bool {
        match self.metric.take_result(self.deps.metric.as_ref(), self.sample_rate) {
            Some(points) => {
                let delivered = registry
                    .observers()
                    .broadcast_control_json(&[StreamEnvelope::metric(points)])
                    .await;
                info!(session = %self.name, observers = delivered, "Metric sent");
                true
            }
            None => false,
        }
    }

    async fn finalize(
        &mut self,
        registry: &SessionRegistry,
        exit: StreamExit,
        cancel: &CancellationToken,
    ) -> SessionReport {
        self.enter(SessionPhase::Finalizing);
        let reached_streaming = self.storage.is_some();
        let observers = registry.observers();
        let mut data_loss = None;

        if reached_streaming {
            if let Some(batch) = self.batcher.as_mut().and_then(SampleBatcher::take_remaining) {
                observers.broadcast_control_json(&batch).await;
            }

            let fraction = self.storage.as_ref().map_or(0.0, |s| s.data_loss_fraction());
            data_loss = Some(fraction);
            observers
                .broadcast_control_json(&[StreamEnvelope::data_loss(fraction)])
                .await;

            self.send_metric(registry).await;

            let wait = self.instructions.wait_for_post_meta && !cancel.is_cancelled();
            if wait {
                self.store_post_meta(registry, cancel).await;
            }
        }

        if let Some(mut storage) = self.storage.take() {
            if let Err(e) = storage.close().await {
                error!(session = %self.name, "Failed to close session storage: {}", e);
            }
        }

        let closed = observers.close_all().await;
        registry.reset().await;
        self.enter(SessionPhase::Idle);

        let report = SessionReport {
            name: self.name.clone(),
            exit,
            samples: self.samples,
            data_loss,
            metric_sent: self.instructions.ift_requested && !self.metric.is_pending(),
        };
        info!(
            session = %report.name,
            exit = ?report.exit,
            samples = report.samples,
            data_loss = ?report.data_loss,
            observers_closed = closed,
            "⏹️  Measurement session finished"
        );
        report
    }

    async fn store_post_meta(&mut self, registry: &SessionRegistry, cancel: &CancellationToken) {
        let settings = self.deps.settings;
        info!(session = %self.name, timeout = ?settings.post_meta_timeout, "Waiting for post-metadata");

        let wait = async {
            loop {
                if let Some(meta) = registry.take_post_meta().await {
                    return Some(meta);
                }
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(settings.post_meta_poll) => {}
                }
            }
        };
        let meta = match settings.post_meta_timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or_else(|_| {
                warn!(session = %self.name, "Post-metadata did not arrive in time");
                None
            }),
            None => wait.await,
        };

        let Some(meta) = meta else { return };
        let Some(storage) = self.storage.as_mut() else { return };
        let written = match serde_json::to_value(&meta) {
            Ok(value) => storage.write_meta("post_metadata", value).await,
            Err(e) => Err(e.into()),
        };
        match written {
            Ok(()) => info!(session = %self.name, "Post-metadata written"),
            Err(e) => error!(session = %self.name, "Failed to write post-metadata: {}", e),
        }
    }
}

async fn next_event(
    stream: &mut dyn SampleStream,
    limit: Duration,
) -> Result<StreamEvent, HolderError> {
    match tokio::time::timeout(limit, stream.next_sample()).await {
        Ok(event) => event,
        Err(_) => Err(HolderError::StreamTimeout(limit.as_secs_f64())),
    }
}
