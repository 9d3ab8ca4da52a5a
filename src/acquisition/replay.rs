//! Replay holder: plays back a fixed list of samples.
//!
//! Used for tests and offline reprocessing. The way the stream ends is
//! configurable so every session exit path can be driven deterministically.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::holder::{
    AdcConfiguration, Holder, HolderError, SampleStream, SensorChannelConfig, StreamAux,
    StreamEvent, StreamingConfig,
};
use crate::types::Sample;

/// What happens after the last recorded sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayEnd {
    /// Stream closes.
    #[default]
    Eof,
    /// Holder reports a stream timeout.
    Timeout,
    /// Stream goes silent forever.
    Stall,
    /// Replay again with shifted timestamps, indefinitely.
    Cycle,
}

type FaultFn = Box<dyn Fn() -> HolderError + Send + Sync>;

#[derive(Debug, Default)]
struct Counters {
    adc_writes: AtomicUsize,
    sensor_writes: AtomicUsize,
    streams_opened: AtomicUsize,
    samples_emitted: AtomicUsize,
    resets: AtomicUsize,
}

/// Snapshot of holder interactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub adc_writes: usize,
    pub sensor_writes: usize,
    pub streams_opened: usize,
    pub samples_emitted: usize,
    pub resets: usize,
}

pub struct ReplayHolder {
    samples: Arc<Vec<Sample>>,
    end: ReplayEnd,
    delay: Duration,
    node_name: Option<String>,
    node_name_delay: Duration,
    channel_configuration: bool,
    adc_fault: Option<FaultFn>,
    counters: Arc<Counters>,
}

impl ReplayHolder {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: Arc::new(samples),
            end: ReplayEnd::Eof,
            delay: Duration::ZERO,
            node_name: Some("replay-node".to_string()),
            node_name_delay: Duration::ZERO,
            channel_configuration: true,
            adc_fault: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// `count` samples at `rate_hz` on a holder clock starting at 100 s.
    ///
    /// Raw codes sit around mid-scale and increase slowly; counters wrap at 256.
    pub fn ramp(count: usize, rate_hz: f64, width: usize) -> Vec<Sample> {
        (0..count)
            .map(|i| {
                let t = 100.0 + i as f64 / rate_hz;
                let code = 32_768.0 + (i % 1_000) as f64;
                Sample::new(t, (i % 256) as u8, vec![code; width])
            })
            .collect()
    }

    pub fn ending(mut self, end: ReplayEnd) -> Self {
        self.end = end;
        self
    }

    /// Delay before every sample after the first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `None` makes the node name query fail.
    pub fn with_node_name(mut self, name: Option<&str>) -> Self {
        self.node_name = name.map(str::to_string);
        self
    }

    /// Holder takes this long to answer the node name request.
    pub fn with_node_name_delay(mut self, delay: Duration) -> Self {
        self.node_name_delay = delay;
        self
    }

    /// Reject any channel mapping write.
    pub fn without_channel_configuration(mut self) -> Self {
        self.channel_configuration = false;
        self
    }

    /// Fail every ADC write with the produced error.
    pub fn with_adc_fault(mut self, fault: impl Fn() -> HolderError + Send + Sync + 'static) -> Self {
        self.adc_fault = Some(Box::new(fault));
        self
    }

    pub fn stats(&self) -> ReplayStats {
        let c = &self.counters;
        ReplayStats {
            adc_writes: c.adc_writes.load(Ordering::SeqCst),
            sensor_writes: c.sensor_writes.load(Ordering::SeqCst),
            streams_opened: c.streams_opened.load(Ordering::SeqCst),
            samples_emitted: c.samples_emitted.load(Ordering::SeqCst),
            resets: c.resets.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Holder for ReplayHolder {
    fn source_name(&self) -> &str {
        "replay"
    }

    async fn node_name(&self) -> Result<String, HolderError> {
        if !self.node_name_delay.is_zero() {
            tokio::time::sleep(self.node_name_delay).await;
        }
        self.node_name
            .clone()
            .ok_or_else(|| HolderError::NoResponse("node name".to_string()))
    }

    async fn write_adc_configuration(&self, _config: &AdcConfiguration) -> Result<(), HolderError> {
        self.counters.adc_writes.fetch_add(1, Ordering::SeqCst);
        match &self.adc_fault {
            Some(fault) => Err(fault()),
            None => Ok(()),
        }
    }

    async fn write_sensor_configuration(
        &self,
        config: &SensorChannelConfig,
    ) -> Result<(), HolderError> {
        self.counters.sensor_writes.fetch_add(1, Ordering::SeqCst);
        if self.channel_configuration {
            Ok(())
        } else {
            Err(HolderError::UnsupportedFeature(format!(
                "channel configuration {config}"
            )))
        }
    }

    async fn open_stream(
        &self,
        _config: &StreamingConfig,
    ) -> Result<Box<dyn SampleStream>, HolderError> {
        self.counters.streams_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ReplayStream {
            samples: Arc::clone(&self.samples),
            position: 0,
            emitted: 0,
            time_shift: 0.0,
            end: self.end,
            delay: self.delay,
            counters: Arc::clone(&self.counters),
        }))
    }

    async fn reset(&self) -> Result<(), HolderError> {
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ReplayStream {
    samples: Arc<Vec<Sample>>,
    position: usize,
    emitted: usize,
    time_shift: f64,
    end: ReplayEnd,
    delay: Duration,
    counters: Arc<Counters>,
}

impl ReplayStream {
    /// Timestamp span of one replay pass plus one sample period.
    fn pass_duration(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) if self.samples.len() > 1 => {
                let span = last.timestamp - first.timestamp;
                span + span / (self.samples.len() - 1) as f64
            }
            _ => 1.0,
        }
    }
}

#[async_trait]
impl SampleStream for ReplayStream {
    async fn next_sample(&mut self) -> Result<StreamEvent, HolderError> {
        if self.emitted > 0 {
            if self.delay.is_zero() {
                // Let other tasks (stop requests, observers) run between samples.
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.delay).await;
            }
        }

        if self.position >= self.samples.len() {
            match self.end {
                ReplayEnd::Eof => return Ok(StreamEvent::Eof),
                ReplayEnd::Timeout => return Err(HolderError::StreamTimeout(0.0)),
                ReplayEnd::Stall => std::future::pending::<()>().await,
                ReplayEnd::Cycle if self.samples.is_empty() => return Ok(StreamEvent::Eof),
                ReplayEnd::Cycle => {
                    self.time_shift += self.pass_duration();
                    self.position = 0;
                }
            }
        }

        let mut sample = self.samples[self.position].clone();
        if self.end == ReplayEnd::Cycle {
            sample.timestamp += self.time_shift;
            sample.counter = (self.emitted % 256) as u8;
        }
        self.position += 1;
        self.emitted += 1;
        self.counters.samples_emitted.fetch_add(1, Ordering::SeqCst);

        let backlog = self.samples.len() - self.position;
        Ok(StreamEvent::Sample(sample, StreamAux { backlog }))
    }
}
