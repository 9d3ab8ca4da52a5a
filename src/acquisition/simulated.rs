//! Simulated holder for running the service without CAN hardware.
//!
//! Produces mid-scale raw ADC codes carrying a sine vibration plus Gaussian
//! noise, paced in real time at the sample rate of the last ADC write.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

use super::holder::{
    AdcConfiguration, Holder, HolderError, SampleStream, SensorChannelConfig, StreamAux,
    StreamEvent, StreamingConfig,
};
use crate::config::defaults::ADC_FULL_SCALE;
use crate::config::HolderConfig;
use crate::types::{AdcParams, Sample};

/// Wake-up period of the generator; samples are produced in blocks.
const TICK: Duration = Duration::from_millis(10);

pub struct SimulatedHolder {
    name: String,
    signal_frequency_hz: f64,
    noise_std_counts: f64,
    adc: Mutex<AdcConfiguration>,
}

impl SimulatedHolder {
    pub fn new(config: &HolderConfig) -> Self {
        Self {
            name: config.name.clone(),
            signal_frequency_hz: config.signal_frequency_hz,
            noise_std_counts: config.noise_std_counts,
            adc: Mutex::new(AdcConfiguration::from_params(&AdcParams::default())),
        }
    }

    fn current_adc(&self) -> AdcConfiguration {
        *self.adc.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Holder for SimulatedHolder {
    fn source_name(&self) -> &str {
        "simulated"
    }

    async fn node_name(&self) -> Result<String, HolderError> {
        Ok(self.name.clone())
    }

    async fn write_adc_configuration(&self, config: &AdcConfiguration) -> Result<(), HolderError> {
        config
            .validate()
            .map_err(|errors| HolderError::InvalidConfiguration(errors.join("; ")))?;
        *self.adc.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = *config;
        debug!(rate = config.sample_rate(), "Simulated ADC configured");
        Ok(())
    }

    async fn write_sensor_configuration(
        &self,
        config: &SensorChannelConfig,
    ) -> Result<(), HolderError> {
        debug!(channels = %config, "Simulated channel mapping accepted");
        Ok(())
    }

    async fn open_stream(
        &self,
        config: &StreamingConfig,
    ) -> Result<Box<dyn SampleStream>, HolderError> {
        let adc = self.current_adc();
        let noise = Normal::new(0.0, self.noise_std_counts.max(f64::MIN_POSITIVE))
            .map_err(|e| HolderError::InvalidConfiguration(e.to_string()))?;
        info!(
            rate = adc.sample_rate(),
            width = config.width(),
            "Simulated stream opened"
        );
        Ok(Box::new(SimulatedStream {
            sample_rate: adc.sample_rate(),
            width: config.width(),
            frequency: self.signal_frequency_hz,
            noise,
            rng: StdRng::from_entropy(),
            started: Instant::now(),
            clock_origin: 1_000.0,
            produced: 0,
            pending: VecDeque::new(),
        }))
    }

    async fn reset(&self) -> Result<(), HolderError> {
        *self.adc.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
            AdcConfiguration::from_params(&AdcParams::default());
        info!("Simulated holder reset");
        Ok(())
    }
}

struct SimulatedStream {
    sample_rate: f64,
    width: usize,
    frequency: f64,
    noise: Normal<f64>,
    rng: StdRng,
    started: Instant,
    /// Holder clock value at stream start (s).
    clock_origin: f64,
    produced: u64,
    pending: VecDeque<Sample>,
}

impl SimulatedStream {
    fn generate(&mut self, index: u64) -> Sample {
        let t = index as f64 / self.sample_rate;
        let mid = ADC_FULL_SCALE / 2.0;
        let amplitude = ADC_FULL_SCALE / 8.0;
        let values = (0..self.width)
            .map(|ch| {
                let phase = ch as f64 * TAU / 3.0;
                let v = mid + amplitude * (TAU * self.frequency * t + phase).sin()
                    + self.noise.sample(&mut self.rng);
                v.clamp(0.0, ADC_FULL_SCALE)
            })
            .collect();
        Sample::new(self.clock_origin + t, (index % 256) as u8, values)
    }

    /// Top up the queue with every sample due by now.
    fn catch_up(&mut self) {
        let due = (self.started.elapsed().as_secs_f64() * self.sample_rate) as u64;
        while self.produced < due {
            let sample = self.generate(self.produced);
            self.pending.push_back(sample);
            self.produced += 1;
        }
    }
}

#[async_trait]
impl SampleStream for SimulatedStream {
    async fn next_sample(&mut self) -> Result<StreamEvent, HolderError> {
        loop {
            if let Some(sample) = self.pending.pop_front() {
                let aux = StreamAux {
                    backlog: self.pending.len(),
                };
                return Ok(StreamEvent::Sample(sample, aux));
            }
            tokio::time::sleep(TICK).await;
            self.catch_up();
        }
    }
}
