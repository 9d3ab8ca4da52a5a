//! Holder hardware boundary.
//!
//! Everything the session core needs from the CAN holder SDK: ADC and
//! channel configuration writes, a sample stream, node identity and reset.
//! Real hardware, the simulator and test replays all sit behind [`Holder`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::defaults::{
    ADC_CLOCK_HZ, ADC_CONVERSION_CYCLES, MAX_OVERSAMPLING_RATE, PRESCALER_RANGE,
    VALID_ACQUISITION_TIMES,
};
use crate::types::{AdcParams, ChannelInstruction, Sample};

/// Holder communication errors
#[derive(Debug, Error)]
pub enum HolderError {
    #[error("Holder did not respond: {0}")]
    NoResponse(String),

    #[error("Unsupported by holder: {0}")]
    UnsupportedFeature(String),

    #[error("Timed out waiting for stream data after {0:.1}s")]
    StreamTimeout(f64),

    #[error("Holder disconnected: {0}")]
    Disconnected(String),

    #[error("Invalid holder configuration: {0}")]
    InvalidConfiguration(String),
}

// ============================================================================
// ADC configuration
// ============================================================================

/// Fully resolved ADC register values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdcConfiguration {
    pub prescaler: u32,
    pub acquisition_time: u32,
    pub oversampling_rate: u32,
    pub reference_voltage: f64,
}

impl AdcConfiguration {
    pub fn from_params(params: &AdcParams) -> Self {
        Self {
            prescaler: params.prescaler(),
            acquisition_time: params.acquisition_time(),
            oversampling_rate: params.oversampling_rate(),
            reference_voltage: params.reference_voltage(),
        }
    }

    /// Samples per second produced by this configuration.
    ///
    /// `clock / ((prescaler + 1) * (acquisition_time + 13) * oversampling_rate)`
    ///
    /// Only meaningful for a configuration that passes [`validate`](Self::validate);
    /// an oversampling rate of 0 yields an infinite rate.
    pub fn sample_rate(&self) -> f64 {
        let cycles = (f64::from(self.prescaler) + 1.0)
            * (f64::from(self.acquisition_time) + f64::from(ADC_CONVERSION_CYCLES))
            * f64::from(self.oversampling_rate);
        ADC_CLOCK_HZ / cycles
    }

    /// Check the values against what the holder can represent.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let (lo, hi) = PRESCALER_RANGE;
        if !(lo..=hi).contains(&self.prescaler) {
            errors.push(format!(
                "prescaler must be within {lo}..={hi} (got {})",
                self.prescaler
            ));
        }
        if !VALID_ACQUISITION_TIMES.contains(&self.acquisition_time) {
            errors.push(format!(
                "acquisition_time must be one of {VALID_ACQUISITION_TIMES:?} (got {})",
                self.acquisition_time
            ));
        }
        if !self.oversampling_rate.is_power_of_two() || self.oversampling_rate > MAX_OVERSAMPLING_RATE {
            errors.push(format!(
                "oversampling_rate must be a power of two <= {MAX_OVERSAMPLING_RATE} (got {})",
                self.oversampling_rate
            ));
        }
        if !self.reference_voltage.is_finite() || self.reference_voltage <= 0.0 {
            errors.push(format!(
                "reference_voltage must be positive (got {})",
                self.reference_voltage
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ============================================================================
// Channel configuration
// ============================================================================

/// Hardware channel numbers for the three logical slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorChannelConfig {
    pub first: u8,
    pub second: u8,
    pub third: u8,
}

impl SensorChannelConfig {
    pub fn from_instructions(channels: [&ChannelInstruction; 3]) -> Self {
        Self {
            first: channels[0].channel_number,
            second: channels[1].channel_number,
            third: channels[2].channel_number,
        }
    }

    /// Holders without channel mapping only understand "off" (0) and the
    /// default channel (1) in each slot.
    pub fn requires_channel_configuration_support(&self) -> bool {
        [self.first, self.second, self.third].iter().any(|&c| c > 1)
    }

    pub fn streaming(&self) -> StreamingConfig {
        StreamingConfig {
            first: self.first > 0,
            second: self.second > 0,
            third: self.third > 0,
        }
    }
}

impl std::fmt::Display for SensorChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "M1: {}, M2: {}, M3: {}", self.first, self.second, self.third)
    }
}

/// Which logical slots the stream carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub first: bool,
    pub second: bool,
    pub third: bool,
}

impl StreamingConfig {
    pub fn active(&self) -> [bool; 3] {
        [self.first, self.second, self.third]
    }

    /// Number of values in each sample.
    pub fn width(&self) -> usize {
        self.active().iter().filter(|a| **a).count()
    }
}

// ============================================================================
// Stream
// ============================================================================

/// Per-sample side information from the holder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamAux {
    /// Frames queued in the holder driver behind this one.
    pub backlog: usize,
}

/// Events produced by a sample stream.
#[derive(Debug)]
pub enum StreamEvent {
    Sample(Sample, StreamAux),
    /// The holder closed the stream.
    Eof,
}

/// Live sample stream. Dropping it stops streaming on the holder.
#[async_trait]
pub trait SampleStream: Send {
    async fn next_sample(&mut self) -> Result<StreamEvent, HolderError>;
}

/// The measurement holder as seen by the session core.
#[async_trait]
pub trait Holder: Send + Sync + 'static {
    /// Human-readable name for logging (e.g. "simulated", "replay").
    fn source_name(&self) -> &str;

    /// Node name of the attached sensor node, reported as the tool name.
    async fn node_name(&self) -> Result<String, HolderError>;

    /// Whether the holder link is up.
    async fn is_ready(&self) -> bool {
        true
    }

    async fn write_adc_configuration(&self, config: &AdcConfiguration) -> Result<(), HolderError>;

    async fn write_sensor_configuration(
        &self,
        config: &SensorChannelConfig,
    ) -> Result<(), HolderError>;

    async fn open_stream(
        &self,
        config: &StreamingConfig,
    ) -> Result<Box<dyn SampleStream>, HolderError>;

    /// Reset the holder hardware.
    async fn reset(&self) -> Result<(), HolderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sample_rate() {
        let adc = AdcConfiguration::from_params(&AdcParams::default());
        // 38.4 MHz / (3 * 21 * 64)
        assert!((adc.sample_rate() - 9_523.809_523_809_524).abs() < 1e-6);
        assert!(adc.validate().is_ok());
    }

    #[test]
    fn test_sample_rate_is_pure_function_of_params() {
        let params = AdcParams {
            prescaler: Some(4),
            acquisition_time: Some(16),
            oversampling_rate: Some(32),
            reference_voltage: Some(1.8),
        };
        let a = AdcConfiguration::from_params(&params);
        let b = AdcConfiguration::from_params(&params);
        assert_eq!(a.sample_rate(), b.sample_rate());
        assert!((a.sample_rate() - 38_400_000.0 / (5.0 * 29.0 * 32.0)).abs() < 1e-9);
    }

    #[test]
    fn test_sample_rate_with_extreme_register_values() {
        let adc = AdcConfiguration {
            prescaler: u32::MAX,
            acquisition_time: u32::MAX,
            oversampling_rate: 1,
            reference_voltage: 3.3,
        };
        let rate = adc.sample_rate();
        assert!(rate.is_finite() && rate > 0.0);
        assert!(adc.validate().is_err());
    }

    #[test]
    fn test_validate_reports_each_bad_field() {
        let adc = AdcConfiguration {
            prescaler: 0,
            acquisition_time: 5,
            oversampling_rate: 48,
            reference_voltage: 0.0,
        };
        assert_eq!(adc.validate().unwrap_err().len(), 4);
    }

    #[test]
    fn test_channel_configuration_support_needed_above_one() {
        let plain = SensorChannelConfig { first: 1, second: 0, third: 1 };
        assert!(!plain.requires_channel_configuration_support());
        let mapped = SensorChannelConfig { first: 1, second: 0, third: 3 };
        assert!(mapped.requires_channel_configuration_support());
        assert_eq!(mapped.streaming().width(), 2);
        assert_eq!(mapped.to_string(), "M1: 1, M2: 0, M3: 3");
    }
}
