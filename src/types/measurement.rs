//! Client-facing measurement request and status types.

use serde::{Deserialize, Serialize};

use crate::config::defaults::{
    DEFAULT_ACQUISITION_TIME, DEFAULT_OVERSAMPLING_RATE, DEFAULT_PRESCALER,
    DEFAULT_REFERENCE_VOLTAGE,
};

// ============================================================================
// Channels
// ============================================================================

/// One logical channel slot of a measurement request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInstruction {
    /// Hardware channel number, 0 = disabled.
    pub channel_number: u8,
    #[serde(default)]
    pub sensor_id: Option<String>,
}

impl ChannelInstruction {
    pub fn new(channel_number: u8, sensor_id: Option<&str>) -> Self {
        Self {
            channel_number,
            sensor_id: sensor_id.map(str::to_string),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.channel_number > 0
    }
}

/// Which logical channel feeds the derived metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IftChannel {
    #[default]
    First,
    Second,
    Third,
}

impl IftChannel {
    /// Slot position among (first, second, third).
    pub fn slot(self) -> usize {
        match self {
            IftChannel::First => 0,
            IftChannel::Second => 1,
            IftChannel::Third => 2,
        }
    }
}

impl std::fmt::Display for IftChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IftChannel::First => write!(f, "first"),
            IftChannel::Second => write!(f, "second"),
            IftChannel::Third => write!(f, "third"),
        }
    }
}

// ============================================================================
// ADC
// ============================================================================

/// Requested ADC parameters; unset fields fall back to the holder defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdcParams {
    #[serde(default)]
    pub prescaler: Option<u32>,
    #[serde(default)]
    pub acquisition_time: Option<u32>,
    #[serde(default)]
    pub oversampling_rate: Option<u32>,
    #[serde(default)]
    pub reference_voltage: Option<f64>,
}

impl AdcParams {
    pub fn prescaler(&self) -> u32 {
        self.prescaler.unwrap_or(DEFAULT_PRESCALER)
    }

    pub fn acquisition_time(&self) -> u32 {
        self.acquisition_time.unwrap_or(DEFAULT_ACQUISITION_TIME)
    }

    pub fn oversampling_rate(&self) -> u32 {
        self.oversampling_rate.unwrap_or(DEFAULT_OVERSAMPLING_RATE)
    }

    pub fn reference_voltage(&self) -> f64 {
        self.reference_voltage.unwrap_or(DEFAULT_REFERENCE_VOLTAGE)
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Free-form metadata attached before or after a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// Instructions
// ============================================================================

fn default_ift_window_ms() -> u32 {
    150
}

/// Immutable description of one measurement session as requested by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementInstructions {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Time limit in seconds. `None` runs until stopped.
    #[serde(default)]
    pub time: Option<f64>,
    pub first: ChannelInstruction,
    #[serde(default)]
    pub second: ChannelInstruction,
    #[serde(default)]
    pub third: ChannelInstruction,
    #[serde(default)]
    pub ift_requested: bool,
    #[serde(default)]
    pub ift_channel: IftChannel,
    /// Metric window width in milliseconds.
    #[serde(default = "default_ift_window_ms")]
    pub ift_window_width: u32,
    #[serde(default)]
    pub adc: AdcParams,
    #[serde(default)]
    pub meta: Option<Metadata>,
    #[serde(default)]
    pub wait_for_post_meta: bool,
}

impl MeasurementInstructions {
    /// Minimal single-channel request, mostly useful in tests.
    pub fn single_channel(channel_number: u8) -> Self {
        Self {
            name: None,
            mac_address: None,
            time: None,
            first: ChannelInstruction::new(channel_number, None),
            second: ChannelInstruction::disabled(),
            third: ChannelInstruction::disabled(),
            ift_requested: false,
            ift_channel: IftChannel::First,
            ift_window_width: default_ift_window_ms(),
            adc: AdcParams::default(),
            meta: None,
            wait_for_post_meta: false,
        }
    }

    /// Channel slots in logical order (first, second, third).
    pub fn channels(&self) -> [&ChannelInstruction; 3] {
        [&self.first, &self.second, &self.third]
    }

    /// Effective time limit. Non-positive or non-finite limits mean "until stopped".
    pub fn time_limit(&self) -> Option<f64> {
        self.time.filter(|t| t.is_finite() && *t > 0.0)
    }

    pub fn ift_window_seconds(&self) -> f64 {
        f64::from(self.ift_window_width) / 1000.0
    }
}

// ============================================================================
// Status
// ============================================================================

/// Snapshot of the session registry as reported to clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementStatus {
    pub running: bool,
    pub name: Option<String>,
    pub start_time: Option<String>,
    pub tool_name: Option<String>,
    pub instructions: Option<MeasurementInstructions>,
}

/// Response to control requests such as start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub message: String,
    pub data: MeasurementStatus,
}

/// Disk capacity of the data directory in GB. `None` where unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskCapacity {
    pub total: Option<f64>,
    pub available: Option<f64>,
}

/// Whole-system state pushed on the state channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub can_ready: bool,
    pub disk_capacity: DiskCapacity,
    pub measurement_status: MeasurementStatus,
}
