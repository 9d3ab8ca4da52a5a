//! System-wide default constants.
//!
//! Hardware constants, session tuning and file layout values, grouped by
//! subsystem.

// ============================================================================
// Server
// ============================================================================

/// HTTP server bind address when neither config nor CLI override it.
pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:33215";

/// Root directory for session files and the sensor catalogue.
pub const DEFAULT_DATA_DIR: &str = "./icodaq";

// ============================================================================
// ADC (holder hardware)
// ============================================================================

pub const DEFAULT_PRESCALER: u32 = 2;
pub const DEFAULT_ACQUISITION_TIME: u32 = 8;
pub const DEFAULT_OVERSAMPLING_RATE: u32 = 64;
pub const DEFAULT_REFERENCE_VOLTAGE: f64 = 3.3;

/// ADC base clock of the holder (Hz).
pub const ADC_CLOCK_HZ: f64 = 38_400_000.0;

/// Fixed conversion overhead added to the acquisition time (clock cycles).
pub const ADC_CONVERSION_CYCLES: u32 = 13;

/// Full-scale raw ADC code (16 bit).
pub const ADC_FULL_SCALE: f64 = 65_535.0;

/// Acquisition time values the holder accepts.
pub const VALID_ACQUISITION_TIMES: [u32; 10] = [1, 2, 3, 4, 8, 16, 32, 64, 128, 256];

/// Largest oversampling rate the holder accepts (must also be a power of two).
pub const MAX_OVERSAMPLING_RATE: u32 = 4_096;

/// Prescaler range accepted by the holder (inclusive).
pub const PRESCALER_RANGE: (u32, u32) = (1, 127);

/// Message counter modulus. Counters wrap 255 -> 0.
pub const COUNTER_MODULUS: u16 = 256;

// ============================================================================
// Measurement session
// ============================================================================

/// Observer push rate (batches per second of acquisition).
pub const DEFAULT_UPDATE_RATE_HZ: u32 = 60;

/// Post-metadata poll interval (ms).
pub const DEFAULT_POST_META_POLL_MS: u64 = 1_000;

/// Post-metadata wait limit (seconds). 0 = wait until it arrives.
pub const DEFAULT_POST_META_TIMEOUT_SECS: u64 = 0;

/// Session name timestamp format, appended after `__` to a client name.
pub const SESSION_NAME_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Sample batches queued per WebSocket observer before sends fail.
pub const OBSERVER_QUEUE_DEPTH: usize = 256;

/// End-of-session messages (notices, final batch, data loss, metric, close)
/// queued per observer, separate from the sample batches.
pub const OBSERVER_CONTROL_DEPTH: usize = 8;

/// State-channel broadcast buffer (messages). Lagging subscribers skip ahead.
pub const STATE_CHANNEL_CAPACITY: usize = 32;

// ============================================================================
// Derived metric (IFT)
// ============================================================================

/// The session must hold more than this fraction of one second of samples.
pub const IFT_MIN_SAMPLE_FRACTION: f64 = 0.6;

/// Lowest sample rate the metric is meaningful for (Hz).
pub const IFT_MIN_SAMPLE_RATE_HZ: f64 = 200.0;

/// Accepted window width range (seconds).
pub const IFT_MIN_WINDOW_SECS: f64 = 0.005;
pub const IFT_MAX_WINDOW_SECS: f64 = 1.0;

// ============================================================================
// Storage
// ============================================================================

/// Rows buffered per compressed column chunk.
pub const STORAGE_CHUNK_ROWS: usize = 4_096;

/// zstd level for column chunks.
pub const STORAGE_ZSTD_LEVEL: i32 = 3;

pub const SESSION_FILE_EXTENSION: &str = "icod";

/// Sub-directory of the data dir holding the sensor catalogue.
pub const CONFIG_SUBDIR: &str = "config";

pub const SENSOR_CATALOGUE_FILE: &str = "sensors.toml";

// ============================================================================
// Holder
// ============================================================================

/// Seconds without a sample before the stream is declared timed out.
pub const DEFAULT_STREAM_TIMEOUT_SECS: f64 = 5.0;

/// Node name reported by the simulated holder.
pub const DEFAULT_HOLDER_NAME: &str = "sim-holder";

/// Tool name used when the holder cannot report its own.
pub const FALLBACK_TOOL_NAME: &str = "noname";

/// Dominant vibration frequency of the simulated signal (Hz).
pub const SIM_SIGNAL_FREQUENCY_HZ: f64 = 120.0;

/// Gaussian noise on simulated raw codes (ADC counts, 1 sigma).
pub const SIM_NOISE_STD_COUNTS: f64 = 150.0;
