//! Acquisition configuration: turns client ADC and channel instructions into
//! holder configuration writes.

use thiserror::Error;
use tracing::{info, warn};

use super::holder::{AdcConfiguration, Holder, HolderError, SensorChannelConfig, StreamingConfig};
use crate::types::{AdcParams, ChannelInstruction};

/// Fatal configuration faults. The session never reaches Streaming.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid ADC parameters: {}", .0.join("; "))]
    InvalidAdc(Vec<String>),

    #[error("ADC configuration failed: {0}")]
    Adc(#[source] HolderError),

    #[error("Sensor channel configuration \u{201c}{config}\u{201d} is not supported by the sensor node: {source}")]
    UnsupportedChannels {
        config: SensorChannelConfig,
        #[source]
        source: HolderError,
    },
}

/// Result of a successful configuration pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSetup {
    pub adc: AdcConfiguration,
    /// Fixed for the whole session.
    pub sample_rate: f64,
    pub channels: SensorChannelConfig,
    pub streaming: StreamingConfig,
}

/// Prime the holder for a session and compute the sample rate.
///
/// ADC parameters outside what the holder can represent are rejected before
/// anything is written. A holder that does not answer the ADC write is tolerated: acquisition
/// continues with whatever configuration the holder already had. A channel
/// mapping the holder cannot do aborts the session.
pub async fn configure(
    holder: &dyn Holder,
    adc_params: &AdcParams,
    channels: [&ChannelInstruction; 3],
) -> Result<AcquisitionSetup, ConfigurationError> {
    let adc = AdcConfiguration::from_params(adc_params);
    adc.validate().map_err(ConfigurationError::InvalidAdc)?;

    match holder.write_adc_configuration(&adc).await {
        Ok(()) => {}
        Err(HolderError::NoResponse(detail)) => {
            warn!(detail = %detail, "No response to ADC configuration, continuing with previous holder settings");
        }
        Err(e) => return Err(ConfigurationError::Adc(e)),
    }

    let sample_rate = adc.sample_rate();
    info!(
        prescaler = adc.prescaler,
        acquisition_time = adc.acquisition_time,
        oversampling_rate = adc.oversampling_rate,
        reference_voltage = adc.reference_voltage,
        "Sample rate: {:.1} Hz",
        sample_rate
    );

    let channel_config = SensorChannelConfig::from_instructions(channels);
    if channel_config.requires_channel_configuration_support() {
        holder
            .write_sensor_configuration(&channel_config)
            .await
            .map_err(|source| ConfigurationError::UnsupportedChannels {
                config: channel_config,
                source,
            })?;
        info!(channels = %channel_config, "Wrote sensor channel configuration");
    }

    Ok(AcquisitionSetup {
        adc,
        sample_rate,
        channels: channel_config,
        streaming: channel_config.streaming(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::replay::ReplayHolder;

    fn channels(a: u8, b: u8, c: u8) -> [ChannelInstruction; 3] {
        [
            ChannelInstruction::new(a, None),
            ChannelInstruction::new(b, None),
            ChannelInstruction::new(c, None),
        ]
    }

    #[tokio::test]
    async fn test_default_configuration() {
        let holder = ReplayHolder::new(Vec::new());
        let ch = channels(1, 0, 0);
        let setup = configure(&holder, &AdcParams::default(), [&ch[0], &ch[1], &ch[2]])
            .await
            .unwrap();
        assert!((setup.sample_rate - 9_523.8).abs() < 0.1);
        assert_eq!(setup.streaming.width(), 1);
        assert_eq!(holder.stats().adc_writes, 1);
        assert_eq!(holder.stats().sensor_writes, 0);
    }

    #[tokio::test]
    async fn test_adc_no_response_is_not_fatal() {
        let holder = ReplayHolder::new(Vec::new())
            .with_adc_fault(|| HolderError::NoResponse("timeout".into()));
        let ch = channels(1, 0, 0);
        let setup = configure(&holder, &AdcParams::default(), [&ch[0], &ch[1], &ch[2]]).await;
        assert!(setup.is_ok());
    }

    #[tokio::test]
    async fn test_adc_disconnect_is_fatal() {
        let holder = ReplayHolder::new(Vec::new())
            .with_adc_fault(|| HolderError::Disconnected("bus off".into()));
        let ch = channels(1, 0, 0);
        let err = configure(&holder, &AdcParams::default(), [&ch[0], &ch[1], &ch[2]])
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Adc(_)));
    }

    #[tokio::test]
    async fn test_invalid_adc_rejected_before_any_write() {
        let holder = ReplayHolder::new(Vec::new());
        let ch = channels(1, 0, 0);
        let params = AdcParams {
            oversampling_rate: Some(0),
            prescaler: Some(u32::MAX),
            ..AdcParams::default()
        };
        let err = configure(&holder, &params, [&ch[0], &ch[1], &ch[2]])
            .await
            .unwrap_err();
        match err {
            ConfigurationError::InvalidAdc(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors.iter().any(|e| e.contains("oversampling_rate")));
                assert!(errors.iter().any(|e| e.contains("prescaler")));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(holder.stats().adc_writes, 0);
    }

    #[tokio::test]
    async fn test_channel_mapping_written_when_needed() {
        let holder = ReplayHolder::new(Vec::new());
        let ch = channels(1, 0, 3);
        let setup = configure(&holder, &AdcParams::default(), [&ch[0], &ch[1], &ch[2]])
            .await
            .unwrap();
        assert_eq!(holder.stats().sensor_writes, 1);
        assert!(setup.streaming.first && !setup.streaming.second && setup.streaming.third);
    }

    #[tokio::test]
    async fn test_unsupported_channel_mapping_is_fatal() {
        let holder = ReplayHolder::new(Vec::new()).without_channel_configuration();
        let ch = channels(1, 2, 3);
        let err = configure(&holder, &AdcParams::default(), [&ch[0], &ch[1], &ch[2]])
            .await
            .unwrap_err();
        match err {
            ConfigurationError::UnsupportedChannels { config, .. } => {
                assert_eq!(config.third, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
