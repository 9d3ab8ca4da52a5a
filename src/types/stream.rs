//! Acquisition frames and observer-channel message shapes.

use serde::{Deserialize, Serialize};

/// One acquisition frame from the holder.
///
/// `values` holds one entry per active channel in logical order. The
/// conversion pipeline overwrites raw ADC codes with physical values in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Holder clock (s). Normalized to session time by the coordinator.
    pub timestamp: f64,
    /// Wrapping message counter 0..=255.
    pub counter: u8,
    pub values: Vec<f64>,
}

impl Sample {
    pub fn new(timestamp: f64, counter: u8, values: Vec<f64>) -> Self {
        Self {
            timestamp,
            counter,
            values,
        }
    }
}

/// One derived-metric point: seconds since session start and metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IftPoint {
    pub x: f64,
    pub y: f64,
}

/// Shared envelope of every observer message. Unused fields are `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamEnvelope {
    pub timestamp: Option<f64>,
    pub first: Option<f64>,
    pub second: Option<f64>,
    pub third: Option<f64>,
    pub ift: Option<Vec<IftPoint>>,
    pub counter: Option<u8>,
    pub dataloss: Option<f64>,
}

impl StreamEnvelope {
    /// End-of-session message carrying only the data-loss fraction.
    pub fn data_loss(fraction: f64) -> Self {
        Self {
            dataloss: Some(fraction),
            ..Self::default()
        }
    }

    /// Derived-metric message. `None` means preconditions were not met.
    pub fn metric(points: Option<Vec<IftPoint>>) -> Self {
        Self {
            ift: points,
            ..Self::default()
        }
    }
}

/// Out-of-band error notice sent to observers when streaming fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamNotice {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serializes_every_key() {
        let v = serde_json::to_value(StreamEnvelope::data_loss(0.25)).unwrap();
        let obj = v.as_object().unwrap();
        for key in ["timestamp", "first", "second", "third", "ift", "counter", "dataloss"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(v["dataloss"], 0.25);
        assert!(v["first"].is_null());
        assert!(v["ift"].is_null());
    }

    #[test]
    fn test_metric_message_keeps_null_when_unavailable() {
        let v = serde_json::to_value(StreamEnvelope::metric(None)).unwrap();
        assert!(v["ift"].is_null());
        assert!(v["dataloss"].is_null());

        let points = vec![IftPoint { x: 0.0, y: 1.5 }];
        let v = serde_json::to_value(StreamEnvelope::metric(Some(points))).unwrap();
        assert_eq!(v["ift"][0]["x"], 0.0);
        assert_eq!(v["ift"][0]["y"], 1.5);
    }
}
