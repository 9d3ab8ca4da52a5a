//! Derived per-session metric (IFT value)
//!
//! One channel's converted values are accumulated over the whole session and
//! handed to a [`MetricFunction`] once acquisition ends. The result is
//! delivered to observers at most once, through [`MetricAccumulator::take_result`].

use tracing::{debug, warn};

use crate::acquisition::ChannelLayout;
use crate::config::defaults::{
    IFT_MAX_WINDOW_SECS, IFT_MIN_SAMPLE_FRACTION, IFT_MIN_SAMPLE_RATE_HZ, IFT_MIN_WINDOW_SECS,
};
use crate::types::{IftPoint, MeasurementInstructions, Sample};

/// Windowed signal metric over one channel.
pub trait MetricFunction: Send + Sync {
    /// One value per input sample, or `None` if the input is unusable.
    fn compute(&self, values: &[f64], sample_rate: f64, window_seconds: f64) -> Option<Vec<f64>>;

    fn name(&self) -> &'static str;
}

/// Sliding-window RMS deviation from the window mean.
///
/// The window trails the current sample and is shorter at the start of the
/// series until enough samples are available.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowedRmsMetric;

impl MetricFunction for WindowedRmsMetric {
    fn compute(&self, values: &[f64], sample_rate: f64, window_seconds: f64) -> Option<Vec<f64>> {
        if values.is_empty() {
            return None;
        }
        let width = ((window_seconds * sample_rate).round() as usize).max(1);

        let mut sum = Vec::with_capacity(values.len() + 1);
        let mut sum_sq = Vec::with_capacity(values.len() + 1);
        sum.push(0.0);
        sum_sq.push(0.0);
        for v in values {
            sum.push(sum[sum.len() - 1] + v);
            sum_sq.push(sum_sq[sum_sq.len() - 1] + v * v);
        }

        let out = (0..values.len())
            .map(|i| {
                let end = i + 1;
                let start = end.saturating_sub(width);
                let n = (end - start) as f64;
                let mean = (sum[end] - sum[start]) / n;
                let mean_sq = (sum_sq[end] - sum_sq[start]) / n;
                // rounding can push the variance slightly negative
                (mean_sq - mean * mean).max(0.0).sqrt()
            })
            .collect();
        Some(out)
    }

    fn name(&self) -> &'static str {
        "windowed_rms"
    }
}

/// Check the metric preconditions, run it and pair the output with session time.
///
/// `x[i] = t[i] - t[0]` for every timestamp but the last, zipped with the
/// metric output.
pub fn compute_ift_points(
    metric: &dyn MetricFunction,
    timestamps: &[f64],
    values: &[f64],
    sample_rate: f64,
    window_seconds: f64,
) -> Option<Vec<IftPoint>> {
    if (values.len() as f64) <= IFT_MIN_SAMPLE_FRACTION * sample_rate
        || sample_rate < IFT_MIN_SAMPLE_RATE_HZ
        || !(IFT_MIN_WINDOW_SECS..=IFT_MAX_WINDOW_SECS).contains(&window_seconds)
    {
        debug!(
            samples = values.len(),
            sample_rate, window_seconds, "Metric preconditions not met"
        );
        return None;
    }

    let output = metric.compute(values, sample_rate, window_seconds)?;
    let origin = *timestamps.first()?;
    let xs = timestamps[..timestamps.len() - 1].iter().map(|t| t - origin);
    Some(
        xs.zip(output)
            .map(|(x, y)| IftPoint { x, y })
            .collect(),
    )
}

/// Per-session metric state.
#[derive(Debug)]
pub struct MetricAccumulator {
    /// Index of the metric channel in `Sample::values`; `None` when not accumulating.
    index: Option<usize>,
    requested: bool,
    window_seconds: f64,
    timestamps: Vec<f64>,
    values: Vec<f64>,
    delivered: bool,
}

impl MetricAccumulator {
    pub fn new(instructions: &MeasurementInstructions, layout: &ChannelLayout) -> Self {
        let requested = instructions.ift_requested;
        let index = if requested {
            let index = layout.index_of(instructions.ift_channel.slot());
            if index.is_none() {
                warn!(
                    channel = %instructions.ift_channel,
                    "Metric channel is disabled, metric will be empty"
                );
            }
            index
        } else {
            None
        };
        Self {
            index,
            requested,
            window_seconds: instructions.ift_window_seconds(),
            timestamps: Vec::new(),
            values: Vec::new(),
            delivered: false,
        }
    }

    /// Accumulator for a session that never asked for the metric.
    pub fn disabled() -> Self {
        Self {
            index: None,
            requested: false,
            window_seconds: 0.0,
            timestamps: Vec::new(),
            values: Vec::new(),
            delivered: false,
        }
    }

    /// Record a converted, time-normalized sample.
    pub fn push(&mut self, sample: &Sample) {
        if let Some(value) = self.index.and_then(|idx| sample.values.get(idx)) {
            self.timestamps.push(sample.timestamp);
            self.values.push(*value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Requested and not yet delivered.
    pub fn is_pending(&self) -> bool {
        self.requested && !self.delivered
    }

    /// The metric message payload, exactly once per requested session.
    ///
    /// Outer `None`: nothing to deliver (not requested, or already delivered).
    /// `Some(None)`: deliver a null metric because preconditions were not met.
    pub fn take_result(
        &mut self,
        metric: &dyn MetricFunction,
        sample_rate: f64,
    ) -> Option<Option<Vec<IftPoint>>> {
        if !self.is_pending() {
            return None;
        }
        self.delivered = true;
        let points = compute_ift_points(
            metric,
            &self.timestamps,
            &self.values,
            sample_rate,
            self.window_seconds,
        );
        debug!(
            metric = metric.name(),
            samples = self.values.len(),
            points = points.as_ref().map_or(0, Vec::len),
            "Metric computed"
        );
        Some(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::StreamingConfig;
    use crate::types::{ChannelInstruction, IftChannel};

    fn instructions(channel: IftChannel) -> MeasurementInstructions {
        let mut i = MeasurementInstructions::single_channel(1);
        i.third = ChannelInstruction::new(3, None);
        i.ift_requested = true;
        i.ift_channel = channel;
        i
    }

    fn first_third() -> ChannelLayout {
        ChannelLayout::new(&StreamingConfig { first: true, second: false, third: true })
    }

    #[test]
    fn test_rms_of_constant_is_zero() {
        let out = WindowedRmsMetric.compute(&[2.0; 50], 1000.0, 0.01).unwrap();
        assert_eq!(out.len(), 50);
        assert!(out.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_rms_of_square_wave() {
        let values: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let out = WindowedRmsMetric.compute(&values, 1000.0, 0.01).unwrap();
        // full 10-sample windows hold five of each sign: mean 0, rms 1
        assert!((out[99] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_preconditions() {
        let m = WindowedRmsMetric;
        let t: Vec<f64> = (0..700).map(|i| f64::from(i) / 1000.0).collect();
        let v = vec![0.0; 700];
        assert!(compute_ift_points(&m, &t, &v, 1000.0, 0.15).is_some());
        // exactly 0.6 * rate is not enough
        assert!(compute_ift_points(&m, &t[..600], &v[..600], 1000.0, 0.15).is_none());
        assert!(compute_ift_points(&m, &t, &v, 199.0, 0.15).is_none());
        assert!(compute_ift_points(&m, &t, &v, 1000.0, 0.004).is_none());
        assert!(compute_ift_points(&m, &t, &v, 1000.0, 1.01).is_none());
    }

    #[test]
    fn test_points_drop_last_timestamp() {
        let t: Vec<f64> = (0..700).map(|i| 5.0 + f64::from(i) / 1000.0).collect();
        let v = vec![1.0; 700];
        let points = compute_ift_points(&WindowedRmsMetric, &t, &v, 1000.0, 0.15).unwrap();
        assert_eq!(points.len(), 699);
        assert_eq!(points[0].x, 0.0);
        assert!((points[698].x - 0.698).abs() < 1e-9);
    }

    #[test]
    fn test_accumulates_third_channel_at_dense_index() {
        let mut acc = MetricAccumulator::new(&instructions(IftChannel::Third), &first_third());
        acc.push(&Sample::new(0.0, 0, vec![1.0, 30.0]));
        acc.push(&Sample::new(0.1, 1, vec![2.0, 31.0]));
        assert_eq!(acc.values, vec![30.0, 31.0]);
    }

    #[test]
    fn test_disabled_metric_channel_accumulates_nothing() {
        let mut acc = MetricAccumulator::new(&instructions(IftChannel::Second), &first_third());
        acc.push(&Sample::new(0.0, 0, vec![1.0, 30.0]));
        assert!(acc.is_empty());
        assert!(acc.is_pending());
    }

    #[test]
    fn test_take_result_once() {
        let mut acc = MetricAccumulator::new(&instructions(IftChannel::First), &first_third());
        acc.push(&Sample::new(0.0, 0, vec![1.0, 30.0]));
        assert_eq!(acc.take_result(&WindowedRmsMetric, 9523.8), Some(None));
        assert_eq!(acc.take_result(&WindowedRmsMetric, 9523.8), None);
        assert!(!acc.is_pending());
    }

    #[test]
    fn test_not_requested_never_delivers() {
        let mut acc = MetricAccumulator::disabled();
        assert_eq!(acc.take_result(&WindowedRmsMetric, 9523.8), None);
    }
}
