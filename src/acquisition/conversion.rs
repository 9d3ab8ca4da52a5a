//! Raw ADC code to physical unit conversion.
//!
//! The holder packs only active channels into a sample, in logical order, so
//! with `{first, third}` active the third channel's value sits at index 1.
//! [`ChannelLayout`] captures that mapping once per session.

use std::sync::Arc;

use super::holder::StreamingConfig;
use crate::config::defaults::ADC_FULL_SCALE;
use crate::types::{Sample, Sensor};

/// Conversion branch, decided once at session setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    /// First channel disabled: samples pass through unconverted.
    NoPrimary,
    FirstOnly,
    FirstSecond,
    FirstThird,
    AllThree,
}

/// Which logical slots are active and where their values sit in a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    active: [bool; 3],
}

impl ChannelLayout {
    pub fn new(streaming: &StreamingConfig) -> Self {
        Self {
            active: streaming.active(),
        }
    }

    pub fn kind(&self) -> LayoutKind {
        match self.active {
            [false, _, _] => LayoutKind::NoPrimary,
            [true, false, false] => LayoutKind::FirstOnly,
            [true, true, false] => LayoutKind::FirstSecond,
            [true, false, true] => LayoutKind::FirstThird,
            [true, true, true] => LayoutKind::AllThree,
        }
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.active.get(slot).copied().unwrap_or(false)
    }

    /// Position of a logical slot (0 = first) in `Sample::values`.
    pub fn index_of(&self, slot: usize) -> Option<usize> {
        if !self.is_active(slot) {
            return None;
        }
        Some(self.active[..slot].iter().filter(|a| **a).count())
    }

    /// Read the three logical slots from a sample; inactive slots are `None`.
    pub fn slots(&self, sample: &Sample) -> [Option<f64>; 3] {
        [0, 1, 2].map(|slot| {
            self.index_of(slot)
                .and_then(|idx| sample.values.get(idx).copied())
        })
    }
}

/// Per-session conversion plan.
#[derive(Debug, Clone)]
pub struct ConversionPipeline {
    layout: ChannelLayout,
    voltage_scaling: f64,
    /// (value index, sensor) pairs applied to every sample.
    plan: Vec<(usize, Arc<Sensor>)>,
}

impl ConversionPipeline {
    /// `sensors` are the resolved sensors for (first, second, third).
    pub fn new(
        layout: ChannelLayout,
        sensors: &[Option<Arc<Sensor>>; 3],
        reference_voltage: f64,
    ) -> Self {
        let slots: &[usize] = match layout.kind() {
            LayoutKind::NoPrimary => &[],
            LayoutKind::FirstOnly => &[0],
            LayoutKind::FirstSecond => &[0, 1],
            LayoutKind::FirstThird => &[0, 2],
            LayoutKind::AllThree => &[0, 1, 2],
        };
        let plan = slots
            .iter()
            .filter_map(|&slot| {
                let idx = layout.index_of(slot)?;
                let sensor = sensors[slot].as_ref()?;
                Some((idx, Arc::clone(sensor)))
            })
            .collect();

        Self {
            layout,
            voltage_scaling: reference_voltage / ADC_FULL_SCALE,
            plan,
        }
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// Volts per ADC count.
    pub fn voltage_scaling(&self) -> f64 {
        self.voltage_scaling
    }

    /// Overwrite raw codes with physical values, in place.
    pub fn convert(&self, sample: &mut Sample) {
        for (idx, sensor) in &self.plan {
            if let Some(value) = sample.values.get_mut(*idx) {
                *value = sensor.to_physical(*value * self.voltage_scaling);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::default_sensors;

    fn layout(a: bool, b: bool, c: bool) -> ChannelLayout {
        ChannelLayout::new(&StreamingConfig { first: a, second: b, third: c })
    }

    fn sensors() -> [Option<Arc<Sensor>>; 3] {
        let d = default_sensors();
        // Distinct ranges so a wrong mapping shows up in the numbers.
        [
            Some(Arc::new(d[0].clone())), // +-100 g
            Some(Arc::new(d[1].clone())), // +-40 g
            Some(Arc::new(d[4].clone())), // temperature
        ]
    }

    #[test]
    fn test_layout_kinds_and_dense_indices() {
        assert_eq!(layout(true, false, false).kind(), LayoutKind::FirstOnly);
        assert_eq!(layout(true, true, false).kind(), LayoutKind::FirstSecond);
        assert_eq!(layout(true, true, true).kind(), LayoutKind::AllThree);
        assert_eq!(layout(false, true, true).kind(), LayoutKind::NoPrimary);

        let sparse = layout(true, false, true);
        assert_eq!(sparse.kind(), LayoutKind::FirstThird);
        assert_eq!(sparse.index_of(0), Some(0));
        assert_eq!(sparse.index_of(1), None);
        assert_eq!(sparse.index_of(2), Some(1));
    }

    #[test]
    fn test_first_third_uses_third_sensor_at_index_one() {
        let s = sensors();
        let pipeline = ConversionPipeline::new(layout(true, false, true), &s, 3.3);
        let mut sample = Sample::new(0.0, 0, vec![10.0, 20.0]);
        pipeline.convert(&mut sample);

        let scale = 3.3 / 65_535.0;
        let expected_first = s[0].as_ref().unwrap().to_physical(10.0 * scale);
        let expected_third = s[2].as_ref().unwrap().to_physical(20.0 * scale);
        let wrong_second = s[1].as_ref().unwrap().to_physical(20.0 * scale);
        assert!((sample.values[0] - expected_first).abs() < 1e-12);
        assert!((sample.values[1] - expected_third).abs() < 1e-12);
        assert!((sample.values[1] - wrong_second).abs() > 1.0);
    }

    #[test]
    fn test_all_three_converted_in_order() {
        let s = sensors();
        let pipeline = ConversionPipeline::new(layout(true, true, true), &s, 3.3);
        let mut sample = Sample::new(0.0, 0, vec![32_768.0; 3]);
        pipeline.convert(&mut sample);
        let volts = 32_768.0 * 3.3 / 65_535.0;
        for (i, sensor) in s.iter().enumerate() {
            let expected = sensor.as_ref().unwrap().to_physical(volts);
            assert!((sample.values[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_no_primary_leaves_values_untouched() {
        let pipeline = ConversionPipeline::new(layout(false, true, false), &sensors(), 3.3);
        let mut sample = Sample::new(0.0, 0, vec![1234.0]);
        pipeline.convert(&mut sample);
        assert_eq!(sample.values, vec![1234.0]);
    }

    #[test]
    fn test_full_scale_code_maps_to_reference_voltage() {
        let pipeline = ConversionPipeline::new(layout(true, false, false), &sensors(), 3.3);
        assert!((pipeline.voltage_scaling() * 65_535.0 - 3.3).abs() < 1e-12);
    }

    #[test]
    fn test_slots_read_back_by_logical_channel() {
        let sparse = layout(true, false, true);
        let sample = Sample::new(0.0, 0, vec![1.0, 3.0]);
        assert_eq!(sparse.slots(&sample), [Some(1.0), None, Some(3.0)]);
    }
}
