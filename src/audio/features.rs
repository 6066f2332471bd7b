use std::sync::Arc;

use crate::error::{CaptureError, Result};

/// Scale factor mapping signed 16-bit PCM onto [-1.0, 1.0].
pub const PCM_SCALE: f32 = 32768.0;

/// Map one 16-bit sample to its normalized float.
#[inline]
pub fn normalize_sample(sample: i16) -> f32 {
    sample as f32 / PCM_SCALE
}

/// One read's worth of signed 16-bit mono samples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Normalized view, each sample divided by 32768.
    pub fn normalized(&self) -> Vec<f32> {
        self.samples.iter().copied().map(normalize_sample).collect()
    }
}

/// Ambient noise reference, one normalized float per sample slot.
///
/// Cloning is cheap: the values are shared, never mutated after creation.
#[derive(Clone, Debug, PartialEq)]
pub struct BaselineProfile {
    values: Arc<[f32]>,
}

impl BaselineProfile {
    /// Build a profile from already-normalized values. Empty input is rejected
    /// because recording requires a usable reference.
    pub fn from_normalized(values: Vec<f32>) -> Result<Self> {
        if values.is_empty() {
            return Err(CaptureError::BaselinePending);
        }
        Ok(Self {
            values: values.into(),
        })
    }

    /// Build a profile from raw captured samples using the capture-time normalization.
    pub fn from_samples(samples: &[i16]) -> Result<Self> {
        Self::from_normalized(samples.iter().copied().map(normalize_sample).collect())
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// SNR measurement for one live frame.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct SnrSample {
    /// Signal-to-noise ratio in decibels.
    pub db: f64,
    /// Display ratio in [0, 1] derived from `db`.
    pub ratio: f32,
    /// Mean squared power of the live frame.
    pub signal_power: f64,
    /// Mean squared power of the noise reference.
    pub noise_power: f64,
}

/// Display band of an SNR ratio, used to colour meters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnrBand {
    Low,
    Medium,
    High,
}

impl SnrBand {
    pub fn from_ratio(ratio: f32) -> Self {
        if ratio < 0.33 {
            SnrBand::Low
        } else if ratio < 0.66 {
            SnrBand::Medium
        } else {
            SnrBand::High
        }
    }
}

/// Nyquist-folded magnitude spectrum (`window_size / 2` bins).
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct SpectrumFrame {
    pub magnitudes: Vec<f32>,
    pub window_size: usize,
}

impl SpectrumFrame {
    /// Centre frequency of a bin in Hz.
    pub fn bin_frequency(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.window_size as f32
    }

    /// Index and magnitude of the strongest bin, skipping DC.
    pub fn peak_bin(&self) -> Option<(usize, f32)> {
        self.magnitudes
            .iter()
            .copied()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_divides_by_32768() {
        let frame = AudioFrame::new(vec![i16::MIN, 0, 16384, i16::MAX]);
        let norm = frame.normalized();
        assert_eq!(norm[0], -1.0);
        assert_eq!(norm[1], 0.0);
        assert_eq!(norm[2], 0.5);
        assert!(norm[3] < 1.0 && norm[3] > 0.9999);
    }

    #[test]
    fn empty_baseline_is_rejected() {
        assert_eq!(
            BaselineProfile::from_normalized(Vec::new()),
            Err(CaptureError::BaselinePending)
        );
        assert_eq!(
            BaselineProfile::from_samples(&[]),
            Err(CaptureError::BaselinePending)
        );
    }

    #[test]
    fn baseline_from_samples_uses_capture_normalization() {
        let profile = BaselineProfile::from_samples(&[-16384, 8192]).unwrap();
        assert_eq!(profile.values(), &[-0.5, 0.25]);
    }

    #[test]
    fn snr_band_thresholds() {
        assert_eq!(SnrBand::from_ratio(0.0), SnrBand::Low);
        assert_eq!(SnrBand::from_ratio(0.329), SnrBand::Low);
        assert_eq!(SnrBand::from_ratio(0.33), SnrBand::Medium);
        assert_eq!(SnrBand::from_ratio(0.66), SnrBand::High);
    }

    #[test]
    fn peak_bin_skips_dc() {
        let spectrum = SpectrumFrame {
            magnitudes: vec![10.0, 1.0, 3.0, 2.0],
            window_size: 8,
        };
        assert_eq!(spectrum.peak_bin(), Some((2, 3.0)));
        assert_eq!(spectrum.bin_frequency(2, 8000), 2000.0);
    }
}
