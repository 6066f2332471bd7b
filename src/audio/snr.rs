//! Signal-to-noise estimation against a baseline noise profile.

use super::features::{AudioFrame, BaselineProfile, SnrSample};

/// dB offset and span mapping a practical SNR range onto a unit bar.
const RATIO_OFFSET_DB: f64 = 20.0;
const RATIO_SPAN_DB: f64 = 100.0;

/// Compute the SNR of `signal` against `noise`. Pure and infallible: zero
/// noise power yields 0 dB.
pub fn estimate(signal: &AudioFrame, noise: &BaselineProfile) -> SnrSample {
    let signal_values: Vec<f64> = signal.normalized().into_iter().map(f64::from).collect();
    let reference = noise_reference(noise.values(), signal_values.len());

    let signal_power = mean_power(&signal_values);
    let noise_power = mean_power(&reference);

    let db = if noise_power == 0.0 {
        0.0
    } else {
        10.0 * (signal_power / noise_power).log10()
    };

    SnrSample {
        db,
        ratio: display_ratio(db),
        signal_power,
        noise_power,
    }
}

/// Noise vector of exactly `len` values: the baseline truncated when it is
/// long enough, tiled cyclically when it is shorter.
pub fn noise_reference(baseline: &[f32], len: usize) -> Vec<f64> {
    if baseline.is_empty() {
        return vec![0.0; len];
    }
    (0..len)
        .map(|i| f64::from(baseline[i % baseline.len()]))
        .collect()
}

/// Mean squared value; empty input has zero power.
pub fn mean_power(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64
}

/// `clamp((db + 20) / 100, 0, 1)`.
pub fn display_ratio(db: f64) -> f32 {
    ((db + RATIO_OFFSET_DB) / RATIO_SPAN_DB).clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn matches_hand_computed_db() {
        // signal: +-16384 -> +-0.5, power 0.25
        let signal = AudioFrame::new(vec![16384, -16384, 16384, -16384]);
        // noise: 0.05 everywhere, power 0.0025
        let noise = BaselineProfile::from_normalized(vec![0.05; 4]).unwrap();

        let sample = estimate(&signal, &noise);

        assert_close(sample.signal_power, 0.25);
        assert_close(sample.noise_power, 0.05f32 as f64 * 0.05f32 as f64);
        assert_close(sample.db, 10.0 * (0.25 / sample.noise_power).log10());
        assert!((sample.db - 20.0).abs() < 1e-4);
    }

    #[test]
    fn zero_noise_power_is_zero_db() {
        let noise = BaselineProfile::from_normalized(vec![0.0; 16]).unwrap();
        for signal in [vec![0i16; 16], vec![i16::MAX; 16], vec![123, -456, 789]] {
            let sample = estimate(&AudioFrame::new(signal), &noise);
            assert_eq!(sample.db, 0.0);
            assert_eq!(sample.ratio, 0.2);
        }
    }

    #[test]
    fn short_baseline_is_tiled_cyclically() {
        let baseline = [0.1f32, -0.2, 0.3];
        let reference = noise_reference(&baseline, 10);
        assert_eq!(reference.len(), 10);
        for (i, value) in reference.iter().enumerate() {
            assert_eq!(*value, f64::from(baseline[i % baseline.len()]));
        }
    }

    #[test]
    fn long_baseline_is_truncated() {
        let baseline = [0.5f32, 0.25, 0.125, 0.0625];
        assert_eq!(noise_reference(&baseline, 2), vec![0.5, 0.25]);
    }

    #[test]
    fn ratio_is_clamped_and_monotonic() {
        assert_eq!(display_ratio(-40.0), 0.0);
        assert_eq!(display_ratio(-20.0), 0.0);
        assert_eq!(display_ratio(30.0), 0.5);
        assert_eq!(display_ratio(80.0), 1.0);
        assert_eq!(display_ratio(200.0), 1.0);

        let mut previous = display_ratio(-60.0);
        for step in -59..=120 {
            let ratio = display_ratio(step as f64);
            assert!(ratio >= previous);
            assert!((0.0..=1.0).contains(&ratio));
            previous = ratio;
        }
    }

    #[test]
    fn silent_signal_against_noise_is_deeply_negative() {
        let noise = BaselineProfile::from_normalized(vec![0.01; 64]).unwrap();
        let sample = estimate(&AudioFrame::new(vec![0; 64]), &noise);
        assert!(sample.db.is_infinite() && sample.db < 0.0);
        assert_eq!(sample.ratio, 0.0);
    }
}
