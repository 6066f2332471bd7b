use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use super::features::{AudioFrame, BaselineProfile, SpectrumFrame};
use super::snr;
use crate::error::{CaptureError, Result};

/// Forward FFT magnitude analyzer. Keeps one planner so repeated windows of
/// the same size reuse the cached plan.
pub struct SpectralAnalyzer {
    planner: FftPlanner<f32>,
    scratch: Vec<Complex<f32>>,
}

impl SpectralAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            scratch: Vec::new(),
        }
    }

    /// Magnitude spectrum of `frame` zero-padded or truncated to `window_size`.
    /// Returns the first `window_size / 2` bins.
    pub fn analyze(&mut self, frame: &AudioFrame, window_size: usize) -> Result<SpectrumFrame> {
        if window_size == 0 || !window_size.is_power_of_two() {
            return Err(CaptureError::InvalidWindowSize(window_size));
        }

        // Real input: imaginary parts start at zero.
        self.scratch.clear();
        self.scratch.extend(
            frame
                .normalized()
                .into_iter()
                .take(window_size)
                .map(|s| Complex::new(s, 0.0)),
        );
        self.scratch.resize(window_size, Complex::new(0.0, 0.0));

        let fft = self.planner.plan_fft_forward(window_size);
        fft.process(&mut self.scratch);

        let magnitudes = self.scratch[..window_size / 2]
            .iter()
            .map(|c| (c.re * c.re + c.im * c.im).sqrt())
            .collect();

        Ok(SpectrumFrame {
            magnitudes,
            window_size,
        })
    }
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-frame result of an offline dump analysis.
#[derive(Clone, Debug, serde::Serialize)]
pub struct FrameReport {
    pub index: usize,
    pub snr_db: f64,
    pub ratio: f32,
    pub peak_hz: Option<f32>,
}

/// Summary over all frames of a dump.
#[derive(Clone, Debug, serde::Serialize)]
pub struct DumpReport {
    pub frames: Vec<FrameReport>,
    pub mean_db: f64,
    pub min_db: f64,
    pub max_db: f64,
}

/// Replay a raw capture through the SNR and spectrum stages, splitting it
/// into `frame_len`-sample frames like the live loop would have read them.
pub fn analyze_dump(
    samples: &[i16],
    baseline: &BaselineProfile,
    frame_len: usize,
    window_size: usize,
    sample_rate: u32,
) -> Result<DumpReport> {
    if window_size == 0 || !window_size.is_power_of_two() {
        return Err(CaptureError::InvalidWindowSize(window_size));
    }
    let frame_len = frame_len.max(1);

    let frames: Vec<FrameReport> = samples
        .par_chunks(frame_len)
        .enumerate()
        .map(|(index, chunk)| {
            let frame = AudioFrame::new(chunk.to_vec());
            let sample = snr::estimate(&frame, baseline);

            // Per-task analyzer (rayon-safe)
            let mut analyzer = SpectralAnalyzer::new();
            let peak_hz = analyzer
                .analyze(&frame, window_size)
                .ok()
                .and_then(|spectrum| {
                    spectrum
                        .peak_bin()
                        .filter(|(_, magnitude)| *magnitude > 0.0)
                        .map(|(bin, _)| spectrum.bin_frequency(bin, sample_rate))
                });

            FrameReport {
                index,
                snr_db: sample.db,
                ratio: sample.ratio,
                peak_hz,
            }
        })
        .collect();

    let finite: Vec<f64> = frames
        .iter()
        .map(|f| f.snr_db)
        .filter(|db| db.is_finite())
        .collect();
    let mean_db = if finite.is_empty() {
        0.0
    } else {
        finite.iter().sum::<f64>() / finite.len() as f64
    };
    // An empty dump summarizes to zeros like the mean.
    let (min_db, max_db) = if frames.is_empty() {
        (0.0, 0.0)
    } else {
        frames.iter().map(|f| f.snr_db).fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), db| {
            (lo.min(db), hi.max(db))
        })
    };

    log::info!(
        "Analyzed {} frames: mean={:.2} dB, min={:.2} dB, max={:.2} dB",
        frames.len(),
        mean_db,
        min_db,
        max_db
    );

    Ok(DumpReport {
        frames,
        mean_db,
        min_db,
        max_db,
    })
}
