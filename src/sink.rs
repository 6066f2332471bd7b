//! Display collaborators fed by the capture engine.

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write;

use crate::audio::features::{
    normalize_sample, AudioFrame, BaselineProfile, SnrBand, SnrSample, SpectrumFrame,
};

/// Receiver of capture results. Called from the capture thread, so
/// implementations must return quickly. Every method defaults to a no-op;
/// graph-only or SNR-only displays implement just what they show.
pub trait DisplaySink: Send + Sync {
    fn on_audio_frame(&self, _frame: AudioFrame) {}

    fn on_baseline_recorded(&self, _profile: BaselineProfile) {}

    fn on_snr_computed(&self, _sample: SnrSample) {}

    fn on_spectrum(&self, _spectrum: SpectrumFrame) {}
}

/// Sink that ignores everything.
pub struct NullSink;

impl DisplaySink for NullSink {}

/// Points kept by a scrolling amplitude graph.
pub const GRAPH_POINTS: usize = 500;

/// Rolling window of the most recent normalized samples for a waveform graph.
#[derive(Debug, Clone)]
pub struct GraphWindow {
    points: VecDeque<f32>,
    capacity: usize,
}

impl GraphWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push_frame(&mut self, frame: &AudioFrame) {
        for &sample in frame.samples() {
            self.points.push_back(normalize_sample(sample));
        }
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    pub fn points(&self) -> impl Iterator<Item = f32> + '_ {
        self.points.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Largest absolute value currently shown.
    pub fn peak(&self) -> f32 {
        self.points.iter().map(|p| p.abs()).fold(0.0, f32::max)
    }
}

impl Default for GraphWindow {
    fn default() -> Self {
        Self::new(GRAPH_POINTS)
    }
}

struct TerminalState {
    graph: GraphWindow,
    band: Option<SnrBand>,
    snr_text: String,
    peak_text: String,
}

/// Live SNR bar on the terminal.
pub struct TerminalSink {
    bar: ProgressBar,
    sample_rate: u32,
    state: Mutex<TerminalState>,
}

impl TerminalSink {
    pub fn new(sample_rate: u32) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(style_for(SnrBand::Low));
        Self {
            bar,
            sample_rate,
            state: Mutex::new(TerminalState {
                graph: GraphWindow::default(),
                band: None,
                snr_text: "SNR: --".to_string(),
                peak_text: String::new(),
            }),
        }
    }

    pub fn finish(&self) {
        self.bar.finish();
    }

    fn refresh(&self, state: &TerminalState) {
        self.bar.set_message(format!(
            "{}  level {:.3}{}",
            state.snr_text,
            state.graph.peak(),
            state.peak_text
        ));
    }
}

fn style_for(band: SnrBand) -> ProgressStyle {
    let template = match band {
        SnrBand::Low => "[{bar:40.red/white}] {msg}",
        SnrBand::Medium => "[{bar:40.yellow/white}] {msg}",
        SnrBand::High => "[{bar:40.green/white}] {msg}",
    };
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

impl DisplaySink for TerminalSink {
    fn on_audio_frame(&self, frame: AudioFrame) {
        let mut state = self.state.lock();
        state.graph.push_frame(&frame);
        self.refresh(&state);
    }

    fn on_baseline_recorded(&self, profile: BaselineProfile) {
        self.bar
            .println(format!("Baseline recorded ({} samples).", profile.len()));
    }

    fn on_snr_computed(&self, sample: SnrSample) {
        let mut state = self.state.lock();
        let band = SnrBand::from_ratio(sample.ratio);
        if state.band != Some(band) {
            self.bar.set_style(style_for(band));
            state.band = Some(band);
        }
        state.snr_text = format!("SNR: {:.2} dB", sample.db);
        self.bar.set_position((sample.ratio * 100.0).round() as u64);
        self.refresh(&state);
    }

    fn on_spectrum(&self, spectrum: SpectrumFrame) {
        let mut state = self.state.lock();
        state.peak_text = match spectrum.peak_bin() {
            Some((bin, magnitude)) if magnitude > 0.0 => format!(
                "  peak {:.0} Hz",
                spectrum.bin_frequency(bin, self.sample_rate)
            ),
            _ => String::new(),
        };
        self.refresh(&state);
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JsonEvent<'a> {
    AudioFrame { samples: usize, peak: f32 },
    Baseline { samples: usize },
    Snr(&'a SnrSample),
    Spectrum { window_size: usize, magnitudes: &'a [f32] },
}

/// Writes one JSON object per delivered result.
pub struct JsonSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn emit(&self, event: &JsonEvent<'_>) {
        let mut out = self.out.lock();
        let written = serde_json::to_writer(&mut *out, event)
            .map_err(std::io::Error::from)
            .and_then(|_| writeln!(out));
        if let Err(e) = written {
            log::warn!("Failed to write JSON event: {}", e);
        }
    }
}

impl<W: Write + Send> DisplaySink for JsonSink<W> {
    fn on_audio_frame(&self, frame: AudioFrame) {
        let peak = frame
            .samples()
            .iter()
            .map(|&s| normalize_sample(s).abs())
            .fold(0.0, f32::max);
        self.emit(&JsonEvent::AudioFrame {
            samples: frame.len(),
            peak,
        });
    }

    fn on_baseline_recorded(&self, profile: BaselineProfile) {
        self.emit(&JsonEvent::Baseline {
            samples: profile.len(),
        });
    }

    fn on_snr_computed(&self, sample: SnrSample) {
        self.emit(&JsonEvent::Snr(&sample));
    }

    fn on_spectrum(&self, spectrum: SpectrumFrame) {
        self.emit(&JsonEvent::Spectrum {
            window_size: spectrum.window_size,
            magnitudes: &spectrum.magnitudes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_window_keeps_most_recent_points() {
        let mut graph = GraphWindow::new(4);
        graph.push_frame(&AudioFrame::new(vec![0, 8192, 16384]));
        graph.push_frame(&AudioFrame::new(vec![-16384, 0, -32768]));
        let points: Vec<f32> = graph.points().collect();
        assert_eq!(points, vec![0.5, -0.5, 0.0, -1.0]);
        assert_eq!(graph.peak(), 1.0);
    }

    #[test]
    fn default_graph_holds_five_hundred_points() {
        let mut graph = GraphWindow::default();
        graph.push_frame(&AudioFrame::new(vec![1; 1200]));
        assert_eq!(graph.len(), GRAPH_POINTS);
    }

    #[test]
    fn json_sink_writes_one_line_per_event() {
        let sink = JsonSink::new(Vec::new());
        sink.on_snr_computed(SnrSample {
            db: 12.5,
            ratio: 0.325,
            signal_power: 0.5,
            noise_power: 0.01,
        });
        sink.on_audio_frame(AudioFrame::new(vec![0, -16384]));
        sink.on_spectrum(SpectrumFrame {
            magnitudes: vec![1.0, 2.0],
            window_size: 4,
        });

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "snr");
        assert_eq!(lines[0]["db"], 12.5);
        assert_eq!(lines[1]["event"], "audio_frame");
        assert_eq!(lines[1]["peak"], 0.5);
        assert_eq!(lines[2]["window_size"], 4);
    }

    #[test]
    fn partial_sinks_only_override_what_they_show() {
        struct SnrOnly(Mutex<Vec<f64>>);
        impl DisplaySink for SnrOnly {
            fn on_snr_computed(&self, sample: SnrSample) {
                self.0.lock().push(sample.db);
            }
        }

        let sink = SnrOnly(Mutex::new(Vec::new()));
        sink.on_audio_frame(AudioFrame::new(vec![1]));
        sink.on_snr_computed(SnrSample {
            db: 3.0,
            ratio: 0.23,
            signal_power: 1.0,
            noise_power: 0.5,
        });
        assert_eq!(*sink.0.lock(), vec![3.0]);
    }
}
