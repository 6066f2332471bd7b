//! Rate-limited delivery of capture results to a display sink.
//!
//! The capture thread produces results at the device's cadence; each result
//! kind (graph frames, SNR samples, spectra) has its own clock and is only
//! forwarded when its interval has elapsed since the last forwarded item.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::features::{AudioFrame, BaselineProfile, SnrSample, SpectrumFrame};
use crate::sink::DisplaySink;

/// Shortest and longest allowed dispatch interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(50);
pub const MAX_INTERVAL: Duration = Duration::from_millis(500);

/// Monotonic time source, so tests can drive throttling deterministically.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to.
#[derive(Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

/// Admits at most one event per interval.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Duration>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn is_due(&self, now: Duration) -> bool {
        match self.last {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.interval,
        }
    }

    /// Record an event at `now` if it is due.
    pub fn admit(&mut self, now: Duration) -> bool {
        if self.is_due(now) {
            self.last = Some(now);
            true
        } else {
            false
        }
    }
}

/// Per-kind dispatch intervals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchIntervals {
    pub graph: Duration,
    pub snr: Duration,
    pub spectrum: Duration,
}

impl DispatchIntervals {
    /// Clamp every interval into the supported 50..=500 ms range.
    pub fn clamped(self) -> Self {
        let clamp = |d: Duration| d.clamp(MIN_INTERVAL, MAX_INTERVAL);
        Self {
            graph: clamp(self.graph),
            snr: clamp(self.snr),
            spectrum: clamp(self.spectrum),
        }
    }
}

impl Default for DispatchIntervals {
    fn default() -> Self {
        Self {
            graph: Duration::from_millis(100),
            snr: Duration::from_millis(100),
            spectrum: Duration::from_millis(250),
        }
    }
}

/// Counts of forwarded and suppressed results for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub forwarded: u64,
    pub suppressed: u64,
}

/// Owned by the capture thread for one session.
pub struct ThrottledDispatcher {
    sink: Arc<dyn DisplaySink>,
    clock: Arc<dyn Clock>,
    graph: Throttle,
    snr: Throttle,
    spectrum: Throttle,
    stats: DispatchStats,
}

impl ThrottledDispatcher {
    pub fn new(sink: Arc<dyn DisplaySink>, clock: Arc<dyn Clock>, intervals: DispatchIntervals) -> Self {
        Self {
            sink,
            clock,
            graph: Throttle::new(intervals.graph),
            snr: Throttle::new(intervals.snr),
            spectrum: Throttle::new(intervals.spectrum),
            stats: DispatchStats::default(),
        }
    }

    pub fn audio_frame(&mut self, frame: AudioFrame) -> bool {
        let now = self.clock.now();
        let admitted = self.graph.admit(now);
        if admitted {
            self.sink.on_audio_frame(frame);
        }
        self.count(admitted)
    }

    pub fn snr(&mut self, sample: SnrSample) -> bool {
        let now = self.clock.now();
        let admitted = self.snr.admit(now);
        if admitted {
            self.sink.on_snr_computed(sample);
        }
        self.count(admitted)
    }

    pub fn spectrum(&mut self, spectrum: SpectrumFrame) -> bool {
        let now = self.clock.now();
        let admitted = self.spectrum.admit(now);
        if admitted {
            self.sink.on_spectrum(spectrum);
        }
        self.count(admitted)
    }

    /// Whether a spectrum computed now would be forwarded. Lets the capture
    /// loop skip the FFT when the result would be dropped anyway.
    pub fn spectrum_due(&self) -> bool {
        self.spectrum.is_due(self.clock.now())
    }

    /// Baselines are one-shot and never throttled.
    pub fn baseline(&self, profile: BaselineProfile) {
        self.sink.on_baseline_recorded(profile);
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    fn count(&mut self, admitted: bool) -> bool {
        if admitted {
            self.stats.forwarded += 1;
        } else {
            self.stats.suppressed += 1;
        }
        admitted
    }
}
