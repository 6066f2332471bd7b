//! Capture engine: owns the device, the baseline/recording state machine and
//! the single capture thread.
//!
//! At most one capture loop runs at a time. The command side (`start_*`,
//! `stop`, `set_baseline`) and the capture thread share only the state cell,
//! the cancel flag, the current baseline and a few counters. The baseline is
//! written only while no loop runs; a recording loop works from a snapshot
//! taken before it was spawned.

pub mod dispatch;

use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::analysis::SpectralAnalyzer;
use crate::audio::baseline;
use crate::audio::buffer::{next_power_of_two, FrameBuffer};
use crate::audio::features::BaselineProfile;
use crate::audio::snr;
use crate::device::CaptureDevice;
use crate::error::{CaptureError, Result};
use crate::persist::PcmWriter;
use crate::sink::DisplaySink;
use dispatch::{Clock, DispatchIntervals, SystemClock, ThrottledDispatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    CapturingBaseline,
    BaselineReady,
    Recording,
    /// A recording ended, by `stop()` or a fatal device error.
    Stopped,
}

impl CaptureState {
    /// Whether a capture thread owns the device in this state.
    pub fn is_active(self) -> bool {
        matches!(self, CaptureState::CapturingBaseline | CaptureState::Recording)
    }
}

/// Per-engine analysis and dispatch settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    pub intervals: DispatchIntervals,
    /// Run the spectral analyzer during recording.
    pub spectrum: bool,
    /// FFT window; 0 picks the next power of two of the buffer capacity.
    pub window_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            intervals: DispatchIntervals::default(),
            spectrum: true,
            window_size: 0,
        }
    }
}

/// Counters for the most recent session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureMetrics {
    pub frames: u64,
    pub transient_failures: u64,
    pub dumped_samples: u64,
    pub forwarded: u64,
    pub suppressed: u64,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    transient_failures: AtomicU64,
    dumped_samples: AtomicU64,
    forwarded: AtomicU64,
    suppressed: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.frames,
            &self.transient_failures,
            &self.dumped_samples,
            &self.forwarded,
            &self.suppressed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> CaptureMetrics {
        CaptureMetrics {
            frames: self.frames.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            dumped_samples: self.dumped_samples.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    state: Mutex<CaptureState>,
    cancel: AtomicBool,
    baseline: Mutex<Option<BaselineProfile>>,
    last_error: Mutex<Option<CaptureError>>,
    counters: Counters,
}

impl Shared {
    fn set_state(&self, state: CaptureState) {
        let mut current = self.state.lock();
        if *current != state {
            log::debug!("Capture state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    fn fail(&self, error: CaptureError) {
        log::error!("{}", error);
        *self.last_error.lock() = Some(error);
    }
}

/// What a capture thread hands back when it exits.
struct Session {
    device: Box<dyn CaptureDevice>,
    outcome: Result<()>,
}

type DumpWriter = PcmWriter<Box<dyn Write + Send>>;

pub struct CaptureEngine {
    device: Option<Box<dyn CaptureDevice>>,
    worker: Option<JoinHandle<Session>>,
    shared: Arc<Shared>,
    sink: Arc<dyn DisplaySink>,
    clock: Arc<dyn Clock>,
    options: EngineOptions,
}

impl CaptureEngine {
    pub fn new(device: Box<dyn CaptureDevice>, sink: Arc<dyn DisplaySink>, options: EngineOptions) -> Self {
        Self {
            device: Some(device),
            worker: None,
            shared: Arc::new(Shared {
                state: Mutex::new(CaptureState::Idle),
                cancel: AtomicBool::new(false),
                baseline: Mutex::new(None),
                last_error: Mutex::new(None),
                counters: Counters::default(),
            }),
            sink,
            clock: Arc::new(SystemClock::new()),
            options: EngineOptions {
                intervals: options.intervals.clamped(),
                ..options
            },
        }
    }

    /// Replace the dispatch clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> CaptureState {
        *self.shared.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn baseline(&self) -> Option<BaselineProfile> {
        self.shared.baseline.lock().clone()
    }

    /// The error that ended the most recent session, if any.
    pub fn last_error(&self) -> Option<CaptureError> {
        self.shared.last_error.lock().clone()
    }

    pub fn metrics(&self) -> CaptureMetrics {
        self.shared.counters.snapshot()
    }

    /// Install an externally supplied baseline, e.g. one loaded from disk.
    pub fn set_baseline(&mut self, profile: BaselineProfile) -> Result<()> {
        if self.is_active() {
            return Err(CaptureError::AlreadyActive);
        }
        self.reclaim();
        log::info!("Using supplied baseline: {} samples", profile.len());
        *self.shared.baseline.lock() = Some(profile);
        self.shared.set_state(CaptureState::BaselineReady);
        Ok(())
    }

    /// Spawn the one-shot baseline capture. Device failures at start are
    /// returned here and leave the state unchanged.
    pub fn start_baseline_capture(&mut self) -> Result<()> {
        let (mut device, buffer) = self.prepare()?;
        if let Err(e) = device.start() {
            log::error!("Failed to start {}: {}", device.name(), e);
            self.device = Some(device);
            return Err(e);
        }

        self.begin(CaptureState::CapturingBaseline);
        let shared = Arc::clone(&self.shared);
        let dispatcher =
            ThrottledDispatcher::new(Arc::clone(&self.sink), Arc::clone(&self.clock), self.options.intervals);
        self.spawn("baseline-capture", move || {
            run_baseline(device, buffer, shared, dispatcher)
        })
    }

    /// Block until a baseline capture ends and return its profile. Fails
    /// with [`CaptureError::AlreadyActive`] while recording.
    pub fn wait_for_baseline(&mut self) -> Result<BaselineProfile> {
        if self.state() == CaptureState::Recording {
            return Err(CaptureError::AlreadyActive);
        }
        let outcome = match self.worker.take() {
            Some(handle) => self.join(handle),
            None => Ok(()),
        };
        outcome?;
        match self.state() {
            CaptureState::BaselineReady => self.baseline().ok_or(CaptureError::BaselinePending),
            _ => Err(self.last_error().unwrap_or(CaptureError::BaselinePending)),
        }
    }

    pub fn start_recording(&mut self) -> Result<()> {
        self.start_session(None)
    }

    /// Record while appending every frame read to a raw PCM dump.
    pub fn start_recording_to<W: Write + Send + 'static>(&mut self, dump: W) -> Result<()> {
        let boxed: Box<dyn Write + Send> = Box::new(dump);
        self.start_session(Some(PcmWriter::new(boxed)))
    }

    fn start_session(&mut self, dump: Option<DumpWriter>) -> Result<()> {
        if self.is_active() {
            return Err(CaptureError::AlreadyActive);
        }
        let baseline = match self.baseline() {
            Some(profile) if !profile.is_empty() => profile,
            _ => {
                log::warn!("Recording requested before a baseline was recorded");
                return Err(CaptureError::BaselinePending);
            }
        };
        let window = self.options.window_size;
        if self.options.spectrum && window != 0 && !window.is_power_of_two() {
            return Err(CaptureError::InvalidWindowSize(window));
        }

        let (mut device, buffer) = self.prepare()?;
        let window = if window == 0 {
            next_power_of_two(buffer.capacity())
        } else {
            window
        };
        if let Err(e) = device.start() {
            log::error!("Failed to start {}: {}", device.name(), e);
            self.device = Some(device);
            return Err(e);
        }

        log::info!(
            "Recording from {} ({} samples per read, spectrum {})",
            device.name(),
            buffer.capacity(),
            if self.options.spectrum { "on" } else { "off" }
        );
        self.begin(CaptureState::Recording);
        let loop_state = RecordingLoop {
            device,
            buffer,
            baseline,
            analyzer: self.options.spectrum.then(SpectralAnalyzer::new),
            window,
            dump,
            dispatcher: ThrottledDispatcher::new(
                Arc::clone(&self.sink),
                Arc::clone(&self.clock),
                self.options.intervals,
            ),
            shared: Arc::clone(&self.shared),
        };
        self.spawn("capture", move || loop_state.run())
    }

    /// Cancel the running capture and wait for its thread to exit. After this
    /// returns the device is no longer read from. Never fails; a no-op when
    /// nothing is running.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.shared.cancel.store(true, Ordering::SeqCst);
        let _ = self.join(handle);

        let mut state = self.shared.state.lock();
        match *state {
            CaptureState::Recording => *state = CaptureState::Stopped,
            CaptureState::CapturingBaseline => *state = CaptureState::Idle,
            _ => {}
        }
    }

    /// Take the device back for a new session after checking the state.
    fn prepare(&mut self) -> Result<(Box<dyn CaptureDevice>, FrameBuffer)> {
        if self.is_active() {
            return Err(CaptureError::AlreadyActive);
        }
        self.reclaim();
        let device = self.device.take().ok_or_else(|| {
            CaptureError::DeviceUnavailable("capture device was lost".to_string())
        })?;
        match FrameBuffer::for_device(device.as_ref()) {
            Ok(buffer) => Ok((device, buffer)),
            Err(e) => {
                self.device = Some(device);
                Err(e)
            }
        }
    }

    fn begin(&self, state: CaptureState) {
        self.shared.cancel.store(false, Ordering::SeqCst);
        *self.shared.last_error.lock() = None;
        self.shared.counters.reset();
        self.shared.set_state(state);
    }

    fn spawn<F>(&mut self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce() -> Session + Send + 'static,
    {
        match thread::Builder::new().name(name.to_string()).spawn(body) {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                // The closure, and the device it owned, are gone.
                let error = CaptureError::DeviceUnavailable(format!("failed to spawn capture thread: {}", e));
                self.shared.fail(error.clone());
                self.shared.set_state(CaptureState::Stopped);
                Err(error)
            }
        }
    }

    /// Join a thread that already left the active state.
    fn reclaim(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = self.join(handle);
        }
    }

    fn join(&mut self, handle: JoinHandle<Session>) -> Result<()> {
        match handle.join() {
            Ok(session) => {
                self.device = Some(session.device);
                session.outcome
            }
            Err(_) => {
                let error = CaptureError::DeviceUnavailable("capture thread panicked".to_string());
                self.shared.fail(error.clone());
                self.shared.set_state(CaptureState::Stopped);
                Err(error)
            }
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
        if let Some(mut device) = self.device.take() {
            device.release();
        }
    }
}

fn run_baseline(
    mut device: Box<dyn CaptureDevice>,
    mut buffer: FrameBuffer,
    shared: Arc<Shared>,
    dispatcher: ThrottledDispatcher,
) -> Session {
    let outcome = if shared.cancel.load(Ordering::SeqCst) {
        None
    } else {
        Some(baseline::capture(device.as_mut(), &mut buffer))
    };
    device.stop();

    let outcome = match outcome {
        Some(Ok(profile)) => {
            *shared.baseline.lock() = Some(profile.clone());
            shared.set_state(CaptureState::BaselineReady);
            dispatcher.baseline(profile);
            Ok(())
        }
        Some(Err(e)) => {
            shared.fail(e.clone());
            shared.set_state(CaptureState::Idle);
            Err(e)
        }
        None => {
            log::info!("Baseline capture cancelled");
            shared.set_state(CaptureState::Idle);
            Ok(())
        }
    };
    Session { device, outcome }
}

struct RecordingLoop {
    device: Box<dyn CaptureDevice>,
    buffer: FrameBuffer,
    baseline: BaselineProfile,
    analyzer: Option<SpectralAnalyzer>,
    window: usize,
    dump: Option<DumpWriter>,
    dispatcher: ThrottledDispatcher,
    shared: Arc<Shared>,
}

impl RecordingLoop {
    fn run(mut self) -> Session {
        let outcome = self.capture();
        self.device.stop();

        if let Some(dump) = self.dump.take() {
            if let Err(e) = dump.finish() {
                log::warn!("Failed to flush dump: {}", e);
            }
        }

        let stats = self.dispatcher.stats();
        let counters = &self.shared.counters;
        counters.forwarded.store(stats.forwarded, Ordering::Relaxed);
        counters.suppressed.store(stats.suppressed, Ordering::Relaxed);
        log::info!(
            "Recording ended after {} frames ({} forwarded, {} suppressed, {} empty reads)",
            counters.frames.load(Ordering::Relaxed),
            stats.forwarded,
            stats.suppressed,
            counters.transient_failures.load(Ordering::Relaxed)
        );

        if let Err(e) = &outcome {
            self.shared.fail(e.clone());
        }
        self.shared.set_state(CaptureState::Stopped);
        Session {
            device: self.device,
            outcome,
        }
    }

    fn capture(&mut self) -> Result<()> {
        let counters = &self.shared.counters;
        while !self.shared.cancel.load(Ordering::SeqCst) {
            let frame = match self.buffer.read_frame(self.device.as_mut()) {
                Ok(frame) => frame,
                Err(e) if !e.is_fatal() => {
                    log::warn!("{}, skipping", e);
                    counters.transient_failures.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(dump) = self.dump.as_mut() {
                match dump.write_samples(frame.samples()) {
                    Ok(()) => {
                        counters
                            .dumped_samples
                            .fetch_add(frame.len() as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        log::error!("Failed to write dump, disabling it: {}", e);
                        self.dump = None;
                    }
                }
            }

            self.dispatcher.snr(snr::estimate(&frame, &self.baseline));

            if let Some(analyzer) = self.analyzer.as_mut() {
                if self.dispatcher.spectrum_due() {
                    match analyzer.analyze(&frame, self.window) {
                        Ok(spectrum) => {
                            self.dispatcher.spectrum(spectrum);
                        }
                        Err(e) => {
                            log::error!("Spectrum analysis disabled: {}", e);
                            self.analyzer = None;
                        }
                    }
                }
            }

            self.dispatcher.audio_frame(frame);
            counters.frames.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
