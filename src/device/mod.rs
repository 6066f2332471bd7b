//! Audio input capability consumed by the capture pipeline.
//!
//! The pipeline never acquires devices or negotiates permissions itself; it
//! only drives an already-opened [`CaptureDevice`] through start/read/stop.

mod file;
mod mic;

pub use file::FileDevice;
pub use mic::{list_input_devices, MicDevice, MicOptions};

use crate::error::Result;

/// Only signed 16-bit PCM is supported.
pub const BIT_DEPTH: u16 = 16;

/// Default capture rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Read length covering 40 ms of audio at `sample_rate`.
pub fn default_buffer_len(sample_rate: u32) -> usize {
    (sample_rate as usize * 40 / 1000).max(1)
}

/// Stream parameters a device was opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl StreamSpec {
    /// Mono 16-bit stream at `sample_rate`.
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bit_depth: BIT_DEPTH,
        }
    }
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self::mono(DEFAULT_SAMPLE_RATE)
    }
}

/// An opened audio input stream delivering signed 16-bit mono samples.
///
/// Implementations are moved onto the capture thread, hence `Send`.
pub trait CaptureDevice: Send {
    /// Parameters the stream actually runs at.
    fn spec(&self) -> StreamSpec;

    /// Platform-reported minimum buffer length in samples for `spec`.
    /// `None` is the error sentinel: the device cannot be buffered at all.
    fn min_buffer_len(&self, spec: &StreamSpec) -> Option<usize>;

    fn start(&mut self) -> Result<()>;

    /// Blocking read of up to `count` samples into `buffer[offset..]`.
    /// Returns the number of samples written; zero means the device
    /// under-delivered.
    fn read(&mut self, buffer: &mut [i16], offset: usize, count: usize) -> Result<usize>;

    fn stop(&mut self);

    /// Free the underlying stream. The device is unusable afterwards.
    fn release(&mut self);

    fn name(&self) -> String {
        "capture device".to_string()
    }
}
