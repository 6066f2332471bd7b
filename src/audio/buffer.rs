//! Fixed-capacity scratch buffer reused across device reads.

use super::features::AudioFrame;
use crate::device::{CaptureDevice, StreamSpec};
use crate::error::{CaptureError, Result};

/// Validated platform minimum buffer length for `spec`.
///
/// The device's error sentinel (or a zero length) means the stream cannot be
/// buffered and capture must not proceed.
pub fn minimum_capacity(device: &dyn CaptureDevice, spec: &StreamSpec) -> Result<usize> {
    match device.min_buffer_len(spec) {
        Some(len) if len > 0 => Ok(len),
        other => {
            log::error!(
                "Invalid buffer size {:?} for {} Hz, {} ch, {} bit",
                other,
                spec.sample_rate,
                spec.channels,
                spec.bit_depth
            );
            Err(CaptureError::DeviceUnavailable(format!(
                "{} reported no usable buffer size",
                device.name()
            )))
        }
    }
}

/// Round `n` up to a power of two by shifting left from 1.
pub fn next_power_of_two(n: usize) -> usize {
    let mut size = 1usize;
    while size < n {
        size <<= 1;
    }
    size
}

pub struct FrameBuffer {
    samples: Vec<i16>,
}

impl FrameBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: vec![0; capacity],
        }
    }

    /// Buffer sized to the device's minimum for its own stream spec.
    pub fn for_device(device: &dyn CaptureDevice) -> Result<Self> {
        let spec = device.spec();
        let capacity = minimum_capacity(device, &spec)?;
        Ok(Self::with_capacity(capacity))
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Read one buffer's worth from `device`. The returned slice is only valid
    /// until the next call overwrites it.
    pub fn fill(&mut self, device: &mut dyn CaptureDevice) -> Result<&[i16]> {
        let capacity = self.samples.len();
        let read = device.read(&mut self.samples, 0, capacity)?;
        Ok(&self.samples[..read.min(capacity)])
    }

    /// Clear the buffer, read one buffer's worth, and return the number of
    /// samples read with the whole buffer. Slots past the read stay zero.
    pub fn fill_zeroed(&mut self, device: &mut dyn CaptureDevice) -> Result<(usize, &[i16])> {
        self.samples.fill(0);
        let capacity = self.samples.len();
        let read = device.read(&mut self.samples, 0, capacity)?.min(capacity);
        Ok((read, &self.samples))
    }

    /// Read one buffer and copy it out as an owned frame. Zero samples read is
    /// reported as [`CaptureError::ReadFailure`].
    pub fn read_frame(&mut self, device: &mut dyn CaptureDevice) -> Result<AudioFrame> {
        let filled = self.fill(device)?;
        if filled.is_empty() {
            return Err(CaptureError::ReadFailure);
        }
        Ok(AudioFrame::new(filled.to_vec()))
    }
}
