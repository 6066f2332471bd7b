//! One-shot ambient noise capture.

use super::buffer::FrameBuffer;
use super::features::BaselineProfile;
use crate::device::CaptureDevice;
use crate::error::{CaptureError, Result};

/// Read exactly one buffer from an already-started `device` and normalize it
/// into a baseline profile of the buffer's full capacity. A short read leaves
/// the tail at zero. A read yielding no samples fails with
/// [`CaptureError::ReadFailure`]; the caller keeps whatever baseline it had.
pub fn capture(device: &mut dyn CaptureDevice, buffer: &mut FrameBuffer) -> Result<BaselineProfile> {
    let (read, samples) = buffer.fill_zeroed(device)?;
    log::debug!("Samples read for baseline: {}", read);

    if read == 0 {
        log::error!("Failed to read audio data for baseline");
        return Err(CaptureError::ReadFailure);
    }

    let profile = BaselineProfile::from_samples(samples)?;
    log::info!("Baseline recorded: {} samples", profile.len());
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::features::AudioFrame;
    use crate::audio::snr;
    use crate::device::StreamSpec;

    struct OneShot {
        reads: Vec<Result<Vec<i16>>>,
    }

    impl CaptureDevice for OneShot {
        fn spec(&self) -> StreamSpec {
            StreamSpec::default()
        }
        fn min_buffer_len(&self, _spec: &StreamSpec) -> Option<usize> {
            Some(4)
        }
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn read(&mut self, buffer: &mut [i16], offset: usize, count: usize) -> Result<usize> {
            let next = self.reads.remove(0)?;
            let n = next.len().min(count);
            buffer[offset..offset + n].copy_from_slice(&next[..n]);
            Ok(n)
        }
        fn stop(&mut self) {}
        fn release(&mut self) {}
    }

    #[test]
    fn captures_one_normalized_buffer() {
        let mut device = OneShot {
            reads: vec![Ok(vec![16384, -16384, 0, 8192]), Ok(vec![1, 1, 1, 1])],
        };
        let mut buffer = FrameBuffer::for_device(&device).unwrap();
        let profile = capture(&mut device, &mut buffer).unwrap();
        assert_eq!(profile.values(), &[0.5, -0.5, 0.0, 0.25]);
        // Only one read consumed.
        assert_eq!(device.reads.len(), 1);
    }

    #[test]
    fn short_read_is_zero_padded_to_capacity() {
        let mut device = OneShot {
            reads: vec![Ok(vec![16384, 16384])],
        };
        let mut buffer = FrameBuffer::for_device(&device).unwrap();
        let profile = capture(&mut device, &mut buffer).unwrap();
        assert_eq!(profile.len(), buffer.capacity());
        assert_eq!(profile.values(), &[0.5, 0.5, 0.0, 0.0]);

        // Half a buffer of constant noise carries half its power.
        let live = AudioFrame::new(vec![16384; 4]);
        let sample = snr::estimate(&live, &profile);
        assert!((sample.db - 10.0 * 2f64.log10()).abs() < 1e-9);
    }

    #[test]
    fn empty_read_is_read_failure() {
        let mut device = OneShot {
            reads: vec![Ok(Vec::new())],
        };
        let mut buffer = FrameBuffer::for_device(&device).unwrap();
        assert_eq!(
            capture(&mut device, &mut buffer),
            Err(CaptureError::ReadFailure)
        );
    }

    #[test]
    fn device_errors_propagate() {
        let mut device = OneShot {
            reads: vec![Err(CaptureError::DeviceStalled(100))],
        };
        let mut buffer = FrameBuffer::for_device(&device).unwrap();
        assert_eq!(
            capture(&mut device, &mut buffer),
            Err(CaptureError::DeviceStalled(100))
        );
    }
}
