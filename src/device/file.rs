use anyhow::Result;
use std::path::Path;
use std::time::Duration;

use super::{default_buffer_len, CaptureDevice, StreamSpec};
use crate::audio::decode::decode_to_pcm16;
use crate::error::{self, CaptureError};
use crate::persist::read_pcm_file;

/// Plays back a decoded media file or a raw PCM dump as if it were a
/// microphone. With pacing enabled each read sleeps for the audio duration
/// it delivered, approximating a live device's cadence.
pub struct FileDevice {
    name: String,
    samples: Vec<i16>,
    position: usize,
    sample_rate: u32,
    paced: bool,
    running: bool,
}

impl FileDevice {
    /// Open `path`. Files ending in `.pcm`/`.raw` are read as headerless dumps
    /// at `raw_sample_rate`; anything else goes through the media decoder.
    pub fn open(path: &Path, raw_sample_rate: u32, paced: bool) -> Result<Self> {
        let is_raw = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("pcm") | Some("raw")
        );
        let (samples, sample_rate) = if is_raw {
            (read_pcm_file(path)?, raw_sample_rate)
        } else {
            let decoded = decode_to_pcm16(path)?;
            (decoded.samples, decoded.sample_rate)
        };
        log::info!(
            "File input {}: {} samples at {} Hz",
            path.display(),
            samples.len(),
            sample_rate
        );
        Ok(Self::from_samples(
            path.display().to_string(),
            samples,
            sample_rate,
            paced,
        ))
    }

    pub fn from_samples(name: String, samples: Vec<i16>, sample_rate: u32, paced: bool) -> Self {
        Self {
            name,
            samples,
            position: 0,
            sample_rate,
            paced,
            running: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

impl CaptureDevice for FileDevice {
    fn spec(&self) -> StreamSpec {
        StreamSpec::mono(self.sample_rate)
    }

    fn min_buffer_len(&self, spec: &StreamSpec) -> Option<usize> {
        if spec.channels != 1 || spec.bit_depth != super::BIT_DEPTH || spec.sample_rate == 0 {
            return None;
        }
        Some(default_buffer_len(spec.sample_rate))
    }

    fn start(&mut self) -> error::Result<()> {
        self.running = true;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [i16], offset: usize, count: usize) -> error::Result<usize> {
        if !self.running {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} is not started",
                self.name
            )));
        }
        if self.remaining() == 0 {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} reached end of input",
                self.name
            )));
        }

        let n = count
            .min(self.remaining())
            .min(buffer.len().saturating_sub(offset));
        buffer[offset..offset + n].copy_from_slice(&self.samples[self.position..self.position + n]);
        self.position += n;

        if self.paced && self.sample_rate > 0 {
            std::thread::sleep(Duration::from_secs_f64(n as f64 / self.sample_rate as f64));
        }
        Ok(n)
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn release(&mut self) {
        self.running = false;
        self.samples = Vec::new();
        self.position = 0;
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_in_order_then_reports_end_of_input() {
        let mut device = FileDevice::from_samples("mem".into(), (1..=5).collect(), 8000, false);
        let mut buffer = [0i16; 4];

        assert!(device.read(&mut buffer, 0, 4).is_err());
        device.start().unwrap();

        assert_eq!(device.read(&mut buffer, 0, 4).unwrap(), 4);
        assert_eq!(buffer, [1, 2, 3, 4]);
        assert_eq!(device.read(&mut buffer, 0, 4).unwrap(), 1);
        assert_eq!(buffer[0], 5);
        assert!(matches!(
            device.read(&mut buffer, 0, 4),
            Err(CaptureError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn rejects_unsupported_formats() {
        let device = FileDevice::from_samples("mem".into(), Vec::new(), 8000, false);
        let stereo = StreamSpec {
            channels: 2,
            ..StreamSpec::mono(8000)
        };
        assert_eq!(device.min_buffer_len(&stereo), None);
        assert_eq!(device.min_buffer_len(&StreamSpec::mono(8000)), Some(320));
    }

    #[test]
    fn raw_dumps_open_at_the_given_rate() {
        let path = std::env::temp_dir().join(format!("noisefloor-dev-{}.pcm", std::process::id()));
        std::fs::write(&path, [0x01, 0x00, 0xFF, 0xFF]).unwrap();

        let mut device = FileDevice::open(&path, 16_000, false).unwrap();
        assert_eq!(device.spec(), StreamSpec::mono(16_000));
        device.start().unwrap();
        let mut buffer = [0i16; 2];
        assert_eq!(device.read(&mut buffer, 0, 2).unwrap(), 2);
        assert_eq!(buffer, [1, -1]);
        let _ = std::fs::remove_file(&path);
    }
}
