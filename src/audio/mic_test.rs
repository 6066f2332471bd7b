//! Microphone self-test: read for a fixed time, then summarize the last
//! buffer.

use std::time::{Duration, Instant};

use super::analysis::SpectralAnalyzer;
use super::buffer::{next_power_of_two, FrameBuffer};
use super::features::{AudioFrame, SpectrumFrame};
use crate::device::CaptureDevice;
use crate::error::{CaptureError, Result};

#[derive(Debug, Clone)]
pub struct MicTestReport {
    /// Mean absolute amplitude of the last buffer, in raw 16-bit units.
    pub amplitude: f64,
    pub spectrum: SpectrumFrame,
    pub frames: usize,
}

/// Mean absolute sample value.
pub fn mean_amplitude(frame: &AudioFrame) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f64 = frame.samples().iter().map(|&s| (s as f64).abs()).sum();
    sum / frame.len() as f64
}

/// Start `device`, read it for `duration` (at least one read), handing
/// every frame to `on_frame`, then stop it. Empty reads are skipped; a test
/// that receives no sample before `duration` ends fails with
/// [`CaptureError::ReadFailure`].
pub fn run_mic_test<F>(device: &mut dyn CaptureDevice, duration: Duration, mut on_frame: F) -> Result<MicTestReport>
where
    F: FnMut(&AudioFrame),
{
    let mut buffer = FrameBuffer::for_device(device)?;
    device.start()?;
    log::info!("Testing {} for {:.1}s", device.name(), duration.as_secs_f32());

    let started = Instant::now();
    let mut last: Option<AudioFrame> = None;
    let mut frames = 0;
    let outcome = loop {
        match buffer.read_frame(device) {
            Ok(frame) => {
                on_frame(&frame);
                frames += 1;
                last = Some(frame);
            }
            Err(CaptureError::ReadFailure) => log::debug!("Empty read during mic test"),
            Err(e) => break Err(e),
        }
        if started.elapsed() >= duration {
            break Ok(());
        }
    };
    device.stop();

    // A device that ends early still yields a report for what it delivered.
    let last = match (outcome, last) {
        (_, Some(frame)) => frame,
        (Err(e), None) => return Err(e),
        (Ok(()), None) => return Err(CaptureError::ReadFailure),
    };

    let spectrum = SpectralAnalyzer::new().analyze(&last, next_power_of_two(buffer.capacity()))?;
    let amplitude = mean_amplitude(&last);
    log::info!("Mic test: {} frames, amplitude {:.1}", frames, amplitude);
    Ok(MicTestReport {
        amplitude,
        spectrum,
        frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{FileDevice, StreamSpec};

    #[test]
    fn amplitude_is_mean_absolute_value() {
        let frame = AudioFrame::new(vec![100, -300, 0, 200]);
        assert_eq!(mean_amplitude(&frame), 150.0);
        assert_eq!(mean_amplitude(&AudioFrame::new(Vec::new())), 0.0);
    }

    #[test]
    fn reports_last_buffer_when_input_runs_out() {
        // 8 kHz: 320 samples per read, so the last read is the 80-sample tail.
        let mut samples = vec![1000i16; 640];
        samples.extend(std::iter::repeat(-50).take(80));
        let mut device = FileDevice::from_samples("mem".into(), samples, 8000, false);

        let mut seen = Vec::new();
        let report = run_mic_test(&mut device, Duration::from_secs(60), |f| seen.push(f.len())).unwrap();

        assert_eq!(seen, vec![320, 320, 80]);
        assert_eq!(report.frames, 3);
        assert_eq!(report.amplitude, 50.0);
        assert_eq!(report.spectrum.window_size, 512);
        assert_eq!(report.spectrum.magnitudes.len(), 256);
    }

    #[test]
    fn short_test_still_reads_one_buffer() {
        let mut device = FileDevice::from_samples("mem".into(), vec![7; 4000], 8000, false);
        let report = run_mic_test(&mut device, Duration::ZERO, |_| {}).unwrap();
        assert_eq!(report.frames, 1);
        assert_eq!(report.amplitude, 7.0);
    }

    struct Silent;

    impl CaptureDevice for Silent {
        fn spec(&self) -> StreamSpec {
            StreamSpec::mono(8000)
        }
        fn min_buffer_len(&self, _spec: &StreamSpec) -> Option<usize> {
            Some(8)
        }
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn read(&mut self, _buffer: &mut [i16], _offset: usize, _count: usize) -> Result<usize> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(0)
        }
        fn stop(&mut self) {}
        fn release(&mut self) {}
    }

    #[test]
    fn device_that_never_delivers_ends_after_duration() {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let outcome = run_mic_test(&mut Silent, Duration::from_millis(30), |_| {});
            let _ = tx.send(outcome);
        });
        let outcome = rx.recv_timeout(Duration::from_secs(5)).expect("mic test should finish");
        assert!(matches!(outcome, Err(CaptureError::ReadFailure)));
    }

    #[test]
    fn empty_input_is_an_error() {
        let mut device = FileDevice::from_samples("mem".into(), Vec::new(), 8000, false);
        assert!(run_mic_test(&mut device, Duration::ZERO, |_| {}).is_err());
    }
}
