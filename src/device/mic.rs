//! Microphone input via cpal.
//!
//! cpal streams are not `Send` on every platform, so the stream lives on its
//! own thread and this handle only talks to it over channels. Samples arrive
//! from the stream callback already downmixed to mono i16 and are handed to
//! the blocking [`CaptureDevice::read`] through a bounded queue.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig, SupportedBufferSize};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{default_buffer_len, CaptureDevice, StreamSpec, BIT_DEPTH};
use crate::audio::decode::to_pcm16;
use crate::error::{CaptureError, Result};

/// Tuning for an opened microphone.
#[derive(Debug, Clone)]
pub struct MicOptions {
    /// Preferred input device name; the system default when `None`.
    pub device_name: Option<String>,
    /// Give up on a read after this long without samples. `None` blocks forever.
    pub read_timeout: Option<Duration>,
    /// Callback chunks queued before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for MicOptions {
    fn default() -> Self {
        Self {
            device_name: None,
            read_timeout: None,
            queue_capacity: 64,
        }
    }
}

enum StreamCommand {
    Play,
    Pause,
    Shutdown,
}

/// What the stream thread reports once the stream is built.
struct StreamInfo {
    name: String,
    sample_rate: u32,
    buffer_len: usize,
}

pub struct MicDevice {
    name: String,
    spec: StreamSpec,
    buffer_len: usize,
    read_timeout: Option<Duration>,
    command_tx: Sender<StreamCommand>,
    reply_rx: Receiver<std::result::Result<(), String>>,
    samples_rx: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    dropped: Arc<AtomicUsize>,
    thread_handle: Option<JoinHandle<()>>,
}

/// List microphone names so the CLI can offer a selector.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

impl MicDevice {
    /// Open the microphone for mono 16-bit capture at `spec.sample_rate`.
    pub fn open(spec: StreamSpec, options: MicOptions) -> Result<Self> {
        if spec.channels != 1 || spec.bit_depth != BIT_DEPTH {
            return Err(CaptureError::DeviceUnavailable(format!(
                "unsupported stream format: {} ch, {} bit",
                spec.channels, spec.bit_depth
            )));
        }

        let (samples_tx, samples_rx) = bounded(options.queue_capacity.max(1));
        let (command_tx, command_rx) = bounded(4);
        let (reply_tx, reply_rx) = bounded(4);
        let (ready_tx, ready_rx) = bounded(1);
        let dropped = Arc::new(AtomicUsize::new(0));
        let dropped_clone = dropped.clone();
        let device_name = options.device_name.clone();

        let thread_handle = thread::Builder::new()
            .name("mic-stream".to_string())
            .spawn(move || {
                run_stream_thread(
                    device_name,
                    spec.sample_rate,
                    samples_tx,
                    dropped_clone,
                    ready_tx,
                    command_rx,
                    reply_tx,
                )
            })
            .map_err(|e| CaptureError::DeviceUnavailable(format!("stream thread: {}", e)))?;

        let info = match ready_rx.recv() {
            Ok(Ok(info)) => info,
            Ok(Err(msg)) => {
                let _ = thread_handle.join();
                return Err(CaptureError::DeviceUnavailable(msg));
            }
            Err(_) => {
                let _ = thread_handle.join();
                return Err(CaptureError::DeviceUnavailable(
                    "stream thread exited during setup".to_string(),
                ));
            }
        };

        log::info!(
            "Microphone '{}' opened: {} Hz mono, {} samples per read",
            info.name,
            info.sample_rate,
            info.buffer_len
        );

        Ok(Self {
            name: info.name,
            spec: StreamSpec::mono(info.sample_rate),
            buffer_len: info.buffer_len,
            read_timeout: options.read_timeout,
            command_tx,
            reply_rx,
            samples_rx,
            pending: VecDeque::new(),
            dropped,
            thread_handle: Some(thread_handle),
        })
    }

    /// Callback chunks dropped because the reader fell behind.
    pub fn dropped_chunks(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send_command(&self, command: StreamCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| CaptureError::DeviceUnavailable("stream thread is gone".to_string()))?;
        match self.reply_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(msg)) => Err(CaptureError::DeviceUnavailable(msg)),
            Err(_) => Err(CaptureError::DeviceUnavailable(
                "stream thread is gone".to_string(),
            )),
        }
    }

    fn next_chunk(&self) -> Result<Option<Vec<i16>>> {
        let closed = || CaptureError::DeviceUnavailable("audio stream closed".to_string());
        match self.read_timeout {
            Some(timeout) => match self.samples_rx.recv_timeout(timeout) {
                Ok(chunk) => Ok(Some(chunk)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(closed()),
            },
            None => self.samples_rx.recv().map(Some).map_err(|_| closed()),
        }
    }
}

impl CaptureDevice for MicDevice {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn min_buffer_len(&self, spec: &StreamSpec) -> Option<usize> {
        (*spec == self.spec).then_some(self.buffer_len)
    }

    fn start(&mut self) -> Result<()> {
        // Discard audio queued before this session.
        self.pending.clear();
        while self.samples_rx.try_recv().is_ok() {}
        self.send_command(StreamCommand::Play)
    }

    fn read(&mut self, buffer: &mut [i16], offset: usize, count: usize) -> Result<usize> {
        let count = count.min(buffer.len().saturating_sub(offset));
        while self.pending.len() < count {
            match self.next_chunk()? {
                Some(chunk) => self.pending.extend(chunk),
                None if self.pending.is_empty() => {
                    let ms = self.read_timeout.map_or(0, |t| t.as_millis() as u64);
                    return Err(CaptureError::DeviceStalled(ms));
                }
                None => break,
            }
        }

        let n = count.min(self.pending.len());
        for (slot, sample) in buffer[offset..offset + n]
            .iter_mut()
            .zip(self.pending.drain(..n))
        {
            *slot = sample;
        }
        Ok(n)
    }

    fn stop(&mut self) {
        if let Err(e) = self.send_command(StreamCommand::Pause) {
            log::warn!("Failed to pause microphone: {}", e);
        }
    }

    fn release(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.command_tx.send(StreamCommand::Shutdown);
            let _ = handle.join();
            log::debug!(
                "Microphone '{}' released ({} chunks dropped)",
                self.name,
                self.dropped_chunks()
            );
        }
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

impl Drop for MicDevice {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns the cpal stream for its whole life.
fn run_stream_thread(
    device_name: Option<String>,
    sample_rate: u32,
    samples_tx: Sender<Vec<i16>>,
    dropped: Arc<AtomicUsize>,
    ready_tx: Sender<std::result::Result<StreamInfo, String>>,
    command_rx: Receiver<StreamCommand>,
    reply_tx: Sender<std::result::Result<(), String>>,
) {
    let stream = match build_input(device_name.as_deref(), sample_rate, samples_tx, dropped) {
        Ok((stream, info)) => {
            let _ = ready_tx.send(Ok(info));
            stream
        }
        Err(msg) => {
            log::error!("Failed to open microphone: {}", msg);
            let _ = ready_tx.send(Err(msg));
            return;
        }
    };

    for command in command_rx.iter() {
        let result = match command {
            StreamCommand::Play => stream.play().map_err(|e| e.to_string()),
            StreamCommand::Pause => stream.pause().map_err(|e| e.to_string()),
            StreamCommand::Shutdown => break,
        };
        if reply_tx.send(result).is_err() {
            break;
        }
    }
    // Dropping the stream closes the device.
}

fn find_device(name: Option<&str>) -> std::result::Result<Device, String> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .input_devices()
            .map_err(|e| e.to_string())?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| format!("input device '{}' not found", name)),
        None => host
            .default_input_device()
            .ok_or_else(|| "no default input device available".to_string()),
    }
}

fn build_input(
    device_name: Option<&str>,
    sample_rate: u32,
    samples_tx: Sender<Vec<i16>>,
    dropped: Arc<AtomicUsize>,
) -> std::result::Result<(cpal::Stream, StreamInfo), String> {
    let device = find_device(device_name)?;
    let name = device
        .name()
        .unwrap_or_else(|_| "Unknown Device".to_string());

    // Prefer a config that runs natively at the requested rate, i16 first.
    let supported = device
        .supported_input_configs()
        .map_err(|e| e.to_string())?
        .filter(|c| c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate)
        .max_by_key(|c| (c.sample_format() == SampleFormat::I16, c.channels() == 1));

    let supported = match supported {
        Some(range) => range.with_sample_rate(cpal::SampleRate(sample_rate)),
        None => {
            let fallback = device.default_input_config().map_err(|e| e.to_string())?;
            log::warn!(
                "'{}' cannot run at {} Hz, using {} Hz",
                name,
                sample_rate,
                fallback.sample_rate().0
            );
            fallback
        }
    };

    let actual_rate = supported.sample_rate().0;
    let channels = usize::from(supported.channels().max(1));
    let buffer_len = match supported.buffer_size() {
        SupportedBufferSize::Range { min, .. } => {
            (*min as usize).max(default_buffer_len(actual_rate))
        }
        SupportedBufferSize::Unknown => default_buffer_len(actual_rate),
    };

    log::debug!(
        "Microphone config: format={:?} sample_rate={}Hz channels={}",
        supported.sample_format(),
        actual_rate,
        channels
    );

    let config: StreamConfig = supported.config();
    let stream = match supported.sample_format() {
        SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, samples_tx, dropped),
        SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, samples_tx, dropped),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, samples_tx, dropped),
        other => return Err(format!("unsupported sample format: {:?}", other)),
    }
    .map_err(|e| e.to_string())?;

    Ok((
        stream,
        StreamInfo {
            name,
            sample_rate: actual_rate,
            buffer_len,
        },
    ))
}

fn build_stream<T: cpal::Sample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    channels: usize,
    samples_tx: Sender<Vec<i16>>,
    dropped: Arc<AtomicUsize>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    f32: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono = downmix(data, channels, <f32 as cpal::Sample>::from_sample::<T>);
            match samples_tx.try_send(mono) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        },
        |err| {
            log::error!("Audio stream error: {}", err);
        },
        None,
    )
}

/// Average interleaved frames to mono 16-bit samples.
fn downmix<T, F>(data: &[T], channels: usize, mut convert: F) -> Vec<i16>
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().copied().map(&mut convert).sum();
            to_pcm16(sum / frame.len() as f32)
        })
        .collect()
}
