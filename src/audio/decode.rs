use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Mono 16-bit PCM decoded from a media file.
pub struct DecodedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// The first decodable track of a probed file.
struct OpenTrack {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
}

fn open_track(path: &Path) -> Result<OpenTrack> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let format = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Failed to probe audio format")?
        .format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio tracks found")?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.context("Unknown sample rate")?;
    let channels = track.codec_params.channels.map_or(1, |c| c.count()).max(1);
    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create audio decoder")?;

    Ok(OpenTrack {
        format,
        decoder,
        track_id,
        channels,
        sample_rate,
    })
}

/// Decode `path` (WAV, FLAC, MP3, OGG, AAC) to mono signed 16-bit samples.
pub fn decode_to_pcm16(path: &Path) -> Result<DecodedAudio> {
    let OpenTrack {
        mut format,
        mut decoder,
        track_id,
        channels,
        sample_rate,
    } = open_track(path)?;

    let mut samples = Vec::new();
    let mut interleaved: Option<SampleBuffer<f32>> = None;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e).context("Failed to read audio packet"),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                log::debug!("Skipping undecodable packet: {}", msg);
                continue;
            }
            Err(e) => return Err(e).context("Failed to decode audio"),
        };

        // Packets rarely change size; reuse the conversion buffer when it fits.
        let spec = *decoded.spec();
        let needed = decoded.frames() * spec.channels.count();
        if interleaved.as_ref().map_or(true, |buf| buf.capacity() < needed) {
            interleaved = Some(SampleBuffer::new(decoded.frames() as u64, spec));
        }
        if let Some(buf) = interleaved.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend(buf.samples().chunks(channels).map(downmix_frame));
        }
    }

    let audio = DecodedAudio {
        samples,
        sample_rate,
    };
    log::info!(
        "Decoded {}: {} samples, {}Hz, {:.1}s",
        path.display(),
        audio.samples.len(),
        sample_rate,
        audio.duration().as_secs_f32()
    );
    Ok(audio)
}

fn downmix_frame(frame: &[f32]) -> i16 {
    to_pcm16(frame.iter().sum::<f32>() / frame.len() as f32)
}

pub(crate) fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_conversion_clamps() {
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(1.5), i16::MAX);
        assert_eq!(to_pcm16(-1.5), -i16::MAX);
        assert_eq!(to_pcm16(0.5), 16384);
    }

    #[test]
    fn frames_average_to_mono() {
        assert_eq!(downmix_frame(&[0.5, -0.5]), 0);
        assert_eq!(downmix_frame(&[1.0, 0.0]), 16384);
    }

    #[test]
    fn duration_follows_sample_rate() {
        let audio = DecodedAudio {
            samples: vec![0; 8000],
            sample_rate: 16_000,
        };
        assert_eq!(audio.duration(), Duration::from_millis(500));
    }

    #[test]
    fn missing_file_is_an_error() {
        let missing = std::env::temp_dir().join("noisefloor-does-not-exist.wav");
        assert!(decode_to_pcm16(&missing).is_err());
    }
}
