//! Raw PCM dumps and baseline exchange files.
//!
//! Dumps are headerless little-endian signed 16-bit mono PCM, frames
//! concatenated in capture order. Baselines are JSON documents holding the
//! normalized float values exactly as captured.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::audio::features::BaselineProfile;

/// File extension used for saved baselines.
pub const BASELINE_EXT: &str = "json";

/// Appends frames to a raw PCM dump.
pub struct PcmWriter<W: Write> {
    inner: BufWriter<W>,
    samples_written: u64,
}

impl PcmWriter<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create dump file: {}", path.display()))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> PcmWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
            samples_written: 0,
        }
    }

    pub fn write_samples(&mut self, samples: &[i16]) -> std::io::Result<()> {
        for sample in samples {
            self.inner.write_all(&sample.to_le_bytes())?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn finish(mut self) -> std::io::Result<W> {
        self.inner.flush()?;
        self.inner.into_inner().map_err(|e| e.into_error())
    }
}

/// Decode a raw dump. A trailing odd byte is ignored.
pub fn decode_pcm(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn read_pcm_file(path: &Path) -> Result<Vec<i16>> {
    let mut bytes = Vec::new();
    File::open(path)
        .with_context(|| format!("Failed to open dump file: {}", path.display()))?
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read dump file: {}", path.display()))?;
    if bytes.len() % 2 != 0 {
        log::warn!("Dump {} has a trailing odd byte, ignoring it", path.display());
    }
    Ok(decode_pcm(&bytes))
}

#[derive(Debug, Serialize, Deserialize)]
struct BaselineFile {
    sample_rate: u32,
    values: Vec<f32>,
}

pub fn save_baseline(path: &Path, profile: &BaselineProfile, sample_rate: u32) -> Result<()> {
    let doc = BaselineFile {
        sample_rate,
        values: profile.values().to_vec(),
    };
    let json = serde_json::to_string(&doc).context("Failed to serialize baseline")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write baseline: {}", path.display()))?;
    log::info!("Saved baseline ({} values) to {}", profile.len(), path.display());
    Ok(())
}

/// Load a baseline and the sample rate it was captured at.
pub fn load_baseline(path: &Path) -> Result<(BaselineProfile, u32)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read baseline: {}", path.display()))?;
    let doc: BaselineFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse baseline: {}", path.display()))?;
    let profile = BaselineProfile::from_normalized(doc.values)
        .with_context(|| format!("Baseline {} holds no values", path.display()))?;
    Ok((profile, doc.sample_rate))
}

/// Saved baselines in `dir`, sorted by file name.
pub fn list_baselines(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !dir.exists() {
        return Ok(found);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(BASELINE_EXT) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("noisefloor-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn dump_is_little_endian_low_byte_first() {
        let mut writer = PcmWriter::new(Vec::new());
        writer.write_samples(&[0x1234, -2]).unwrap();
        writer.write_samples(&[1]).unwrap();
        assert_eq!(writer.samples_written(), 3);
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes, vec![0x34, 0x12, 0xFE, 0xFF, 0x01, 0x00]);
        assert_eq!(decode_pcm(&bytes), vec![0x1234, -2, 1]);
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        assert_eq!(decode_pcm(&[0x01, 0x00, 0x7F]), vec![1]);
    }

    #[test]
    fn baseline_survives_save_and_load() {
        let dir = scratch_dir("baseline");
        let path = dir.join("quiet_room.json");
        let profile = BaselineProfile::from_samples(&[12, -7, 32767, -32768, 0]).unwrap();

        save_baseline(&path, &profile, 44_100).unwrap();
        let (loaded, rate) = load_baseline(&path).unwrap();

        assert_eq!(rate, 44_100);
        assert_eq!(loaded, profile);
        assert_eq!(list_baselines(&dir).unwrap(), vec![path]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_baseline_file_is_rejected() {
        let dir = scratch_dir("empty");
        let path = dir.join("empty.json");
        std::fs::write(&path, r#"{"sample_rate":8000,"values":[]}"#).unwrap();
        assert!(load_baseline(&path).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn listing_a_missing_dir_is_empty() {
        let dir = std::env::temp_dir().join("noisefloor-no-such-dir");
        assert!(list_baselines(&dir).unwrap().is_empty());
    }
}
