use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::DEFAULT_SAMPLE_RATE;
use crate::engine::dispatch::DispatchIntervals;
use crate::engine::EngineOptions;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Microphone name; the system default when unset.
    #[serde(default)]
    pub device: Option<String>,
    /// 0 blocks reads indefinitely.
    #[serde(default)]
    pub read_timeout_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_spectrum")]
    pub spectrum: bool,
    /// 0 = next power of two of the buffer capacity.
    #[serde(default)]
    pub window_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_graph_interval")]
    pub graph_interval_ms: u64,
    #[serde(default = "default_snr_interval")]
    pub snr_interval_ms: u64,
    #[serde(default = "default_spectrum_interval")]
    pub spectrum_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            device: None,
            read_timeout_ms: 0,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            spectrum: default_spectrum(),
            window_size: 0,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            graph_interval_ms: default_graph_interval(),
            snr_interval_ms: default_snr_interval(),
            spectrum_interval_ms: default_spectrum_interval(),
        }
    }
}

impl CaptureConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

impl DisplayConfig {
    /// Dispatch intervals, clamped into 50..=500 ms.
    pub fn intervals(&self) -> DispatchIntervals {
        DispatchIntervals {
            graph: Duration::from_millis(self.graph_interval_ms),
            snr: Duration::from_millis(self.snr_interval_ms),
            spectrum: Duration::from_millis(self.spectrum_interval_ms),
        }
        .clamped()
    }
}

impl Config {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            intervals: self.display.intervals(),
            spectrum: self.analysis.spectrum,
            window_size: self.analysis.window_size,
        }
    }
}

fn default_sample_rate() -> u32 { DEFAULT_SAMPLE_RATE }
fn default_channel_capacity() -> usize { 64 }
fn default_spectrum() -> bool { true }
fn default_graph_interval() -> u64 { 100 }
fn default_snr_interval() -> u64 { 100 }
fn default_spectrum_interval() -> u64 { 250 }

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Explicit path, or auto-detect noisefloor.toml / the global config.
pub fn find_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("noisefloor.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("noisefloor").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("noisefloor").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

/// Where saved baselines live when no path is given.
pub fn baseline_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("noisefloor")
        .join("baselines")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.capture.sample_rate, 44_100);
        assert_eq!(config.capture.read_timeout(), None);
        assert!(config.analysis.spectrum);
        assert_eq!(config.display.intervals(), DispatchIntervals::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [capture]
            device = "USB Mic"
            read_timeout_ms = 750

            [display]
            snr_interval_ms = 20
            spectrum_interval_ms = 400
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.device.as_deref(), Some("USB Mic"));
        assert_eq!(config.capture.read_timeout(), Some(Duration::from_millis(750)));
        assert_eq!(config.capture.channel_capacity, 64);

        let intervals = config.display.intervals();
        assert_eq!(intervals.graph, Duration::from_millis(100));
        assert_eq!(intervals.snr, Duration::from_millis(50));
        assert_eq!(intervals.spectrum, Duration::from_millis(400));
    }

    #[test]
    fn load_config_reports_bad_toml() {
        let path = std::env::temp_dir().join(format!("noisefloor-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[capture\nsample_rate = 1").unwrap();
        assert!(load_config(&path).is_err());
        std::fs::write(&path, "[analysis]\nwindow_size = 1024\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.engine_options().window_size, 1024);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn explicit_config_path_wins() {
        let path = Path::new("/nonexistent/custom.toml");
        assert_eq!(find_config_path(Some(path)), Some(path.to_path_buf()));
    }
}
