use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "noisefloor", about = "Microphone signal-to-noise and spectrum monitor")]
pub struct Cli {
    /// Config file (defaults to noisefloor.toml or the global config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Read from an audio file (WAV, MP3, FLAC, OGG) or raw .pcm dump instead of the microphone
    #[arg(short, long, global = true)]
    pub input: Option<PathBuf>,

    /// Microphone name (see `noisefloor devices`)
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Capture sample rate in Hz
    #[arg(long, global = true, default_value_t = 44_100)]
    pub sample_rate: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available microphones
    Devices,

    /// Record one buffer of ambient noise and save it
    Baseline {
        /// Output baseline file (defaults to a timestamped file in the baseline directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List saved baselines
    Baselines,

    /// Show live SNR against a baseline until Ctrl-C
    Monitor(MonitorArgs),

    /// Replay a raw PCM dump through SNR and spectrum analysis
    Analyze(AnalyzeArgs),

    /// Read the microphone for a few seconds and report its level
    TestMic {
        /// Test duration in seconds
        #[arg(long, default_value_t = 3.0)]
        seconds: f32,
    },
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Saved baseline to use instead of capturing a new one
    #[arg(short, long)]
    pub baseline: Option<PathBuf>,

    /// Append every captured frame to this raw PCM file
    #[arg(long)]
    pub dump: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<f32>,

    /// Print JSON lines instead of the SNR bar
    #[arg(long)]
    pub json: bool,

    /// Disable spectrum analysis
    #[arg(long)]
    pub no_spectrum: bool,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Raw PCM dump (16-bit little-endian mono)
    pub dump: PathBuf,

    /// Baseline file to compare against
    #[arg(short, long)]
    pub baseline: PathBuf,

    /// Samples per frame (defaults to 40 ms at the baseline's sample rate)
    #[arg(long)]
    pub frame_len: Option<usize>,

    /// FFT window size (power of two; defaults to the next power of two of the frame length)
    #[arg(long)]
    pub window_size: Option<usize>,

    /// Print the full per-frame report as JSON
    #[arg(long)]
    pub json: bool,
}
