//! Microphone signal-to-noise and spectrum capture pipeline.
//!
//! A [`engine::CaptureEngine`] drives a [`device::CaptureDevice`] on one
//! capture thread: it records an ambient noise baseline, then estimates SNR
//! and magnitude spectra for every buffer read and forwards rate-limited
//! results to a [`sink::DisplaySink`].

pub mod audio;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod persist;
pub mod sink;

pub use error::{CaptureError, Result};
