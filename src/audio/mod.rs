pub mod analysis;
pub mod baseline;
pub mod buffer;
pub mod decode;
pub mod features;
pub mod mic_test;
pub mod snr;
