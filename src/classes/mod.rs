//! Class driver implementations.

pub mod audio;
pub mod audio_mic;
pub mod audio_spkr;
pub mod cdc_acm;
pub mod dfu;
pub mod hid;
pub mod msc;
pub mod printer;
