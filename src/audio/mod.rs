//! Microphone input for live lip-sync
//!
//! Submodules:
//! - `device`: input device enumeration
//! - `capture`: cpal capture exposed as a magnitude source
//! - `spectrum`: PCM window to analyser byte magnitudes

mod capture;
mod device;
pub mod spectrum;

pub use capture::{MicrophoneSource, WINDOW_SAMPLES};
pub use device::{list_audio_devices, AudioDevice};
