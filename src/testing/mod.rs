//! Testing utilities for CrabAvatar
//!
//! Synthetic analyser data and scripted collaborators so the animation and
//! call layers can be exercised without devices, a renderer or a network.

pub mod recording;
pub mod scripted;
pub mod synthetic_data;

pub use recording::{RecordingFlash, RecordingMesh};
pub use scripted::{ScriptedPeerConnector, ScriptedSignaling};
pub use synthetic_data::{
    silent_magnitudes, synthetic_magnitudes, AnalyserCharacteristics, ScriptedMagnitudes,
};
