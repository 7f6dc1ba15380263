//! CrabAvatar: real-time avatar animation drive and peer-to-peer call signaling
//!
//! This crate drives the facial channels of a morph-target avatar from audio
//! energy, a blink schedule and emoji reactions, and runs the signaling side
//! of a two-party call: room relay exchange, offer/answer negotiation, ICE
//! candidate buffering and reconnection with backoff.
//!
//! # Features
//! - `audio`: microphone capture as a live lip-sync source (cpal)
//! - `webrtc`: real peer connections for the call layer (webrtc-rs)
//!
//! # Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use crabavatar::{AvatarConfig, AvatarRig, CallSession, WsConnector};
//!
//! let config = AvatarConfig::load_or_default();
//! let mut rig = AvatarRig::new(&config, &meshes);
//! rig.start_blinking(clock.now_ms());
//! // once per frame:
//! rig.tick(clock.now_ms());
//!
//! let mut call = CallSession::new(&config.signaling, Arc::new(WsConnector::new()), peers)?;
//! call.start().await?;
//! call.run().await?;
//! ```
pub mod animation;
pub mod call;
pub mod config;
pub mod errors;
pub mod invariant_ppt;
pub mod signaling;
pub mod timing;

#[cfg(feature = "audio")]
pub mod audio;

#[cfg(feature = "webrtc")]
pub mod webrtc;

// Testing utilities - scripted doubles and synthetic data for offline testing
pub mod testing;

// Re-exports for convenience
pub use animation::{
    AvatarRig, BlinkScheduler, EmotionReactor, FaceChannel, LipSyncEngine, MagnitudeSource,
    MorphDriver, MorphMesh, TweenEngine,
};
pub use call::{CallHandle, CallSession, CallState, PeerConnector, PeerLink};
pub use config::AvatarConfig;
pub use errors::AvatarError;
pub use signaling::{SignalingChannel, SignalingConnector, SignalingMessage, WsConnector};
pub use timing::FrameClock;

#[cfg(feature = "audio")]
pub use audio::{list_audio_devices, MicrophoneSource};

#[cfg(feature = "webrtc")]
pub use webrtc::RtcPeerConnector;

/// Initialize logging for the avatar runtime
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabavatar=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        platform: std::env::consts::OS.to_string(),
        features: enabled_features(),
    }
}

fn enabled_features() -> Vec<String> {
    let mut features = Vec::new();
    if cfg!(feature = "audio") {
        features.push("audio".to_string());
    }
    if cfg!(feature = "webrtc") {
        features.push("webrtc".to_string());
    }
    features
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub platform: String,
    pub features: Vec<String>,
}
