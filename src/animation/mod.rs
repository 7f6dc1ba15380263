//! Facial animation for a morph-target avatar
//!
//! Submodules:
//! - `morph`: named-channel store bound to external meshes
//! - `tween`: per-channel eased transitions
//! - `blink`: randomized blink scheduling
//! - `lipsync`: audio energy to mouth movement
//! - `emotion`: emoji reactions with automatic revert
//! - `rig`: the per-frame composition of all of the above

pub mod blink;
pub mod emotion;
pub mod lipsync;
pub mod morph;
pub mod rig;
pub mod tween;

pub use blink::{BlinkPhase, BlinkScheduler};
pub use emotion::{reaction_for, EmotionReactor, FlashSink, LogFlash};
pub use lipsync::{rms_energy, LipSyncEngine, LipSyncMode, LipSyncState, MagnitudeSource};
pub use morph::{ChannelBinding, FaceChannel, MorphChannel, MorphDriver, MorphMesh};
pub use rig::AvatarRig;
pub use tween::{AnimationTween, Easing, TweenEngine};
