//! Configuration management for CrabAvatar
//!
//! Provides configuration loading, saving, and validation for animation
//! timing, lip-sync tuning, emotion reactions, signaling and ICE servers.

use crate::errors::AvatarError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarConfig {
    pub animation: AnimationConfig,
    pub lipsync: LipSyncConfig,
    pub emotion: EmotionConfig,
    pub signaling: SignalingConfig,
    pub rtc: RtcConfig,
}

/// Blink and tween timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationConfig {
    /// Lid closing duration in milliseconds
    pub blink_close_ms: u64,
    /// Lid opening duration in milliseconds
    pub blink_open_ms: u64,
    /// Lower bound (inclusive) of the idle wait between blinks
    pub blink_min_interval_ms: u64,
    /// Upper bound (exclusive) of the idle wait between blinks
    pub blink_max_interval_ms: u64,
    /// Duration used when a tween is requested without one
    pub default_tween_ms: u64,
}

/// Audio-energy to mouth mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LipSyncConfig {
    /// Multiplier applied to normalized RMS energy
    pub gain: f32,
    /// Exponential smoothing factor (0.0-1.0]
    pub smoothing: f32,
    /// Per-tick multiplier while decaying after stop (0.0-1.0)
    pub decay_factor: f32,
    /// Decay halts and snaps to zero below this value
    pub decay_epsilon: f32,
    /// Synthetic mouth oscillation frequency when no analyser is attached
    pub fallback_frequency_hz: f32,
    /// Peak of the synthetic mouth oscillation
    pub fallback_intensity: f32,
}

/// Emoji reaction timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionConfig {
    pub ease_ms: u64,
    /// Delay after the last reaction before channels ease back to rest
    pub revert_delay_ms: u64,
    /// How long the visual flash stays visible
    pub flash_ms: u64,
}

/// Signaling endpoint and reconnect policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Base WebSocket URL, e.g. `ws://127.0.0.1:8000`
    pub server_url: String,
    pub room: String,
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
    pub max_attempts: u32,
}

/// Peer connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtcConfig {
    pub ice_servers: Vec<String>,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            animation: AnimationConfig {
                blink_close_ms: 60,
                blink_open_ms: 60,
                blink_min_interval_ms: 2500,
                blink_max_interval_ms: 5000,
                default_tween_ms: 250,
            },
            lipsync: LipSyncConfig {
                gain: 1.5,
                smoothing: 0.3,
                decay_factor: 0.7,
                decay_epsilon: 0.01,
                fallback_frequency_hz: 5.0 / std::f32::consts::TAU,
                fallback_intensity: 0.7,
            },
            emotion: EmotionConfig {
                ease_ms: 250,
                revert_delay_ms: 1000,
                flash_ms: 600,
            },
            signaling: SignalingConfig {
                server_url: "ws://127.0.0.1:8000".to_string(),
                room: "default".to_string(),
                base_delay_ms: 1000,
                cap_delay_ms: 30_000,
                max_attempts: 5,
            },
            rtc: RtcConfig {
                ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            },
        }
    }
}

impl AvatarConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AvatarError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| AvatarError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AvatarConfig = toml::from_str(&contents)
            .map_err(|e| AvatarError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load defaults, then the TOML file if present, then `CRABAVATAR__*` environment overrides
    ///
    /// `CRABAVATAR__SIGNALING__ROOM=lobby` overrides `signaling.room`.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, AvatarError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| AvatarError::Config(format!("Failed to seed defaults: {}", e)))?;

        let layered = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("CRABAVATAR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AvatarError::Config(format!("Failed to layer config: {}", e)))?;

        let config: AvatarConfig = layered
            .try_deserialize()
            .map_err(|e| AvatarError::Config(format!("Failed to deserialize config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), AvatarError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AvatarError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| AvatarError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| AvatarError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabavatar.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), AvatarError> {
        let invalid = |msg: &str| Err(AvatarError::Config(msg.to_string()));

        let anim = &self.animation;
        if anim.blink_close_ms == 0 || anim.blink_open_ms == 0 {
            return invalid("Blink phase durations must be positive");
        }
        if anim.blink_min_interval_ms >= anim.blink_max_interval_ms {
            return invalid("Blink interval lower bound must be below the upper bound");
        }

        let lip = &self.lipsync;
        if !(lip.gain > 0.0) {
            return invalid("Lip-sync gain must be positive");
        }
        if !(lip.smoothing > 0.0 && lip.smoothing <= 1.0) {
            return invalid("Lip-sync smoothing must be in (0.0, 1.0]");
        }
        if !(lip.decay_factor > 0.0 && lip.decay_factor < 1.0) {
            return invalid("Decay factor must be in (0.0, 1.0)");
        }
        if !(lip.decay_epsilon > 0.0) {
            return invalid("Decay epsilon must be positive");
        }
        if !(0.0..=1.0).contains(&lip.fallback_intensity) {
            return invalid("Fallback intensity must be between 0.0 and 1.0");
        }

        let sig = &self.signaling;
        if sig.base_delay_ms == 0 || sig.base_delay_ms > sig.cap_delay_ms {
            return invalid("Reconnect base delay must be positive and not exceed the cap");
        }
        if sig.max_attempts == 0 {
            return invalid("Reconnect attempts must be at least 1");
        }
        if !crate::signaling::is_valid_room_id(&sig.room) {
            return invalid("Room id must be 1-50 characters of [A-Za-z0-9_-]");
        }

        Ok(())
    }
}
