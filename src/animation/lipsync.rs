//! Audio energy to mouth-open driver
//!
//! Live mode turns a per-frame frequency-magnitude snapshot into a smoothed
//! mouth value; fallback mode oscillates synthetically when no analyser is
//! attached. Lip-sync writes the driver directly (no easing) because it must
//! follow the audio frame by frame.

use serde::{Deserialize, Serialize};

use super::morph::{FaceChannel, MorphDriver};
use crate::config::LipSyncConfig;

/// Supplier of per-frame frequency magnitudes in `[0, 255]`
pub trait MagnitudeSource: Send {
    /// Replace the contents of `buf` with the latest snapshot.
    ///
    /// Returns false when no frame is available this tick.
    fn snapshot(&mut self, buf: &mut Vec<u8>) -> bool;
}

/// Root-mean-square of a magnitude buffer, normalized to `[0, 1]`
pub fn rms_energy(magnitudes: &[u8]) -> f32 {
    if magnitudes.is_empty() {
        return 0.0;
    }
    let sum: f64 = magnitudes.iter().map(|&m| (m as f64) * (m as f64)).sum();
    let rms = (sum / magnitudes.len() as f64).sqrt() / 255.0;
    rms.clamp(0.0, 1.0) as f32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LipSyncMode {
    Live,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LipSyncState {
    pub active: bool,
    pub mode: LipSyncMode,
    pub last_value: f32,
    pub smoothing: f32,
}

pub struct LipSyncEngine {
    state: LipSyncState,
    decaying: bool,
    source: Option<Box<dyn MagnitudeSource>>,
    buffer: Vec<u8>,
    started_ms: u64,
    gain: f32,
    decay_factor: f32,
    decay_epsilon: f32,
    fallback_frequency_hz: f32,
    fallback_intensity: f32,
}

impl LipSyncEngine {
    pub fn new(config: &LipSyncConfig) -> Self {
        Self {
            state: LipSyncState {
                active: false,
                mode: LipSyncMode::Fallback,
                last_value: 0.0,
                smoothing: config.smoothing.clamp(f32::MIN_POSITIVE, 1.0),
            },
            decaying: false,
            source: None,
            buffer: Vec::with_capacity(1024),
            started_ms: 0,
            gain: config.gain,
            decay_factor: config.decay_factor,
            decay_epsilon: config.decay_epsilon,
            fallback_frequency_hz: config.fallback_frequency_hz,
            fallback_intensity: config.fallback_intensity,
        }
    }

    pub fn state(&self) -> LipSyncState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    /// Whether the post-stop decay loop is still running
    pub fn is_decaying(&self) -> bool {
        self.decaying
    }

    /// Start driving the mouth; live when a source is supplied, synthetic otherwise.
    ///
    /// Any running loop (including a decay) is stopped first.
    pub fn start(&mut self, source: Option<Box<dyn MagnitudeSource>>, now_ms: u64) {
        self.decaying = false;
        self.state.mode = if source.is_some() {
            LipSyncMode::Live
        } else {
            LipSyncMode::Fallback
        };
        self.source = source;
        self.started_ms = now_ms;
        self.state.active = true;
        log::debug!("Lip-sync started in {:?} mode", self.state.mode);
    }

    /// Stop and decay the mouth towards zero over the following ticks.
    ///
    /// Idempotent: an inactive engine never spawns a second decay.
    pub fn stop(&mut self) {
        if !self.state.active {
            return;
        }
        self.state.active = false;
        self.source = None;
        self.decaying = true;
        log::debug!("Lip-sync stopping, decaying from {:.3}", self.state.last_value);
    }

    /// Target value for a magnitude snapshot before smoothing
    pub fn target_for(&self, magnitudes: &[u8]) -> f32 {
        (rms_energy(magnitudes) * self.gain).clamp(0.0, 1.0)
    }

    fn fallback_value(&self, now_ms: u64) -> f32 {
        let t = now_ms.saturating_sub(self.started_ms) as f32 / 1000.0;
        let phase = std::f32::consts::TAU * t * self.fallback_frequency_hz;
        (0.5 + 0.5 * phase.sin()) * self.fallback_intensity
    }

    pub fn tick(&mut self, now_ms: u64, driver: &mut MorphDriver) {
        if self.state.active {
            let value = match self.state.mode {
                LipSyncMode::Live => {
                    let fresh = match self.source.as_mut() {
                        Some(source) => source.snapshot(&mut self.buffer),
                        None => false,
                    };
                    if fresh {
                        let target = self.target_for(&self.buffer);
                        self.state.last_value +=
                            (target - self.state.last_value) * self.state.smoothing;
                    }
                    self.state.last_value
                }
                LipSyncMode::Fallback => {
                    self.state.last_value = self.fallback_value(now_ms);
                    self.state.last_value
                }
            };
            driver.set_channel(FaceChannel::MouthOpen, value);
        } else if self.decaying {
            self.state.last_value *= self.decay_factor;
            if self.state.last_value < self.decay_epsilon {
                self.state.last_value = 0.0;
                self.decaying = false;
                driver.set_channel(FaceChannel::MouthOpen, 0.0);
                log::debug!("Lip-sync decay finished");
            } else {
                driver.set_channel(FaceChannel::MouthOpen, self.state.last_value);
            }
        }
    }
}
