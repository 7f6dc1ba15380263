//! Per-channel eased transitions
//!
//! At most one tween lives per channel; starting a new one replaces the old
//! one before its next step, so a superseded tween never writes again.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::morph::{FaceChannel, MorphDriver};
use crate::assert_invariant;
use crate::invariant_ppt::SINGLE_TWEEN_PER_CHANNEL;

/// Easing curves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Easing {
    Linear,
    #[default]
    CubicInOut,
}

impl Easing {
    /// Map linear progress in `[0, 1]` to eased progress in `[0, 1]`
    pub fn apply(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::CubicInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
        }
    }
}

/// A timed interpolation of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnimationTween {
    pub channel: FaceChannel,
    pub start_value: f32,
    pub target_value: f32,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub easing: Easing,
}

impl AnimationTween {
    /// Linear progress at `now_ms`, clamped to `[0, 1]`
    pub fn progress(&self, now_ms: u64) -> f32 {
        if self.duration_ms == 0 {
            return 1.0;
        }
        let elapsed = now_ms.saturating_sub(self.start_ms) as f32;
        (elapsed / self.duration_ms as f32).clamp(0.0, 1.0)
    }

    pub fn value_at(&self, now_ms: u64) -> f32 {
        let eased = self.easing.apply(self.progress(now_ms));
        self.start_value + (self.target_value - self.start_value) * eased
    }
}

/// Tween scheduler advanced once per animation tick
#[derive(Debug, Default)]
pub struct TweenEngine {
    tweens: HashMap<FaceChannel, AnimationTween>,
}

impl TweenEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ease `channel` to `target` with the default cubic in-out curve
    pub fn ease_to(
        &mut self,
        driver: &mut MorphDriver,
        channel: FaceChannel,
        target: f32,
        duration_ms: u64,
        now_ms: u64,
    ) -> bool {
        self.ease_to_with(driver, channel, target, duration_ms, Easing::default(), now_ms)
    }

    /// Replace any tween on `channel` with a new one starting from its current value.
    ///
    /// Returns false (and schedules nothing) when the channel is unresolved.
    pub fn ease_to_with(
        &mut self,
        driver: &mut MorphDriver,
        channel: FaceChannel,
        target: f32,
        duration_ms: u64,
        easing: Easing,
        now_ms: u64,
    ) -> bool {
        if !driver.is_resolved(channel) {
            return false;
        }

        let tween = AnimationTween {
            channel,
            start_value: driver.value(channel),
            target_value: target.clamp(0.0, 1.0),
            start_ms: now_ms,
            duration_ms,
            easing,
        };
        if self.tweens.insert(channel, tween).is_some() {
            log::trace!("Superseded tween on {}", channel);
        }
        true
    }

    /// Drop the tween on `channel` without a final write
    pub fn cancel(&mut self, channel: FaceChannel) -> bool {
        self.tweens.remove(&channel).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.tweens.clear();
    }

    pub fn active(&self, channel: FaceChannel) -> Option<&AnimationTween> {
        self.tweens.get(&channel)
    }

    pub fn is_animating(&self, channel: FaceChannel) -> bool {
        self.tweens.contains_key(&channel)
    }

    pub fn len(&self) -> usize {
        self.tweens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tweens.is_empty()
    }

    /// Advance every live tween one step; completed tweens write their target and stop.
    pub fn tick(&mut self, driver: &mut MorphDriver, now_ms: u64) {
        let mut finished = Vec::new();

        for (channel, tween) in &self.tweens {
            assert_invariant!(
                tween.channel == *channel,
                SINGLE_TWEEN_PER_CHANNEL,
                "TweenEngine::tick"
            );
            let progress = tween.progress(now_ms);
            if progress >= 1.0 {
                driver.set_channel(*channel, tween.target_value);
                finished.push(*channel);
            } else {
                driver.set_channel(*channel, tween.value_at(now_ms));
            }
        }

        for channel in finished {
            self.tweens.remove(&channel);
        }
    }
}
