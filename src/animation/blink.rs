//! Periodic randomized blinking
//!
//! Each cycle closes both lids, opens them again, then idles for a random
//! interval drawn uniformly from `[min, max)` milliseconds.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::morph::{FaceChannel, MorphDriver};
use super::tween::{Easing, TweenEngine};
use crate::config::AnimationConfig;
use crate::timing::Deadline;

const LIDS: [FaceChannel; 2] = [FaceChannel::BlinkLeft, FaceChannel::BlinkRight];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkPhase {
    Stopped,
    Closing,
    Opening,
    Waiting,
}

pub struct BlinkScheduler {
    phase: BlinkPhase,
    timer: Deadline,
    close_ms: u64,
    open_ms: u64,
    min_interval_ms: u64,
    max_interval_ms: u64,
    rng: StdRng,
    completed: u64,
}

impl BlinkScheduler {
    pub fn new(config: &AnimationConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic scheduler for tests and traces
    pub fn with_seed(config: &AnimationConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &AnimationConfig, rng: StdRng) -> Self {
        Self {
            phase: BlinkPhase::Stopped,
            timer: Deadline::disarmed(),
            close_ms: config.blink_close_ms,
            open_ms: config.blink_open_ms,
            min_interval_ms: config.blink_min_interval_ms,
            max_interval_ms: config
                .blink_max_interval_ms
                .max(config.blink_min_interval_ms.saturating_add(1)),
            rng,
            completed: 0,
        }
    }

    pub fn phase(&self) -> BlinkPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase != BlinkPhase::Stopped
    }

    /// Number of finished close/open cycles
    pub fn completed_blinks(&self) -> u64 {
        self.completed
    }

    /// When the pending phase change is due
    pub fn next_event_ms(&self) -> Option<u64> {
        self.timer.at_ms()
    }

    /// Draw the idle wait before the next blink
    pub fn next_interval(&mut self) -> u64 {
        // Only reachable when the minimum is already u64::MAX.
        if self.min_interval_ms >= self.max_interval_ms {
            return self.min_interval_ms;
        }
        self.rng.gen_range(self.min_interval_ms..self.max_interval_ms)
    }

    /// Start blinking immediately; a running scheduler is left untouched.
    pub fn start(&mut self, now_ms: u64, tweens: &mut TweenEngine, driver: &mut MorphDriver) {
        if self.is_running() {
            return;
        }
        log::debug!("Blink scheduler started");
        self.begin_close(now_ms, tweens, driver);
    }

    /// Cancel the pending timer. Lids caught mid-blink are eased open.
    pub fn stop(&mut self, now_ms: u64, tweens: &mut TweenEngine, driver: &mut MorphDriver) {
        self.timer.cancel();
        if matches!(self.phase, BlinkPhase::Closing | BlinkPhase::Opening) {
            self.ease_lids(0.0, self.open_ms, now_ms, tweens, driver);
        }
        if self.phase != BlinkPhase::Stopped {
            log::debug!("Blink scheduler stopped");
        }
        self.phase = BlinkPhase::Stopped;
    }

    pub fn tick(&mut self, now_ms: u64, tweens: &mut TweenEngine, driver: &mut MorphDriver) {
        if !self.timer.fire(now_ms) {
            return;
        }

        match self.phase {
            BlinkPhase::Closing => {
                self.ease_lids(0.0, self.open_ms, now_ms, tweens, driver);
                self.phase = BlinkPhase::Opening;
                self.timer.arm(now_ms.saturating_add(self.open_ms));
            }
            BlinkPhase::Opening => {
                self.completed += 1;
                let wait = self.next_interval();
                self.phase = BlinkPhase::Waiting;
                self.timer.arm(now_ms.saturating_add(wait));
            }
            BlinkPhase::Waiting => self.begin_close(now_ms, tweens, driver),
            BlinkPhase::Stopped => {}
        }
    }

    fn begin_close(&mut self, now_ms: u64, tweens: &mut TweenEngine, driver: &mut MorphDriver) {
        self.ease_lids(1.0, self.close_ms, now_ms, tweens, driver);
        self.phase = BlinkPhase::Closing;
        self.timer.arm(now_ms.saturating_add(self.close_ms));
    }

    fn ease_lids(
        &self,
        target: f32,
        duration_ms: u64,
        now_ms: u64,
        tweens: &mut TweenEngine,
        driver: &mut MorphDriver,
    ) {
        for lid in LIDS {
            tweens.ease_to_with(driver, lid, target, duration_ms, Easing::Linear, now_ms);
        }
    }
}
