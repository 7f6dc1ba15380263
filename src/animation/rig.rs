//! Composition root for one animated face
//!
//! Owns the driver and every animator, and fixes their order inside a tick:
//! tweens step first, then emotion and blink timers schedule new tweens, and
//! lip-sync writes last so it owns `mouthOpen` while speaking.

use std::sync::Arc;

use super::blink::BlinkScheduler;
use super::emotion::{EmotionReactor, FlashSink};
use super::lipsync::{LipSyncEngine, MagnitudeSource};
use super::morph::{FaceChannel, MorphChannel, MorphDriver, MorphMesh};
use super::tween::{Easing, TweenEngine};
use crate::config::AvatarConfig;

pub struct AvatarRig {
    driver: MorphDriver,
    tweens: TweenEngine,
    blink: BlinkScheduler,
    emotion: EmotionReactor,
    lipsync: LipSyncEngine,
    default_tween_ms: u64,
    last_tick_ms: u64,
}

impl AvatarRig {
    pub fn new(config: &AvatarConfig, meshes: &[Arc<dyn MorphMesh>]) -> Self {
        Self::from_parts(
            config,
            MorphDriver::with_meshes(meshes),
            BlinkScheduler::new(&config.animation),
            EmotionReactor::new(&config.emotion),
        )
    }

    /// Rig with a seeded blink generator and a custom flash sink
    pub fn with_seed(
        config: &AvatarConfig,
        meshes: &[Arc<dyn MorphMesh>],
        seed: u64,
        flash: Box<dyn FlashSink>,
    ) -> Self {
        Self::from_parts(
            config,
            MorphDriver::with_meshes(meshes),
            BlinkScheduler::with_seed(&config.animation, seed),
            EmotionReactor::with_flash(&config.emotion, flash),
        )
    }

    fn from_parts(
        config: &AvatarConfig,
        mut driver: MorphDriver,
        blink: BlinkScheduler,
        emotion: EmotionReactor,
    ) -> Self {
        let resolved: Vec<&str> = FaceChannel::ALL
            .into_iter()
            .filter(|c| driver.resolve(*c))
            .map(|c| c.as_str())
            .collect();
        log::info!("Avatar rig ready, resolved channels: {:?}", resolved);

        Self {
            driver,
            tweens: TweenEngine::new(),
            blink,
            emotion,
            lipsync: LipSyncEngine::new(&config.lipsync),
            default_tween_ms: config.animation.default_tween_ms,
            last_tick_ms: 0,
        }
    }

    pub fn driver(&self) -> &MorphDriver {
        &self.driver
    }

    pub fn tweens(&self) -> &TweenEngine {
        &self.tweens
    }

    pub fn blink(&self) -> &BlinkScheduler {
        &self.blink
    }

    pub fn lipsync(&self) -> &LipSyncEngine {
        &self.lipsync
    }

    pub fn emotion(&self) -> &EmotionReactor {
        &self.emotion
    }

    pub fn value(&self, channel: FaceChannel) -> f32 {
        self.driver.value(channel)
    }

    pub fn snapshot(&self) -> Vec<MorphChannel> {
        self.driver.channels()
    }

    pub fn start_blinking(&mut self, now_ms: u64) {
        self.blink.start(now_ms, &mut self.tweens, &mut self.driver);
    }

    pub fn stop_blinking(&mut self, now_ms: u64) {
        self.blink.stop(now_ms, &mut self.tweens, &mut self.driver);
    }

    pub fn react_emoji(&mut self, symbol: &str, now_ms: u64) -> bool {
        self.emotion
            .react_emoji(symbol, now_ms, &mut self.tweens, &mut self.driver)
    }

    /// Ease a channel with the configured default duration
    pub fn ease(&mut self, channel: FaceChannel, target: f32, now_ms: u64) -> bool {
        self.tweens.ease_to_with(
            &mut self.driver,
            channel,
            target,
            self.default_tween_ms,
            Easing::CubicInOut,
            now_ms,
        )
    }

    /// Toggle speech; a live source enables analyser-driven lip-sync.
    pub fn set_speaking(
        &mut self,
        speaking: bool,
        source: Option<Box<dyn MagnitudeSource>>,
        now_ms: u64,
    ) {
        if speaking {
            // Lip-sync owns mouthOpen from here on.
            self.tweens.cancel(FaceChannel::MouthOpen);
            self.lipsync.start(source, now_ms);
        } else {
            self.lipsync.stop();
        }
    }

    pub fn tick(&mut self, now_ms: u64) {
        if now_ms < self.last_tick_ms {
            log::warn!(
                "Non-monotonic tick {}ms after {}ms, clamping",
                now_ms,
                self.last_tick_ms
            );
        }
        let now_ms = now_ms.max(self.last_tick_ms);
        self.last_tick_ms = now_ms;

        self.tweens.tick(&mut self.driver, now_ms);
        self.emotion.tick(now_ms, &mut self.tweens, &mut self.driver);
        self.blink.tick(now_ms, &mut self.tweens, &mut self.driver);
        self.lipsync.tick(now_ms, &mut self.driver);
    }

    /// Stop every animator: timers cleared, tweens dropped, mouth decays.
    pub fn shutdown(&mut self, now_ms: u64) {
        self.blink.stop(now_ms, &mut self.tweens, &mut self.driver);
        self.emotion.cancel();
        self.lipsync.stop();
        self.tweens.cancel_all();
    }
}
