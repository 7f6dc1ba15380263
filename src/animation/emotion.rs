//! Emoji-triggered facial reactions with automatic revert
//!
//! `mouthOpen` belongs to lip-sync while it is active. A reaction that also
//! targets it is allowed; whichever component writes later in the tick wins.

use std::collections::BTreeSet;

use super::morph::{FaceChannel, MorphDriver};
use super::tween::TweenEngine;
use crate::config::EmotionConfig;
use crate::timing::Deadline;

/// UI collaborator that shows the transient emoji flash
pub trait FlashSink: Send {
    fn flash(&mut self, symbol: &str, duration_ms: u64);
}

/// Flash sink that only logs
#[derive(Debug, Default)]
pub struct LogFlash;

impl FlashSink for LogFlash {
    fn flash(&mut self, symbol: &str, duration_ms: u64) {
        log::debug!("Flash {} for {}ms", symbol, duration_ms);
    }
}

/// Channel targets for a reaction symbol, `None` for unknown symbols
pub fn reaction_for(symbol: &str) -> Option<&'static [(FaceChannel, f32)]> {
    match symbol {
        "😊" | "😉" | "👍" => Some(&[(FaceChannel::Smile, 1.0)]),
        "😮" => Some(&[(FaceChannel::MouthOpen, 0.8)]),
        "😡" => Some(&[(FaceChannel::MouthOpen, 0.5)]),
        _ => None,
    }
}

pub struct EmotionReactor {
    revert: Deadline,
    affected: BTreeSet<FaceChannel>,
    ease_ms: u64,
    revert_delay_ms: u64,
    flash_ms: u64,
    flash: Box<dyn FlashSink>,
}

impl EmotionReactor {
    pub fn new(config: &EmotionConfig) -> Self {
        Self::with_flash(config, Box::new(LogFlash))
    }

    pub fn with_flash(config: &EmotionConfig, flash: Box<dyn FlashSink>) -> Self {
        Self {
            revert: Deadline::disarmed(),
            affected: BTreeSet::new(),
            ease_ms: config.ease_ms,
            revert_delay_ms: config.revert_delay_ms,
            flash_ms: config.flash_ms,
            flash,
        }
    }

    /// When the pending revert is due
    pub fn revert_at(&self) -> Option<u64> {
        self.revert.at_ms()
    }

    /// Channels that will ease back to rest on the next revert
    pub fn affected(&self) -> impl Iterator<Item = FaceChannel> + '_ {
        self.affected.iter().copied()
    }

    /// React to `symbol`; returns false for unknown symbols, which change nothing.
    ///
    /// Every reaction reschedules the single revert to `now + revert_delay`.
    pub fn react_emoji(
        &mut self,
        symbol: &str,
        now_ms: u64,
        tweens: &mut TweenEngine,
        driver: &mut MorphDriver,
    ) -> bool {
        let Some(targets) = reaction_for(symbol) else {
            log::debug!("Ignoring unknown reaction {:?}", symbol);
            return false;
        };

        for &(channel, target) in targets {
            if tweens.ease_to(driver, channel, target, self.ease_ms, now_ms) {
                self.affected.insert(channel);
            }
        }
        self.flash.flash(symbol, self.flash_ms);
        self.revert.arm(now_ms.saturating_add(self.revert_delay_ms));
        true
    }

    /// Drop the pending revert without touching channel values
    pub fn cancel(&mut self) {
        self.revert.cancel();
        self.affected.clear();
    }

    pub fn tick(&mut self, now_ms: u64, tweens: &mut TweenEngine, driver: &mut MorphDriver) {
        if !self.revert.fire(now_ms) {
            return;
        }
        for channel in std::mem::take(&mut self.affected) {
            tweens.ease_to(driver, channel, 0.0, self.ease_ms, now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::morph::MorphMesh;
    use crate::config::AvatarConfig;
    use crate::testing::{RecordingFlash, RecordingMesh};
    use std::sync::Arc;

    struct Fixture {
        _mesh: Arc<dyn MorphMesh>,
        driver: MorphDriver,
        tweens: TweenEngine,
        reactor: EmotionReactor,
        flash: RecordingFlash,
    }

    fn setup() -> Fixture {
        let mesh: Arc<dyn MorphMesh> = Arc::new(RecordingMesh::new(&["Smile", "mouthOpen"]));
        let flash = RecordingFlash::default();
        let reactor =
            EmotionReactor::with_flash(&AvatarConfig::default().emotion, Box::new(flash.clone()));
        Fixture {
            driver: MorphDriver::with_meshes(std::slice::from_ref(&mesh)),
            _mesh: mesh,
            tweens: TweenEngine::new(),
            reactor,
            flash,
        }
    }

    #[test]
    fn test_unknown_symbol_is_ignored() {
        let Fixture {
            _mesh,
            mut driver,
            mut tweens,
            mut reactor,
            flash,
        } = setup();
        assert!(!reactor.react_emoji("🦀", 0, &mut tweens, &mut driver));
        assert!(tweens.is_empty());
        assert_eq!(reactor.revert_at(), None);
        assert!(flash.flashes().is_empty());
    }

    #[test]
    fn test_reaction_flashes_and_schedules_revert() {
        let Fixture {
            _mesh,
            mut driver,
            mut tweens,
            mut reactor,
            flash,
        } = setup();
        assert!(reactor.react_emoji("😮", 100, &mut tweens, &mut driver));
        assert!(tweens.is_animating(FaceChannel::MouthOpen));
        assert_eq!(reactor.revert_at(), Some(1100));
        assert_eq!(flash.flashes(), vec![("😮".to_string(), 600)]);
    }

    #[test]
    fn test_new_reaction_reschedules_single_revert() {
        let Fixture {
            _mesh,
            mut driver,
            mut tweens,
            mut reactor,
            ..
        } = setup();
        reactor.react_emoji("😊", 0, &mut tweens, &mut driver);
        reactor.react_emoji("😮", 600, &mut tweens, &mut driver);
        assert_eq!(reactor.revert_at(), Some(1600));

        reactor.tick(1000, &mut tweens, &mut driver);
        assert_eq!(reactor.revert_at(), Some(1600));

        tweens.tick(&mut driver, 1000);
        reactor.tick(1600, &mut tweens, &mut driver);
        let reverting: Vec<_> = [FaceChannel::Smile, FaceChannel::MouthOpen]
            .into_iter()
            .filter(|c| tweens.active(*c).map(|t| t.target_value) == Some(0.0))
            .collect();
        assert_eq!(reverting.len(), 2);
        assert_eq!(reactor.affected().count(), 0);
    }

    #[test]
    fn test_smile_timeline() {
        let Fixture {
            _mesh,
            mut driver,
            mut tweens,
            mut reactor,
            ..
        } = setup();
        reactor.react_emoji("😊", 0, &mut tweens, &mut driver);

        let mut now = 0;
        while now <= 1300 {
            tweens.tick(&mut driver, now);
            reactor.tick(now, &mut tweens, &mut driver);
            if now == 250 || now == 1000 {
                assert_eq!(driver.value(FaceChannel::Smile), 1.0, "at {now}ms");
            }
            if now == 1250 {
                assert_eq!(driver.value(FaceChannel::Smile), 0.0);
            }
            now += 10;
        }
    }
}
