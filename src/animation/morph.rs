//! Bounded named-channel store over external morph-target meshes
//!
//! The scene graph owns the meshes; the driver only keeps `Weak` handles and a
//! memoized binding per logical channel. Writes are clamped to `[0, 1]` and a
//! write to a channel no mesh exposes is a silent no-op.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::assert_invariant;
use crate::errors::AvatarError;
use crate::invariant_ppt::CHANNEL_IN_RANGE;

/// Logical facial channels driven by the animation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaceChannel {
    MouthOpen,
    BlinkLeft,
    BlinkRight,
    Smile,
}

impl FaceChannel {
    pub const ALL: [FaceChannel; 4] = [
        FaceChannel::MouthOpen,
        FaceChannel::BlinkLeft,
        FaceChannel::BlinkRight,
        FaceChannel::Smile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FaceChannel::MouthOpen => "mouthOpen",
            FaceChannel::BlinkLeft => "blinkLeft",
            FaceChannel::BlinkRight => "blinkRight",
            FaceChannel::Smile => "smile",
        }
    }

    /// Source morph-target names accepted for this channel, in priority order
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            FaceChannel::MouthOpen => &[
                "mouthOpen",
                "Mouth_Open",
                "jawOpen",
                "Viseme_ah",
                "viseme_ah",
                "Mouth.AH",
            ],
            FaceChannel::BlinkLeft => &["Blink_Left", "blink_left"],
            FaceChannel::BlinkRight => &["Blink_Right", "blink_right"],
            FaceChannel::Smile => &["Smile", "smile"],
        }
    }
}

impl fmt::Display for FaceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaceChannel {
    type Err = AvatarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FaceChannel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| AvatarError::UnresolvedChannel(s.to_string()))
    }
}

/// A mesh exposing a morph-target dictionary
///
/// Implemented by the rendering layer. Influences are written through shared
/// references because the scene graph, not the driver, owns the mesh.
pub trait MorphMesh: Send + Sync {
    /// Index of the morph target called `name`, if the mesh has one
    fn morph_index(&self, name: &str) -> Option<usize>;

    fn set_influence(&self, index: usize, value: f32);
}

/// Normalized binding of a logical channel to one mesh target
#[derive(Clone)]
pub struct ChannelBinding {
    mesh: Weak<dyn MorphMesh>,
    index: usize,
    source_name: &'static str,
}

impl ChannelBinding {
    pub fn index(&self) -> usize {
        self.index
    }

    /// The alias that matched during resolution
    pub fn source_name(&self) -> &'static str {
        self.source_name
    }
}

impl fmt::Debug for ChannelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBinding")
            .field("index", &self.index)
            .field("source_name", &self.source_name)
            .field("mesh_alive", &(self.mesh.strong_count() > 0))
            .finish()
    }
}

/// Current value of a resolved channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MorphChannel {
    pub name: FaceChannel,
    pub value: f32,
}

struct BoundChannel {
    binding: ChannelBinding,
    value: f32,
}

/// Clamped channel store with one-time alias resolution
pub struct MorphDriver {
    meshes: Vec<Weak<dyn MorphMesh>>,
    // `None` memoizes a failed resolution so misses never re-scan.
    channels: HashMap<FaceChannel, Option<BoundChannel>>,
}

impl MorphDriver {
    pub fn new() -> Self {
        Self {
            meshes: Vec::new(),
            channels: HashMap::new(),
        }
    }

    pub fn with_meshes(meshes: &[Arc<dyn MorphMesh>]) -> Self {
        let mut driver = Self::new();
        for mesh in meshes {
            driver.attach(mesh);
        }
        driver
    }

    /// Attach a mesh for future resolution.
    ///
    /// Memoized misses are forgotten so the next write can bind to the new mesh;
    /// existing bindings are kept.
    pub fn attach(&mut self, mesh: &Arc<dyn MorphMesh>) {
        self.meshes.push(Arc::downgrade(mesh));
        self.channels.retain(|_, slot| slot.is_some());
    }

    /// Resolve `channel` against the attached meshes once.
    ///
    /// The first mesh (in attach order) exposing any alias (in alias order) wins.
    /// Returns whether the channel is bound.
    pub fn resolve(&mut self, channel: FaceChannel) -> bool {
        if let Some(slot) = self.channels.get(&channel) {
            return slot.is_some();
        }

        let binding = self.scan(channel);
        match &binding {
            Some(b) => log::debug!(
                "Resolved morph channel {} -> {} (index {})",
                channel,
                b.source_name,
                b.index
            ),
            None => log::debug!("Morph channel {} has no matching target", channel),
        }

        let bound = binding.map(|binding| BoundChannel {
            binding,
            value: 0.0,
        });
        let resolved = bound.is_some();
        self.channels.insert(channel, bound);
        resolved
    }

    fn scan(&self, channel: FaceChannel) -> Option<ChannelBinding> {
        for weak in &self.meshes {
            let Some(mesh) = weak.upgrade() else {
                continue;
            };
            for alias in channel.aliases() {
                if let Some(index) = mesh.morph_index(alias) {
                    return Some(ChannelBinding {
                        mesh: weak.clone(),
                        index,
                        source_name: alias,
                    });
                }
            }
        }
        None
    }

    pub fn is_resolved(&mut self, channel: FaceChannel) -> bool {
        self.resolve(channel)
    }

    /// Clamp `value` to `[0, 1]` and write it; unresolved channels are ignored.
    pub fn set_channel(&mut self, channel: FaceChannel, value: f32) {
        if !self.resolve(channel) {
            return;
        }
        let Some(Some(bound)) = self.channels.get_mut(&channel) else {
            return;
        };

        let clamped = if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        };
        bound.value = clamped;
        assert_invariant!(
            (0.0..=1.0).contains(&bound.value),
            CHANNEL_IN_RANGE,
            "MorphDriver::set_channel"
        );

        if let Some(mesh) = bound.binding.mesh.upgrade() {
            mesh.set_influence(bound.binding.index, clamped);
        }
        log::trace!("{} = {:.3}", channel, clamped);
    }

    /// Write by logical name; unknown names are ignored like unresolved channels.
    pub fn set_named(&mut self, name: &str, value: f32) {
        if let Ok(channel) = name.parse::<FaceChannel>() {
            self.set_channel(channel, value);
        }
    }

    /// Current value, `0.0` for unresolved channels
    pub fn value(&self, channel: FaceChannel) -> f32 {
        match self.channels.get(&channel) {
            Some(Some(bound)) => bound.value,
            _ => 0.0,
        }
    }

    pub fn binding(&self, channel: FaceChannel) -> Option<&ChannelBinding> {
        match self.channels.get(&channel) {
            Some(Some(bound)) => Some(&bound.binding),
            _ => None,
        }
    }

    /// Snapshot of all resolved channels, ordered by channel
    pub fn channels(&self) -> Vec<MorphChannel> {
        let mut out: Vec<MorphChannel> = self
            .channels
            .iter()
            .filter_map(|(name, slot)| {
                slot.as_ref().map(|bound| MorphChannel {
                    name: *name,
                    value: bound.value,
                })
            })
            .collect();
        out.sort_by_key(|c| c.name);
        out
    }
}

impl Default for MorphDriver {
    fn default() -> Self {
        Self::new()
    }
}
