//! Recording stand-ins for the scene graph and the UI

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::animation::{FlashSink, MorphMesh};

/// Mesh with a fixed morph-target dictionary that records every write
pub struct RecordingMesh {
    names: Vec<String>,
    influences: Mutex<Vec<f32>>,
    writes: AtomicUsize,
    lookups: AtomicUsize,
}

impl RecordingMesh {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            influences: Mutex::new(vec![0.0; names.len()]),
            writes: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Last influence written to target `index`
    pub fn influence(&self, index: usize) -> f32 {
        self.influences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .copied()
            .unwrap_or(0.0)
    }

    /// Influence of the target called `name`
    pub fn influence_of(&self, name: &str) -> Option<f32> {
        let index = self.names.iter().position(|n| n == name)?;
        Some(self.influence(index))
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of dictionary lookups, one per alias probed
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl MorphMesh for RecordingMesh {
    fn morph_index(&self, name: &str) -> Option<usize> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.names.iter().position(|n| n == name)
    }

    fn set_influence(&self, index: usize, value: f32) {
        let mut influences = self
            .influences
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = influences.get_mut(index) {
            *slot = value;
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Flash sink that remembers what it was asked to show
#[derive(Clone, Default)]
pub struct RecordingFlash {
    flashes: Arc<Mutex<Vec<(String, u64)>>>,
}

impl RecordingFlash {
    pub fn flashes(&self) -> Vec<(String, u64)> {
        self.flashes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FlashSink for RecordingFlash {
    fn flash(&mut self, symbol: &str, duration_ms: u64) {
        self.flashes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((symbol.to_string(), duration_ms));
    }
}
