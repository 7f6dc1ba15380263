//! Synthetic analyser output and a scripted magnitude source
//!
//! Enables lip-sync testing without an audio device or a playback pipeline.

use std::collections::VecDeque;

use crate::animation::MagnitudeSource;

/// Analyser frame for a voice-like signal at animation frame `frame`
///
/// Syllables are modelled as a ~4 Hz loudness envelope at 60 fps; energy is
/// concentrated in the low bins and falls off towards the top of the spectrum.
pub fn synthetic_magnitudes(frame: u64, bins: usize) -> Vec<u8> {
    let t = frame as f64 / 60.0;
    let envelope = 0.5 + 0.5 * (std::f64::consts::TAU * 4.0 * t).sin();

    (0..bins)
        .map(|bin| {
            let falloff = 1.0 - bin as f64 / bins.max(1) as f64;
            (255.0 * envelope * falloff * falloff).round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Silent analyser frame
pub fn silent_magnitudes(bins: usize) -> Vec<u8> {
    vec![0; bins]
}

/// Characteristics of a typical browser analyser node
pub struct AnalyserCharacteristics {
    /// FFT size used by the analyser
    pub fft_size: usize,
    /// Number of magnitude bins exposed per frame (`fft_size / 2`)
    pub bin_count: usize,
    /// Animation frame rate the snapshots are taken at
    pub frame_rate: f32,
}

impl Default for AnalyserCharacteristics {
    fn default() -> Self {
        Self {
            fft_size: 256,
            bin_count: 128,
            frame_rate: 60.0,
        }
    }
}

/// Magnitude source replaying prepared frames
pub struct ScriptedMagnitudes {
    frames: VecDeque<Vec<u8>>,
    repeat_last: bool,
}

impl ScriptedMagnitudes {
    /// Yields each frame once, then reports no fresh data
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames: frames.into(),
            repeat_last: false,
        }
    }

    /// Yields the same frame forever
    pub fn constant(frame: Vec<u8>) -> Self {
        Self {
            frames: VecDeque::from([frame]),
            repeat_last: true,
        }
    }

    /// The first `count` frames of [`synthetic_magnitudes`]
    pub fn synthetic(count: u64, bins: usize) -> Self {
        Self::new((0..count).map(|f| synthetic_magnitudes(f, bins)).collect())
    }
}

impl MagnitudeSource for ScriptedMagnitudes {
    fn snapshot(&mut self, buf: &mut Vec<u8>) -> bool {
        let frame = if self.repeat_last && self.frames.len() == 1 {
            self.frames.front().cloned()
        } else {
            self.frames.pop_front()
        };
        match frame {
            Some(frame) => {
                buf.clear();
                buf.extend_from_slice(&frame);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::rms_energy;

    #[test]
    fn test_synthetic_magnitudes_size() {
        assert_eq!(synthetic_magnitudes(0, 128).len(), 128);
        assert!(synthetic_magnitudes(3, 0).is_empty());
    }

    #[test]
    fn test_synthetic_envelope_varies() {
        let energies: Vec<f32> = (0..15).map(|f| rms_energy(&synthetic_magnitudes(f, 64))).collect();
        let max = energies.iter().cloned().fold(0.0, f32::max);
        let min = energies.iter().cloned().fold(1.0, f32::min);
        assert!(max - min > 0.2);
    }

    #[test]
    fn test_scripted_frames_run_out() {
        let mut source = ScriptedMagnitudes::new(vec![vec![1], vec![2]]);
        let mut buf = Vec::new();
        assert!(source.snapshot(&mut buf));
        assert_eq!(buf, vec![1]);
        assert!(source.snapshot(&mut buf));
        assert_eq!(buf, vec![2]);
        assert!(!source.snapshot(&mut buf));
        assert_eq!(buf, vec![2]);
    }

    #[test]
    fn test_constant_repeats() {
        let mut source = ScriptedMagnitudes::constant(vec![9; 4]);
        let mut buf = Vec::new();
        for _ in 0..5 {
            assert!(source.snapshot(&mut buf));
            assert_eq!(buf, vec![9; 4]);
        }
    }

    #[test]
    fn test_analyser_defaults() {
        let analyser = AnalyserCharacteristics::default();
        assert_eq!(analyser.bin_count, analyser.fft_size / 2);
    }
}
