//! PCM window to analyser-style byte magnitudes
//!
//! Mirrors a browser analyser node: Hann-windowed DFT, magnitudes in decibels
//! mapped linearly from `[MIN_DB, MAX_DB]` onto `[0, 255]`.

use std::f32::consts::TAU;

pub const MIN_DB: f32 = -100.0;
pub const MAX_DB: f32 = -30.0;

/// Write `window.len() / 2` magnitude bins for `window` into `out`
pub fn byte_magnitudes(window: &[f32], out: &mut Vec<u8>) {
    out.clear();
    let n = window.len();
    if n < 2 {
        return;
    }

    let hann: Vec<f32> = (0..n)
        .map(|i| 0.5 - 0.5 * (TAU * i as f32 / (n - 1) as f32).cos())
        .collect();

    for k in 0..n / 2 {
        let (mut re, mut im) = (0.0f32, 0.0f32);
        for (i, (&x, &w)) in window.iter().zip(&hann).enumerate() {
            let phase = TAU * (k * i) as f32 / n as f32;
            re += x * w * phase.cos();
            im -= x * w * phase.sin();
        }
        let magnitude = (re * re + im * im).sqrt() / n as f32;
        let db = 20.0 * magnitude.max(1e-10).log10();
        let scaled = (db - MIN_DB) / (MAX_DB - MIN_DB) * 255.0;
        out.push(scaled.clamp(0.0, 255.0) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::rms_energy;

    #[test]
    fn test_silence_maps_to_zero() {
        let mut out = Vec::new();
        byte_magnitudes(&[0.0; 256], &mut out);
        assert_eq!(out.len(), 128);
        assert!(out.iter().all(|&m| m == 0));
    }

    #[test]
    fn test_tone_peaks_in_its_bin() {
        let n = 256;
        let window: Vec<f32> = (0..n).map(|i| 0.5 * (TAU * 16.0 * i as f32 / n as f32).sin()).collect();
        let mut out = Vec::new();
        byte_magnitudes(&window, &mut out);

        let peak = out.iter().enumerate().max_by_key(|&(_, &m)| m).map(|(i, _)| i);
        assert_eq!(peak, Some(16));
        assert!(rms_energy(&out) > 0.0);
    }

    #[test]
    fn test_tiny_window() {
        let mut out = vec![1, 2, 3];
        byte_magnitudes(&[0.3], &mut out);
        assert!(out.is_empty());
    }
}
