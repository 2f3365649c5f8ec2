//! YIN fundamental-frequency estimation.
//!
//! The difference function is built from an FFT cross-correlation so each
//! window costs O(n log n) instead of O(n^2).

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PitchSettings {
    /// Windows quieter than this level (dB relative to full scale) have no pitch.
    pub silence_db: f32,
    /// YIN absolute threshold on the normalized difference function.
    pub tolerance: f32,
    pub min_freq: f32,
    pub max_freq: f32,
}

impl Default for PitchSettings {
    fn default() -> Self {
        Self {
            silence_db: -40.0,
            tolerance: 0.15,
            min_freq: 50.0,
            max_freq: 2000.0,
        }
    }
}

/// A YIN detector planned for one window length. Shareable across threads.
pub struct YinDetector {
    window_len: usize,
    sample_rate: u32,
    settings: PitchSettings,
    fft_len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    taper: Vec<f32>,
}

impl YinDetector {
    pub fn new(window_len: usize, sample_rate: u32, settings: PitchSettings) -> Self {
        let fft_len = (2 * window_len.max(1)).next_power_of_two();
        let mut planner = FftPlanner::<f32>::new();
        Self {
            window_len,
            sample_rate,
            settings,
            fft_len,
            forward: planner.plan_fft_forward(fft_len),
            inverse: planner.plan_fft_inverse(fft_len),
            taper: hann_window(window_len),
        }
    }

    /// Lag search range `[tau_min, tau_max)` for this window and rate.
    fn lag_range(&self) -> (usize, usize) {
        let sr = self.sample_rate as f32;
        let half = self.window_len / 2;
        let tau_min = ((sr / self.settings.max_freq).floor() as usize).max(2);
        let tau_max = ((sr / self.settings.min_freq).ceil() as usize + 1).min(half);
        (tau_min, tau_max)
    }

    /// Estimate the fundamental frequency of `window` in Hz.
    ///
    /// `window` must hold exactly `window_len` samples. Returns `None` for
    /// silent windows and when no lag clears the tolerance.
    pub fn detect(&self, window: &[f32]) -> Option<f32> {
        debug_assert_eq!(window.len(), self.window_len);
        if window.len() != self.window_len || self.sample_rate == 0 {
            return None;
        }
        if level_db(window) < self.settings.silence_db {
            return None;
        }

        let (tau_min, tau_max) = self.lag_range();
        if tau_min + 1 >= tau_max {
            return None;
        }

        let tapered: Vec<f32> = window
            .iter()
            .zip(self.taper.iter())
            .map(|(s, w)| s * w)
            .collect();

        let diff = self.difference(&tapered, tau_max);
        let cmnd = cumulative_mean_normalized(&diff);

        let mut tau = None;
        let mut t = tau_min;
        while t < tau_max {
            if cmnd[t] < self.settings.tolerance {
                while t + 1 < tau_max && cmnd[t + 1] < cmnd[t] {
                    t += 1;
                }
                tau = Some(t);
                break;
            }
            t += 1;
        }
        let tau = tau?;

        let period = parabolic_peak(&cmnd, tau);
        if period <= 0.0 {
            return None;
        }
        let freq = self.sample_rate as f32 / period;
        if freq < self.settings.min_freq || freq > self.settings.max_freq {
            return None;
        }
        Some(freq)
    }

    /// YIN difference function d(tau) for tau in 0..tau_max, integrating over
    /// the first half of the window.
    fn difference(&self, x: &[f32], tau_max: usize) -> Vec<f32> {
        let half = x.len() / 2;
        let n = self.fft_len;

        let mut head: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); n];
        for (slot, &s) in head.iter_mut().zip(x[..half].iter()) {
            *slot = Complex::new(s, 0.0);
        }
        let mut full: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); n];
        for (slot, &s) in full.iter_mut().zip(x.iter()) {
            *slot = Complex::new(s, 0.0);
        }

        self.forward.process(&mut head);
        self.forward.process(&mut full);
        let mut corr: Vec<Complex<f32>> = head
            .iter()
            .zip(full.iter())
            .map(|(a, b)| a.conj() * b)
            .collect();
        self.inverse.process(&mut corr);
        let scale = 1.0 / n as f32;

        // energy of x[tau..tau+half] via prefix sums of squares
        let mut prefix = Vec::with_capacity(x.len() + 1);
        prefix.push(0.0f32);
        for &s in x {
            let last = *prefix.last().unwrap_or(&0.0);
            prefix.push(last + s * s);
        }
        let energy = |start: usize| prefix[start + half] - prefix[start];

        let e0 = energy(0);
        (0..tau_max)
            .map(|tau| {
                let r = corr[tau].re * scale;
                (e0 + energy(tau) - 2.0 * r).max(0.0)
            })
            .collect()
    }
}

fn cumulative_mean_normalized(diff: &[f32]) -> Vec<f32> {
    let mut out = vec![1.0f32; diff.len()];
    let mut running = 0.0f32;
    for tau in 1..diff.len() {
        running += diff[tau];
        out[tau] = if running > 0.0 {
            diff[tau] * tau as f32 / running
        } else {
            1.0
        };
    }
    out
}

/// Refine an integer lag with a parabola through its neighbours.
fn parabolic_peak(values: &[f32], tau: usize) -> f32 {
    if tau == 0 || tau + 1 >= values.len() {
        return tau as f32;
    }
    let (a, b, c) = (values[tau - 1], values[tau], values[tau + 1]);
    let denom = a - 2.0 * b + c;
    if denom.abs() < f32::EPSILON {
        return tau as f32;
    }
    let shift = 0.5 * (a - c) / denom;
    tau as f32 + shift.clamp(-1.0, 1.0)
}

/// Mean power of `window` in dB relative to full scale.
pub fn level_db(window: &[f32]) -> f32 {
    if window.is_empty() {
        return f32::NEG_INFINITY;
    }
    let power = window.iter().map(|s| s * s).sum::<f32>() / window.len() as f32;
    10.0 * power.log10()
}

pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: u32, len: usize, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|n| amp * (2.0 * std::f32::consts::PI * freq * n as f32 / sr as f32).sin())
            .collect()
    }

    #[test]
    fn finds_a4() {
        let det = YinDetector::new(320, 8000, PitchSettings::default());
        let f = det.detect(&sine(440.0, 8000, 320, 0.5)).unwrap();
        assert!((f - 440.0).abs() < 440.0 * 0.02, "got {}", f);
    }

    #[test]
    fn finds_a3_in_longer_window() {
        let det = YinDetector::new(640, 8000, PitchSettings::default());
        let f = det.detect(&sine(220.0, 8000, 640, 0.5)).unwrap();
        assert!((f - 220.0).abs() < 220.0 * 0.02, "got {}", f);
    }

    #[test]
    fn silence_has_no_pitch() {
        let det = YinDetector::new(320, 8000, PitchSettings::default());
        assert_eq!(det.detect(&vec![0.0; 320]), None);
        // about -49 dB
        assert_eq!(det.detect(&sine(440.0, 8000, 320, 0.005)), None);
    }

    #[test]
    fn out_of_range_pitch_is_rejected() {
        let settings = PitchSettings {
            min_freq: 600.0,
            ..Default::default()
        };
        let det = YinDetector::new(320, 8000, settings);
        assert_eq!(det.detect(&sine(440.0, 8000, 320, 0.5)), None);
    }

    #[test]
    fn level_of_full_scale_sine_is_minus_three_db() {
        let db = level_db(&sine(100.0, 8000, 8000, 1.0));
        assert!((db + 3.01).abs() < 0.05, "got {}", db);
    }

    #[test]
    fn hann_is_symmetric_and_zero_at_edges() {
        let w = hann_window(9);
        assert!(w[0].abs() < 1e-6 && w[8].abs() < 1e-6);
        assert!((w[4] - 1.0).abs() < 1e-6);
        assert!((w[2] - w[6]).abs() < 1e-6);
    }
}
