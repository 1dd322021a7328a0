use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Helper that wraps a forward/inverse `rustfft` plan pair of one size.
pub struct FftHelper {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    size: usize,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        Self {
            forward,
            inverse,
            size,
        }
    }

    pub fn forward(&self, input: &[f32]) -> Vec<Complex32> {
        let mut buffer: Vec<Complex32> = input
            .iter()
            .map(|&value| Complex32::new(value, 0.0))
            .collect();
        buffer.resize(self.size, Complex32::zero());
        self.forward.process(&mut buffer);
        buffer
    }

    /// Zeroes every bin above `cutoff_fraction` of the Nyquist band and
    /// returns the real part of the inverse transform.
    pub fn low_pass(&self, input: &[f32], cutoff_fraction: f32) -> Vec<f32> {
        if self.size == 0 {
            return Vec::new();
        }
        let mut spectrum = self.forward(input);
        let nyquist = self.size / 2;
        let keep = (nyquist as f32 * cutoff_fraction.clamp(0.0, 1.0)).round() as usize;
        for (bin, value) in spectrum.iter_mut().enumerate() {
            let frequency = bin.min(self.size - bin);
            if frequency > keep {
                *value = Complex32::zero();
            }
        }
        self.inverse.process(&mut spectrum);
        let scale = 1.0 / self.size as f32;
        spectrum
            .iter()
            .take(input.len())
            .map(|c| c.re * scale)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fft_helper_returns_same_length() {
        let helper = FftHelper::new(4);
        let output = helper.forward(&[1.0, 0.0, -1.0, 0.0]);
        assert_eq!(output.len(), 4);
    }

    #[test]
    fn low_pass_keeps_dc_and_drops_nyquist() {
        let helper = FftHelper::new(8);
        // 1.0 offset plus an alternating component at the Nyquist frequency.
        let input: Vec<f32> = (0..8).map(|i| 1.0 + if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let output = helper.low_pass(&input, 0.25);
        for value in output {
            assert!((value - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn full_cutoff_is_identity() {
        let helper = FftHelper::new(5);
        let input = [0.3, -1.0, 2.0, 0.0, 4.5];
        let output = helper.low_pass(&input, 1.0);
        for (a, b) in input.iter().zip(output) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
