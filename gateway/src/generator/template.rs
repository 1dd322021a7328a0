//! Sample waveforms for synthetic frames, scaled so that the default
//! conditioners recover the requested anomaly index.

use rand::Rng;
use std::f32::consts::{PI, SQRT_2};

/// Sine with `cycles` full periods over `length` samples.
pub fn sine_wave(length: usize, cycles: f32) -> Vec<f32> {
    (0..length)
        .map(|i| ((i as f32 * cycles) / length as f32 * 2.0 * PI).sin())
        .collect()
}

fn jitter<R: Rng>(rng: &mut R, noise: f32) -> f32 {
    if noise > 0.0 {
        rng.gen_range(-noise..noise)
    } else {
        0.0
    }
}

/// Surface-deviation samples in metres with an occasional spike for the
/// median to reject.
pub fn ranging_samples<R: Rng>(rng: &mut R, anomaly: f64, reference_m: f64, count: usize, noise: f32) -> Vec<f32> {
    let level = (anomaly * reference_m) as f32;
    (0..count.max(1))
        .map(|i| {
            let spike = if i % 11 == 7 { 0.5 } else { 0.0 };
            level + spike + jitter(rng, noise)
        })
        .collect()
}

/// Flattened xyz triples in nT. The anomaly appears on the vertical axis on
/// top of the configured hard-iron bias.
pub fn magnetic_samples<R: Rng>(
    rng: &mut R,
    anomaly: f64,
    reference_nt: f64,
    bias: [f64; 3],
    triples: usize,
    noise: f32,
) -> Vec<f32> {
    let vertical = anomaly * reference_nt;
    let mut samples = Vec::with_capacity(triples.max(1) * 3);
    for _ in 0..triples.max(1) {
        samples.push(bias[0] as f32 + jitter(rng, noise));
        samples.push(bias[1] as f32 + jitter(rng, noise));
        samples.push((bias[2] + vertical) as f32 + jitter(rng, noise));
    }
    samples
}

/// Low-frequency tone whose RMS equals `anomaly * reference`, plus
/// broadband noise that the low-pass stage mostly removes.
pub fn acoustic_samples<R: Rng>(rng: &mut R, anomaly: f64, reference: f64, count: usize, noise: f32) -> Vec<f32> {
    let amplitude = (anomaly * reference) as f32 * SQRT_2;
    sine_wave(count.max(1), 4.0)
        .into_iter()
        .map(|s| s * amplitude + jitter(rng, noise))
        .collect()
}
