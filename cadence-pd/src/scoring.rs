//! Cosine scoring and softmax top-K selection
//!
//! Scores carry a little uniform noise so repeated cycles explore; selection samples
//! from the top K instead of taking the argmax.

use rand::Rng;
use std::cmp::Ordering;

use crate::candidate::SongCandidate;
use crate::vector::{magnitude, SongVector, VECTOR_DIM};

/// Floor applied to the softmax temperature
pub const MIN_TEMPERATURE: f32 = 0.01;

const EPSILON: f32 = 1e-9;

/// Scale to unit length; near-zero vectors are returned unchanged
pub fn normalize(v: &SongVector) -> SongVector {
    let mag = magnitude(v);
    if mag < EPSILON {
        return *v;
    }
    let mut out = [0.0; VECTOR_DIM];
    for (o, x) in out.iter_mut().zip(v.iter()) {
        *o = x / mag;
    }
    out
}

/// Cosine similarity in [-1, 1]; 0 when either vector has no magnitude
pub fn cosine_similarity(a: &SongVector, b: &SongVector) -> f32 {
    let mag_a = magnitude(a);
    let mag_b = magnitude(b);
    if mag_a < EPSILON || mag_b < EPSILON {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

/// Score every candidate against `profile`, best first
pub fn score_candidates(
    profile: &SongVector,
    candidates: Vec<SongCandidate>,
    temperature: f32,
) -> Vec<(SongCandidate, f32)> {
    score_candidates_with_rng(profile, candidates, temperature, &mut rand::thread_rng())
}

pub fn score_candidates_with_rng<R: Rng + ?Sized>(
    profile: &SongVector,
    candidates: Vec<SongCandidate>,
    temperature: f32,
    rng: &mut R,
) -> Vec<(SongCandidate, f32)> {
    let profile = normalize(profile);
    let noise_scale = temperature.max(0.0);

    let mut scored: Vec<(SongCandidate, f32)> = candidates
        .into_iter()
        .map(|candidate| {
            let similarity = cosine_similarity(&profile, &normalize(&candidate.vector));
            let noise = rng.gen::<f32>() * noise_scale;
            (candidate, similarity + noise)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored
}

/// Softmax weights for `scores` at `temperature` (floored)
pub fn softmax_probabilities(scores: &[f32], temperature: f32) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let temp = temperature.max(MIN_TEMPERATURE);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = scores.iter().map(|s| ((s - max) / temp).exp()).collect();
    let total: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / total).collect()
}

/// Sample a winner from the `top_k` best of an already-sorted list
///
/// `None` only when `scored` is empty.
pub fn softmax_select<T>(scored: Vec<(T, f32)>, top_k: usize, temperature: f32) -> Option<(T, f32)> {
    softmax_select_with_rng(scored, top_k, temperature, &mut rand::thread_rng())
}

pub fn softmax_select_with_rng<T, R: Rng + ?Sized>(
    mut scored: Vec<(T, f32)>,
    top_k: usize,
    temperature: f32,
    rng: &mut R,
) -> Option<(T, f32)> {
    scored.truncate(top_k.max(1));
    match scored.len() {
        0 => return None,
        1 => return scored.pop(),
        _ => {}
    }

    let scores: Vec<f32> = scored.iter().map(|(_, s)| *s).collect();
    let probs = softmax_probabilities(&scores, temperature);

    let r: f32 = rng.gen();
    let mut cumulative = 0.0;
    let mut pick = scored.len() - 1;
    for (i, p) in probs.iter().enumerate() {
        cumulative += p;
        if r <= cumulative {
            pick = i;
            break;
        }
    }

    Some(scored.swap_remove(pick))
}
