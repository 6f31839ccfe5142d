use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::InferenceError;

pub const DEFAULT_TEMPERATURE: f32 = 1.5;
pub const DEFAULT_MIN_P: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    /// Logits are divided by this before softmax. Zero or below means greedy.
    pub temperature: f32,
    /// Tokens whose probability is below `min_p * max_prob` are discarded.
    pub min_p: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            min_p: DEFAULT_MIN_P,
        }
    }
}

/// Temperature plus min-p sampler over a logits vector.
pub struct Sampler {
    config: SamplingConfig,
    rng: StdRng,
}

impl Sampler {
    pub fn new(config: SamplingConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { config, rng }
    }

    pub fn sample(&mut self, logits: &[f32]) -> Result<u32, InferenceError> {
        if self.config.temperature <= 0.0 {
            return argmax(logits).ok_or(InferenceError::EmptyLogits);
        }

        let probs = softmax(logits, self.config.temperature);
        let candidates = min_p_filter(&probs, self.config.min_p);
        let total: f32 = candidates.iter().map(|(_, p)| p).sum();
        if candidates.is_empty() || total <= 0.0 {
            return Err(InferenceError::EmptyLogits);
        }

        let mut draw = self.rng.random::<f32>() * total;
        for &(index, p) in &candidates {
            if draw < p {
                return Ok(index as u32);
            }
            draw -= p;
        }
        // Rounding can leave a sliver past the last candidate.
        Ok(candidates[candidates.len() - 1].0 as u32)
    }
}

/// Index of the largest finite logit.
pub fn argmax(logits: &[f32]) -> Option<u32> {
    logits
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i as u32)
}

/// Temperature-scaled softmax. Non-finite logits get zero probability.
pub fn softmax(logits: &[f32], temperature: f32) -> Vec<f32> {
    let max = logits
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![0.0; logits.len()];
    }

    let exps: Vec<f32> = logits
        .iter()
        .map(|&v| {
            if v.is_finite() {
                ((v - max) / temperature).exp()
            } else {
                0.0
            }
        })
        .collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Keep `(index, prob)` pairs with probability at least `min_p` times the
/// most likely token's probability.
pub fn min_p_filter(probs: &[f32], min_p: f32) -> Vec<(usize, f32)> {
    let top = probs.iter().copied().fold(0.0_f32, f32::max);
    let threshold = top * min_p.clamp(0.0, 1.0);
    probs
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, p)| p > 0.0 && p >= threshold)
        .collect()
}
