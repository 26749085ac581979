use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Result, VoxError};
use crate::features::{FeatureKind, FeatureValue, FeatureVector};

const EPSILON: f64 = 1e-10;

/// Relative weight of each feature kind in the composite score.
pub type Weights = BTreeMap<FeatureKind, f64>;

pub fn default_weights() -> Weights {
    use FeatureKind::*;
    [
        (Mfcc, 0.25),
        (Mel, 0.20),
        (F0, 0.15),
        (VoicedRatio, 0.10),
        (SpectralCentroid, 0.05),
        (SpectralRolloff, 0.05),
        (SpectralBandwidth, 0.05),
        (RmsEnergy, 0.05),
        (ZeroCrossingRate, 0.05),
        (Tempo, 0.05),
    ]
    .into_iter()
    .collect()
}

/// How two values of one kind are compared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    /// `(cos + 1) / 2` of the pooled vectors
    Cosine,
    /// `1 - |a - b| / max(a, b)`
    RelativeDifference,
    /// `min(a, b) / max(a, b)`
    Ratio,
}

impl Metric {
    pub fn for_kind(kind: FeatureKind) -> Metric {
        match kind {
            FeatureKind::Mfcc | FeatureKind::Mel => Metric::Cosine,
            FeatureKind::F0 | FeatureKind::Tempo => Metric::Ratio,
            FeatureKind::SpectralCentroid
            | FeatureKind::SpectralRolloff
            | FeatureKind::SpectralBandwidth
            | FeatureKind::RmsEnergy
            | FeatureKind::ZeroCrossingRate
            | FeatureKind::VoicedRatio => Metric::RelativeDifference,
        }
    }
}

/// Per-kind similarities and their weighted combination.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimilarityReport {
    pub scores: BTreeMap<FeatureKind, f64>,
    /// Weights of the kinds that took part, before renormalisation
    pub weights: BTreeMap<FeatureKind, f64>,
    pub composite: f64,
}

impl SimilarityReport {
    /// Scores sorted from most to least similar.
    pub fn ranked_scores(&self) -> Vec<(FeatureKind, f64)> {
        let mut scores: Vec<(FeatureKind, f64)> = self.scores.iter().map(|(k, v)| (*k, *v)).collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        scores
    }
}

#[derive(Clone, Debug)]
pub struct SimilarityScorer {
    weights: Weights,
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self {
            weights: default_weights(),
        }
    }
}

impl SimilarityScorer {
    pub fn with_weights(weights: Weights) -> Result<Self> {
        if let Some((kind, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(VoxError::config(format!(
                "weight for {} must be finite and non-negative, got {}",
                kind, w
            )));
        }
        if weights.values().all(|&w| w == 0.0) {
            return Err(VoxError::config("at least one feature weight must be positive"));
        }
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    /// Compare two feature vectors. Kinds missing on either side, or without
    /// weight, are left out and the remaining weights renormalised.
    pub fn score(&self, reference: &FeatureVector, candidate: &FeatureVector) -> Result<SimilarityReport> {
        let mut scores = BTreeMap::new();
        let mut used = BTreeMap::new();

        for (&kind, &weight) in &self.weights {
            if weight <= 0.0 {
                continue;
            }
            let (Some(a), Some(b)) = (reference.get(kind), candidate.get(kind)) else {
                continue;
            };
            let Some(similarity) = compare(kind, a, b) else {
                continue;
            };
            scores.insert(kind, similarity);
            used.insert(kind, weight);
        }

        if used.is_empty() {
            return Err(VoxError::IncompatibleFeatureSets {
                reference: reference.kinds().map(|k| k.to_string()).collect(),
                candidate: candidate.kinds().map(|k| k.to_string()).collect(),
            });
        }

        let total: f64 = used.values().sum();
        let composite = scores.iter().map(|(k, s)| s * used[k]).sum::<f64>() / total;

        Ok(SimilarityReport {
            scores,
            weights: used,
            composite,
        })
    }
}

/// Similarity in [0, 1], or `None` when the pair is not comparable.
fn compare(kind: FeatureKind, a: &FeatureValue, b: &FeatureValue) -> Option<f64> {
    let similarity = match Metric::for_kind(kind) {
        Metric::Cosine => {
            let (va, vb) = (a.as_vector(), b.as_vector());
            if va.len() != vb.len() {
                log::warn!(
                    "Skipping {}: vector lengths differ ({} vs {})",
                    kind,
                    va.len(),
                    vb.len()
                );
                return None;
            }
            (cosine_similarity(&va, &vb) + 1.0) / 2.0
        }
        Metric::RelativeDifference => {
            let (x, y) = (a.as_scalar(), b.as_scalar());
            let scale = x.abs().max(y.abs()).max(EPSILON);
            1.0 - (x - y).abs() / scale
        }
        Metric::Ratio => {
            let (x, y) = (a.as_scalar(), b.as_scalar());
            // Unvoiced clips carry a zero pitch sentinel
            if kind == FeatureKind::F0 && (x <= 0.0 || y <= 0.0) {
                return None;
            }
            x.min(y) / x.max(y).max(EPSILON)
        }
    };
    similarity.is_finite().then(|| similarity.clamp(0.0, 1.0))
}

/// Cosine of the angle between two vectors. Two zero vectors are identical
/// (1); a zero vector against a non-zero one is orthogonal (0).
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    match (na > EPSILON, nb > EPSILON) {
        (false, false) => 1.0,
        (true, true) => (dot / (na * nb)).clamp(-1.0, 1.0),
        _ => 0.0,
    }
}
