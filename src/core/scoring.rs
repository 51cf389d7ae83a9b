//! Candidate scoring for lease selection.
//!
//! `score = w_success * success_rate - w_latency * latency_norm - w_cost * cost_norm`
//!
//! Latency and cost are normalized to `[0, 100]` against the largest value in
//! the candidate set so all three terms share a scale. Unknown latency or cost
//! contributes no penalty. Ties are broken by lowest `daily_usage`, then by
//! smallest id, so selection is deterministic.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::core::record::ResourceRecord;
use crate::util::serde::ResourceKind;

/// Scores closer than this are treated as equal.
const SCORE_EPSILON: f64 = 1e-9;

/// Per-kind weights for the scoring function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Weight of `success_rate`.
    pub success: f64,
    /// Weight of normalized latency.
    pub latency: f64,
    /// Weight of normalized cost.
    pub cost: f64,
}

impl ScoringWeights {
    /// Defaults tuned per kind: accounts have no latency or cost signal,
    /// captcha providers are billed per use.
    pub const fn for_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Proxy => Self {
                success: 1.0,
                latency: 0.3,
                cost: 0.0,
            },
            ResourceKind::Account => Self {
                success: 1.0,
                latency: 0.0,
                cost: 0.0,
            },
            ResourceKind::CaptchaProvider => Self {
                success: 1.0,
                latency: 0.2,
                cost: 0.3,
            },
        }
    }

    /// Reject negative or non-finite weights.
    pub fn validate(&self) -> Result<(), String> {
        for (name, w) in [
            ("success", self.success),
            ("latency", self.latency),
            ("cost", self.cost),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(format!("weight `{name}` must be a finite non-negative number"));
            }
        }
        Ok(())
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            success: 1.0,
            latency: 0.3,
            cost: 0.3,
        }
    }
}

/// A candidate together with its computed score.
#[derive(Debug, Clone, Copy)]
pub struct ScoredCandidate<'a> {
    /// Candidate record.
    pub record: &'a ResourceRecord,
    /// Composite score; higher is better.
    pub score: f64,
}

fn normalize(value: Option<f64>, max: f64) -> f64 {
    match value {
        Some(v) if max > 0.0 => (v / max * 100.0).clamp(0.0, 100.0),
        _ => 0.0,
    }
}

/// Score every candidate.
pub fn score_candidates<'a>(
    candidates: &[&'a ResourceRecord],
    weights: &ScoringWeights,
) -> Vec<ScoredCandidate<'a>> {
    let max_latency = candidates
        .iter()
        .filter_map(|r| r.details.latency_ms())
        .map(f64::from)
        .fold(0.0_f64, f64::max);
    let max_cost = candidates
        .iter()
        .filter_map(|r| r.details.cost_per_use())
        .fold(0.0_f64, f64::max);

    candidates
        .iter()
        .map(|record| {
            let latency = normalize(record.details.latency_ms().map(f64::from), max_latency);
            let cost = normalize(record.details.cost_per_use(), max_cost);
            let score = weights.success * record.success_rate
                - weights.latency * latency
                - weights.cost * cost;
            ScoredCandidate { record, score }
        })
        .collect()
}

/// Ordering where `Ordering::Greater` means `a` is the better pick.
fn rank(a: &ScoredCandidate<'_>, b: &ScoredCandidate<'_>) -> Ordering {
    if (a.score - b.score).abs() > SCORE_EPSILON {
        return a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal);
    }
    b.record
        .daily_usage
        .cmp(&a.record.daily_usage)
        .then_with(|| b.record.id.cmp(&a.record.id))
}

/// Pick the best candidate, or `None` when the set is empty.
pub fn select_best<'a>(
    candidates: &[&'a ResourceRecord],
    weights: &ScoringWeights,
) -> Option<ScoredCandidate<'a>> {
    score_candidates(candidates, weights)
        .into_iter()
        .max_by(rank)
}
