//! Offline secondary scorer: score-weighted mean of the stored scores.
//!
//! Each score is weighted by itself (at least 0.1), which pulls the mean
//! toward the strategies that are most convinced.

use super::{ExternalCallError, SecondaryScorer, SecondaryVerdict, StrategyTuple};
use crate::domain::{EntityId, Signal};

/// Lower bound on a tuple's weight.
const MIN_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl SecondaryScorer for HeuristicScorer {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn evaluate(
        &self,
        _entity: &EntityId,
        tuples: &[StrategyTuple],
    ) -> Result<SecondaryVerdict, ExternalCallError> {
        let (weighted, total_weight) = tuples
            .iter()
            .filter(|t| t.score.is_finite())
            .fold((0.0, 0.0), |(sum, weights), t| {
                let w = t.score.max(MIN_WEIGHT);
                (sum + t.score * w, weights + w)
            });

        if total_weight == 0.0 {
            return Ok(SecondaryVerdict {
                score: 0.0,
                signal: Signal::Hold,
                reasoning: "no strategy scores to weigh".into(),
            });
        }

        let score = (weighted / total_weight).clamp(0.0, 1.0);
        Ok(SecondaryVerdict {
            score,
            signal: Signal::from_score(score),
            reasoning: format!(
                "score-weighted mean of {} strategy scores = {score:.4}",
                tuples.len()
            ),
        })
    }
}
