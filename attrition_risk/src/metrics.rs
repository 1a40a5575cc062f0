//! Evaluation of scored clients against ground truth labels.
use crate::error::RiskError;
use crate::model::{FeatureImportance, FeatureWeight};
use crate::types::ScoredClient;
use getset::Getters;
use serde::Serialize;

/// Predicted-vs-actual counts at a fixed decision threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    pub fn record(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true) => self.true_positive += 1,
            (true, false) => self.false_positive += 1,
            (false, false) => self.true_negative += 1,
            (false, true) => self.false_negative += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total())
    }

    /// 0 when nothing was predicted positive.
    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    /// 0 when there are no actual positives.
    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    /// 0 when precision and recall are both 0.
    pub fn f1_score(&self) -> f64 {
        let precision = self.precision();
        let recall = self.recall();
        if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Classification quality of a scored, labeled dataset.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct PerformanceMetrics {
    confusion_matrix: ConfusionMatrix,
    accuracy: f64,
    precision: f64,
    recall: f64,
    f1_score: f64,
    /// `None` when the labels contain only one class.
    auc: Option<f64>,
    decision_threshold: f64,
    /// Number of records that entered the evaluation.
    evaluated: usize,
    /// Number of `Unknown` records left out because they have no probability.
    excluded: usize,
}

/// Computes confusion-matrix statistics and AUC for `clients`.
///
/// Records without a probability are excluded. Every remaining record must
/// carry a ground truth label; otherwise the result is
/// [`RiskError::InsufficientLabels`]. A client is predicted to churn when its
/// probability is at or above `decision_threshold`.
pub fn evaluate(
    clients: &[ScoredClient],
    decision_threshold: f64,
) -> Result<PerformanceMetrics, RiskError> {
    let included: Vec<(f64, Option<bool>)> = clients
        .iter()
        .filter_map(|c| {
            (*c.risk_probability()).map(|p| (p, *c.record().ground_truth_label()))
        })
        .collect();
    let labeled = included.iter().filter(|(_, label)| label.is_some()).count();
    if included.is_empty() || labeled < included.len() {
        return Err(RiskError::InsufficientLabels {
            labeled,
            total: included.len(),
        });
    }

    let ranked: Vec<(f64, bool)> = included
        .iter()
        .filter_map(|(p, label)| label.map(|l| (*p, l)))
        .collect();

    let mut matrix = ConfusionMatrix::default();
    for (p, actual) in &ranked {
        matrix.record(*p >= decision_threshold, *actual);
    }

    Ok(PerformanceMetrics {
        confusion_matrix: matrix,
        accuracy: matrix.accuracy(),
        precision: matrix.precision(),
        recall: matrix.recall(),
        f1_score: matrix.f1_score(),
        auc: rank_auc(&ranked),
        decision_threshold,
        evaluated: ranked.len(),
        excluded: clients.len() - included.len(),
    })
}

/// Probability that a random positive is scored above a random negative,
/// with ties counting one half (Mann-Whitney U over mid-ranks).
///
/// Returns `None` if there is no positive or no negative example.
pub fn rank_auc(scored: &[(f64, bool)]) -> Option<f64> {
    let positives = scored.iter().filter(|(_, label)| *label).count();
    let negatives = scored.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scored.len()).collect();
    order.sort_by(|&a, &b| scored[a].0.total_cmp(&scored[b].0));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scored[order[end]].0 == scored[order[start]].0 {
            end += 1;
        }
        // 1-based ranks start+1..=end share their average.
        let mid_rank = (start + 1 + end) as f64 / 2.0;
        let tied_positives = order[start..end].iter().filter(|&&i| scored[i].1).count();
        positive_rank_sum += mid_rank * tied_positives as f64;
        start = end;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Normalizes raw model weights into a [`FeatureImportance`].
///
/// Weights are made absolute (NaN counts as 0), scaled to sum to 1 and sorted
/// descending. Equal weights keep the model's order.
pub fn summarize_importances(raw: Vec<FeatureWeight>) -> FeatureImportance {
    let mut weights: Vec<FeatureWeight> = raw
        .into_iter()
        .map(|w| FeatureWeight {
            weight: if w.weight.is_nan() { 0.0 } else { w.weight.abs() },
            feature: w.feature,
        })
        .collect();
    let total: f64 = weights.iter().map(|w| w.weight).sum();
    if total > 0.0 && total.is_finite() {
        for w in &mut weights {
            w.weight /= total;
        }
    } else {
        for w in &mut weights {
            w.weight = 0.0;
        }
    }
    weights.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    FeatureImportance::from_sorted(weights)
}
