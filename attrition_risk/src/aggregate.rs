//! Population-level roll-ups: tier buckets and attrition factor prevalence.
use crate::config::AttritionFactor;
use crate::model::FeatureImportance;
use crate::types::{RiskTier, ScoredClient};
use getset::Getters;
use serde::Serialize;
use tracing::info;

/// Client count and summed revenue for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TierBucket {
    pub count: usize,
    pub revenue: f64,
}

impl TierBucket {
    fn add(&mut self, revenue: f64) {
        self.count += 1;
        self.revenue += revenue;
    }
}

/// How common one configured attrition factor is in the population.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct FactorPrevalence {
    name: String,
    feature: String,
    /// Share of all clients crossing the factor's threshold, in percent.
    prevalence_percent: f64,
    /// Normalized model weight of the factor's feature, if the model reports one.
    importance: Option<f64>,
}

/// Tier distribution and ranked attrition factors for a scored dataset.
#[derive(Debug, Clone, PartialEq, Default, Getters, Serialize)]
#[getset(get = "pub")]
pub struct PopulationAggregate {
    low: TierBucket,
    medium: TierBucket,
    high: TierBucket,
    /// Clients whose prediction failed.
    unscored: TierBucket,
    total_clients: usize,
    factors: Vec<FactorPrevalence>,
}

impl PopulationAggregate {
    pub fn bucket(&self, tier: RiskTier) -> &TierBucket {
        match tier {
            RiskTier::Low => &self.low,
            RiskTier::Medium => &self.medium,
            RiskTier::High => &self.high,
            RiskTier::Unknown => &self.unscored,
        }
    }

    /// Revenue held by High-tier clients.
    pub fn revenue_at_risk(&self) -> f64 {
        self.high.revenue
    }
}

/// Buckets clients by tier and ranks `factors` by prevalence.
///
/// A factor is kept when `importance` is empty (the model reports no weights)
/// or gives its feature a positive weight. Ties keep declaration order.
pub fn aggregate(
    clients: &[ScoredClient],
    importance: &FeatureImportance,
    factors: &[AttritionFactor],
) -> PopulationAggregate {
    let mut result = PopulationAggregate {
        total_clients: clients.len(),
        ..Default::default()
    };

    for client in clients {
        let bucket = match client.risk_tier() {
            RiskTier::Low => &mut result.low,
            RiskTier::Medium => &mut result.medium,
            RiskTier::High => &mut result.high,
            RiskTier::Unknown => &mut result.unscored,
        };
        bucket.add(client.revenue());
    }

    if !clients.is_empty() {
        result.factors = factors
            .iter()
            .filter_map(|factor| {
                let weight = importance.weight_of(&factor.feature);
                let relevant = importance.is_empty() || weight.is_some_and(|w| w > 0.0);
                relevant.then(|| prevalence(clients, factor, weight))
            })
            .collect();
        result
            .factors
            .sort_by(|a, b| b.prevalence_percent.total_cmp(&a.prevalence_percent));
    }

    info!(
        total = result.total_clients,
        high = result.high.count,
        medium = result.medium.count,
        low = result.low.count,
        unscored = result.unscored.count,
        factors = result.factors.len(),
        "Aggregated population"
    );
    result
}

fn prevalence(
    clients: &[ScoredClient],
    factor: &AttritionFactor,
    importance: Option<f64>,
) -> FactorPrevalence {
    let crossing = clients
        .iter()
        .filter(|c| {
            c.record()
                .feature(&factor.feature)
                .and_then(|v| v.as_f64())
                .is_some_and(|v| factor.is_crossed_by(v))
        })
        .count();

    FactorPrevalence {
        name: factor.name.clone(),
        feature: factor.feature.clone(),
        prevalence_percent: 100.0 * crossing as f64 / clients.len() as f64,
        importance,
    }
}
