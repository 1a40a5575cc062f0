use crate::error::{ModelError, PredictionError};
use crate::model::{FeatureWeight, RiskModel};
use crate::types::{ClientRecord, Dataset, FeatureValue, Features};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::f64::consts::E;
use std::path::Path;
use tracing::{debug, info};

/// One input of the linear predictor.
///
/// Numeric terms contribute `coefficient * (value - center) / scale`.
/// Categorical terms (with `category` set) contribute `coefficient` when the
/// feature equals the category and nothing otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTerm {
    pub feature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub coefficient: f64,
    #[serde(default)]
    pub center: f64,
    #[serde(default = "unit_scale")]
    pub scale: f64,
}

fn unit_scale() -> f64 {
    1.0
}

impl ModelTerm {
    pub fn numeric(feature: &str, coefficient: f64) -> Self {
        Self {
            feature: feature.to_string(),
            category: None,
            coefficient,
            center: 0.0,
            scale: 1.0,
        }
    }

    pub fn categorical(feature: &str, category: &str, coefficient: f64) -> Self {
        Self {
            feature: feature.to_string(),
            category: Some(category.to_string()),
            coefficient,
            center: 0.0,
            scale: 1.0,
        }
    }

    /// The encoded (pre-coefficient) value of this term for one client.
    fn encode(&self, features: &Features) -> Result<f64, PredictionError> {
        let value = features
            .get(&self.feature)
            .ok_or_else(|| PredictionError::MissingFeature(self.feature.clone()))?;
        match &self.category {
            Some(category) => Ok(if value.to_string() == *category {
                1.0
            } else {
                0.0
            }),
            None => {
                let x = value
                    .as_f64()
                    .ok_or_else(|| PredictionError::NonNumericFeature {
                        feature: self.feature.clone(),
                        value: value.to_string(),
                    })?;
                Ok((x - self.center) / self.scale)
            }
        }
    }
}

/// Knobs for [`LogisticRiskModel::fit`].
#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub max_iter: usize,
    pub tol: f64,
    /// L2 penalty on the slope coefficients (the intercept is not penalized).
    pub l2_penalty: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-6,
            l2_penalty: 1.0,
        }
    }
}

/// Logistic regression over standardized numeric features and dummy-encoded
/// categorical features. Serializes to and from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRiskModel {
    pub intercept: f64,
    pub terms: Vec<ModelTerm>,
}

impl LogisticRiskModel {
    pub fn new(intercept: f64, terms: Vec<ModelTerm>) -> Self {
        Self { intercept, terms }
    }

    /// Loads a model previously written with [`LogisticRiskModel::save`].
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Fits the model to a labeled dataset using Newton-Raphson.
    ///
    /// Numeric predictors are standardized with the training mean and
    /// standard deviation. Each categorical predictor gets one dummy per
    /// category except the first in sorted order, which is the reference.
    /// Rows missing any predictor are skipped.
    ///
    /// # Arguments
    ///
    /// * `dataset` - Training data; every record must carry a ground truth label.
    /// * `numeric` - Names of numeric predictors.
    /// * `categorical` - Names of categorical predictors.
    /// * `options` - Iteration limit, convergence tolerance and L2 penalty.
    pub fn fit(
        dataset: &Dataset,
        numeric: &[&str],
        categorical: &[&str],
        options: FitOptions,
    ) -> Result<Self, ModelError> {
        if dataset.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        let missing = dataset.len() - dataset.labeled_count();
        if missing > 0 {
            return Err(ModelError::MissingLabels { missing });
        }

        let usable: Vec<&ClientRecord> = dataset
            .records()
            .iter()
            .filter(|r| has_predictors(r, numeric, categorical))
            .collect();
        if usable.len() < dataset.len() {
            debug!(
                skipped = dataset.len() - usable.len(),
                "Skipping training rows with missing predictors"
            );
        }
        if usable.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }

        let mut terms = Vec::new();
        for &name in numeric {
            let values: Vec<f64> = usable
                .iter()
                .filter_map(|r| r.feature(name).and_then(FeatureValue::as_f64))
                .collect();
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
            terms.push(ModelTerm {
                feature: name.to_string(),
                category: None,
                coefficient: 0.0,
                center: mean,
                scale: if std > 1e-12 { std } else { 1.0 },
            });
        }
        for &name in categorical {
            let levels: BTreeSet<String> = usable
                .iter()
                .filter_map(|r| r.feature(name).map(|v| v.to_string()))
                .collect();
            // The first level is the reference category.
            for level in levels.iter().skip(1) {
                terms.push(ModelTerm::categorical(name, level, 0.0));
            }
        }

        let n_samples = usable.len();
        let n_features = terms.len() + 1;
        let mut design = Vec::with_capacity(n_samples * n_features);
        for record in &usable {
            design.push(1.0);
            for term in &terms {
                design.push(term.encode(record.features())?);
            }
        }
        let x = DMatrix::from_row_slice(n_samples, n_features, &design);
        let y = DVector::from_iterator(
            n_samples,
            usable
                .iter()
                .map(|r| if *r.ground_truth_label() == Some(true) { 1.0 } else { 0.0 }),
        );

        let beta = newton_raphson(&x, &y, options).map_err(ModelError::Fit)?;

        for (term, coefficient) in terms.iter_mut().zip(beta.iter().skip(1)) {
            term.coefficient = *coefficient;
        }
        info!(
            samples = n_samples,
            terms = terms.len(),
            "Fitted logistic attrition model"
        );
        Ok(Self {
            intercept: beta[0],
            terms,
        })
    }

    fn linear_predictor(&self, features: &Features) -> Result<f64, PredictionError> {
        let mut z = self.intercept;
        for term in &self.terms {
            z += term.coefficient * term.encode(features)?;
        }
        Ok(z)
    }
}

impl RiskModel for LogisticRiskModel {
    fn predict(&self, features: &Features) -> Result<f64, PredictionError> {
        let z = self.linear_predictor(features)?;
        Ok(sigmoid(z))
    }

    /// Sum of absolute coefficients per feature. Numeric terms are on a
    /// standardized scale, so the sums are comparable across features.
    fn feature_importances(&self) -> Vec<FeatureWeight> {
        let mut weights: Vec<FeatureWeight> = Vec::new();
        for term in &self.terms {
            match weights.iter_mut().find(|w| w.feature == term.feature) {
                Some(existing) => existing.weight += term.coefficient.abs(),
                None => weights.push(FeatureWeight::new(&term.feature, term.coefficient.abs())),
            }
        }
        weights
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + E.powf(-z))
}

fn has_predictors(record: &ClientRecord, numeric: &[&str], categorical: &[&str]) -> bool {
    numeric
        .iter()
        .all(|name| record.feature(name).and_then(FeatureValue::as_f64).is_some())
        && categorical.iter().all(|name| record.feature(name).is_some())
}

/// Penalized Newton-Raphson for logistic regression. Column 0 of `x` is the
/// intercept and is left unpenalized.
fn newton_raphson(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    options: FitOptions,
) -> Result<DVector<f64>, String> {
    let n_features = x.ncols();
    let n_samples = x.nrows();

    if n_samples != y.len() {
        return Err("Number of samples in X and y must match".to_string());
    }

    let mut beta = DVector::zeros(n_features);

    for _iter in 0..options.max_iter {
        let xb = x * &beta;
        let p: DVector<f64> = xb.map(sigmoid);

        let error = y - &p;
        let mut gradient = x.transpose() * &error;
        for j in 1..n_features {
            gradient[j] -= options.l2_penalty * beta[j];
        }

        // X^T * diag(w) * X without materializing the n x n diagonal.
        let w_vec: DVector<f64> = p.map(|val| val * (1.0 - val));
        let mut x_weighted = x.clone();
        for i in 0..n_samples {
            let w = w_vec[i];
            let mut row = x_weighted.row_mut(i);
            row *= w;
        }
        let mut hessian = x.transpose() * x_weighted;

        hessian[(0, 0)] += 1e-6;
        for j in 1..n_features {
            hessian[(j, j)] += options.l2_penalty.max(1e-6);
        }

        let delta = hessian
            .lu()
            .solve(&gradient)
            .ok_or("Hessian is singular")?;

        beta += &delta;

        if !beta.iter().all(|b| b.is_finite()) {
            return Err("Coefficients diverged".to_string());
        }
        if delta.norm() < options.tol {
            break;
        }
    }

    Ok(beta)
}
