//! Autoregressive logistic regression on relative price changes.
//!
//! Each training sample's inputs are the `autoregressive_n` previous
//! relative changes `p[t] / p[t-1] - 1`; its label is whether the following
//! change was positive. Features are standardized before fitting with
//! weighted batch gradient descent.

use super::Trainer;
use crate::config::{TrainerConfig, WeightRecent};
use crate::types::{EngineError, FeedWindow};

/// Gradient magnitude below which descent stops early.
const TOLERANCE: f64 = 1e-7;

#[derive(Debug, Clone)]
pub struct LogisticTrainer {
    autoregressive_n: usize,
    max_n_train: usize,
    weight_recent: WeightRecent,
    learning_rate: f64,
    max_iter: usize,
    balanced: bool,
}

/// Standardized design matrix plus everything needed to score a new row.
struct Dataset {
    rows: Vec<Vec<f64>>,
    labels: Vec<bool>,
    latest: Vec<f64>,
}

impl LogisticTrainer {
    pub fn new(config: &TrainerConfig, balanced: bool) -> Self {
        Self {
            autoregressive_n: config.autoregressive_n,
            max_n_train: config.max_n_train,
            weight_recent: config.weight_recent,
            learning_rate: config.learning_rate,
            max_iter: config.max_iter,
            balanced,
        }
    }

    fn build_dataset(&self, prices: &[f64]) -> Result<Dataset, EngineError> {
        let n = self.autoregressive_n;
        if prices.len() < n + 2 {
            return Err(EngineError::ModelUnavailable(format!(
                "{} prices cannot train an order-{n} model",
                prices.len()
            )));
        }
        if let Some(bad) = prices.iter().find(|p| !p.is_finite() || **p <= 0.0) {
            return Err(EngineError::ModelUnavailable(format!("invalid price {bad}")));
        }

        let returns: Vec<f64> = prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect();

        let skip = (returns.len() - n).saturating_sub(self.max_n_train);
        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut labels = Vec::new();
        for t in (n..returns.len()).skip(skip) {
            rows.push(returns[t - n..t].to_vec());
            labels.push(returns[t] > 0.0);
        }

        let ups = labels.iter().filter(|l| **l).count();
        if ups == 0 || ups == labels.len() {
            return Err(EngineError::ModelUnavailable(format!(
                "training labels hold a single class ({} samples)",
                labels.len()
            )));
        }

        let mut latest = returns[returns.len() - n..].to_vec();
        standardize(&mut rows, &mut latest);

        Ok(Dataset {
            rows,
            labels,
            latest,
        })
    }

    /// Per-sample weights, oldest sample first.
    fn sample_weights(&self, labels: &[bool]) -> Vec<f64> {
        let n = labels.len();
        let tenth = n / 10;
        let mut weights: Vec<f64> = (0..n)
            .map(|i| match self.weight_recent {
                WeightRecent::TenXFiveX if i >= n - tenth => 10.0,
                WeightRecent::TenXFiveX if i >= n - 2 * tenth => 5.0,
                _ => 1.0,
            })
            .collect();

        if self.balanced {
            let ups = labels.iter().filter(|l| **l).count() as f64;
            let downs = n as f64 - ups;
            for (w, &label) in weights.iter_mut().zip(labels) {
                let class_count = if label { ups } else { downs };
                *w *= n as f64 / (2.0 * class_count);
            }
        }
        weights
    }

    /// Weighted batch gradient descent on the log loss.
    fn fit(&self, data: &Dataset, weights: &[f64]) -> (Vec<f64>, f64) {
        let dims = data.latest.len();
        let total_weight: f64 = weights.iter().sum();
        let mut coef = vec![0.0; dims];
        let mut bias = 0.0;

        for _ in 0..self.max_iter {
            let mut grad = vec![0.0; dims];
            let mut grad_bias = 0.0;
            for ((row, &label), &w) in data.rows.iter().zip(&data.labels).zip(weights) {
                let err = sigmoid(dot(&coef, row) + bias) - if label { 1.0 } else { 0.0 };
                for (g, x) in grad.iter_mut().zip(row) {
                    *g += w * err * x;
                }
                grad_bias += w * err;
            }

            let mut largest = (grad_bias / total_weight).abs();
            for (c, g) in coef.iter_mut().zip(&grad) {
                let g = g / total_weight;
                largest = largest.max(g.abs());
                *c -= self.learning_rate * g;
            }
            bias -= self.learning_rate * grad_bias / total_weight;

            if largest < TOLERANCE {
                break;
            }
        }
        (coef, bias)
    }
}

impl Trainer for LogisticTrainer {
    fn fit_and_predict(&self, window: &FeedWindow) -> Result<f64, EngineError> {
        let data = self.build_dataset(&window.prices())?;
        let weights = self.sample_weights(&data.labels);
        let (coef, bias) = self.fit(&data, &weights);

        let p = sigmoid(dot(&coef, &data.latest) + bias);
        if !p.is_finite() {
            return Err(EngineError::ModelUnavailable("model diverged".into()));
        }
        Ok(p)
    }

    fn name(&self) -> &str {
        if self.balanced {
            "linear_logistic_balanced"
        } else {
            "linear_logistic"
        }
    }
}

/// Numerically stable logistic function.
fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale every column of `rows` to zero mean and unit variance, applying
/// the same transform to `latest`. Constant columns are only centred.
fn standardize(rows: &mut [Vec<f64>], latest: &mut [f64]) {
    let count = rows.len() as f64;
    for j in 0..latest.len() {
        let mean = rows.iter().map(|r| r[j]).sum::<f64>() / count;
        let var = rows.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / count;
        let std = if var.sqrt() > 1e-12 { var.sqrt() } else { 1.0 };
        for r in rows.iter_mut() {
            r[j] = (r[j] - mean) / std;
        }
        latest[j] = (latest[j] - mean) / std;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
