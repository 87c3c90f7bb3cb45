//! In-process linear backend
//!
//! A compact deterministic primal solver: full-batch (sub)gradient descent
//! on L1/L2-regularized logistic or hinge loss, one-vs-rest across labels.
//! It stands behind the bridge trait where a production linear solver
//! library would otherwise link in.

use crate::backend::{wrong_model_kind, Backend, Prediction, TrainedModel};
use crate::core::{Distribution, Result, SparseVector, TrainError};
use crate::encoding::EncodedProblem;
use crate::params::{Algorithm, Parameters};
use serde::{Deserialize, Serialize};

const MAX_ITERATIONS: usize = 1000;
const CONVERGENCE_TOLERANCE: f64 = 1e-9;

/// Trained linear model: one weight vector per class (one-vs-rest).
/// When a bias is configured, its weight occupies the last slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub algorithm: Algorithm,
    pub num_labels: usize,
    pub num_features: usize,
    pub bias: Option<f64>,
    pub weights: Vec<Vec<f64>>,
}

impl LinearModel {
    /// Decision value of one class: w . x plus the bias contribution
    fn decision(&self, class: usize, encoded: &SparseVector) -> f64 {
        let w = &self.weights[class];
        let mut sum = 0.0;
        for (&idx, &val) in encoded.indices.iter().zip(encoded.values.iter()) {
            if idx < self.num_features {
                sum += w[idx] * val;
            }
        }
        if let Some(bias) = self.bias {
            sum += w[self.num_features] * bias;
        }
        sum
    }
}

pub struct LinearBackend;

impl Backend for LinearBackend {
    fn train(&self, problem: &EncodedProblem, params: &Parameters) -> Result<TrainedModel> {
        if problem.is_empty() {
            return Err(TrainError::EmptyTrainingSet);
        }
        let algorithm = params.algorithm();
        let bias = params.bias().filter(|b| *b > 0.0);
        let dims = problem.num_features + usize::from(bias.is_some());

        // Per-example cost: C scaled by the weight of the example's class
        let costs: Vec<f64> = problem
            .labels
            .iter()
            .map(|&label| {
                let class_weight = params
                    .weights()
                    .map(|w| w[label])
                    .unwrap_or(1.0);
                params.c() * class_weight
            })
            .collect();

        let mut weights = Vec::with_capacity(problem.num_labels);
        for class in 0..problem.num_labels {
            let targets: Vec<f64> = problem
                .labels
                .iter()
                .map(|&l| if l == class { 1.0 } else { -1.0 })
                .collect();
            weights.push(solve_one_vs_rest(
                algorithm, problem, &targets, &costs, bias, dims,
            ));
        }

        Ok(TrainedModel::Linear(LinearModel {
            algorithm,
            num_labels: problem.num_labels,
            num_features: problem.num_features,
            bias,
            weights,
        }))
    }

    fn predict(
        &self,
        model: &TrainedModel,
        encoded: &SparseVector,
        with_probabilities: bool,
    ) -> Result<Prediction> {
        let model = match model {
            TrainedModel::Linear(m) => m,
            _ => return Err(wrong_model_kind("linear")),
        };
        if with_probabilities && !model.algorithm.supports_probabilities() {
            return Err(TrainError::ProbabilitiesUnsupported(model.algorithm));
        }

        let decisions: Vec<f64> = (0..model.num_labels)
            .map(|class| model.decision(class, encoded))
            .collect();
        let label = argmax(&decisions);

        let distribution = if with_probabilities {
            let mut probs: Vec<f64> = decisions.iter().map(|&d| sigmoid(d)).collect();
            let sum: f64 = probs.iter().sum();
            if sum > 0.0 {
                for p in &mut probs {
                    *p /= sum;
                }
            } else {
                probs = vec![1.0 / model.num_labels as f64; model.num_labels];
            }
            Some(if model.num_labels == 2 {
                Distribution::Binary(probs[0])
            } else {
                Distribution::Explicit(probs)
            })
        } else {
            None
        };

        Ok(Prediction {
            label,
            distribution,
        })
    }

    fn serialize(&self, model: &TrainedModel) -> Result<Vec<u8>> {
        match model {
            TrainedModel::Linear(m) => serde_json::to_vec(m)
                .map_err(|e| TrainError::Serialization(e.to_string())),
            _ => Err(wrong_model_kind("linear")),
        }
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<TrainedModel> {
        let model: LinearModel = serde_json::from_slice(bytes)
            .map_err(|e| TrainError::Serialization(e.to_string()))?;
        Ok(TrainedModel::Linear(model))
    }
}

/// Solve one binary subproblem by full-batch (sub)gradient descent
fn solve_one_vs_rest(
    algorithm: Algorithm,
    problem: &EncodedProblem,
    targets: &[f64],
    costs: &[f64],
    bias: Option<f64>,
    dims: usize,
) -> Vec<f64> {
    let logistic = matches!(algorithm, Algorithm::LogisticL1 | Algorithm::LogisticL2);
    let l1 = matches!(algorithm, Algorithm::LogisticL1 | Algorithm::HingeL1);
    let bias_value = bias.unwrap_or(0.0);

    // Step size bounded by the curvature of the summed loss
    let curvature: f64 = problem
        .examples
        .iter()
        .zip(costs.iter())
        .map(|(x, &c)| c * (x.norm_squared() + bias_value * bias_value))
        .sum();
    let eta0 = 1.0 / (1.0 + if logistic { 0.25 * curvature } else { curvature });

    let mut w = vec![0.0; dims];
    let mut gradient = vec![0.0; dims];

    for iteration in 0..MAX_ITERATIONS {
        gradient.iter_mut().for_each(|g| *g = 0.0);

        for ((x, &y), &cost) in problem
            .examples
            .iter()
            .zip(targets.iter())
            .zip(costs.iter())
        {
            let mut decision = 0.0;
            for (&idx, &val) in x.indices.iter().zip(x.values.iter()) {
                decision += w[idx] * val;
            }
            if bias.is_some() {
                decision += w[dims - 1] * bias_value;
            }
            let margin = y * decision;

            let coeff = if logistic {
                -y * cost * sigmoid(-margin)
            } else if margin < 1.0 {
                -y * cost
            } else {
                0.0
            };
            if coeff != 0.0 {
                for (&idx, &val) in x.indices.iter().zip(x.values.iter()) {
                    gradient[idx] += coeff * val;
                }
                if bias.is_some() {
                    gradient[dims - 1] += coeff * bias_value;
                }
            }
        }

        // Hinge loss needs a decaying step; the smooth logistic loss does not
        let eta = if logistic {
            eta0
        } else {
            eta0 / (1.0 + 0.1 * iteration as f64)
        };

        let mut max_delta: f64 = 0.0;
        for j in 0..dims {
            let old = w[j];
            let mut new = if l1 {
                let stepped = old - eta * gradient[j];
                soft_threshold(stepped, eta)
            } else {
                old - eta * (gradient[j] + old)
            };
            if !new.is_finite() {
                new = old;
            }
            max_delta = max_delta.max((new - old).abs());
            w[j] = new;
        }

        if max_delta < CONVERGENCE_TOLERANCE {
            break;
        }
    }
    w
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_problem() -> EncodedProblem {
        // Feature 0 separates the classes, feature 1 is constant noise
        EncodedProblem {
            examples: vec![
                SparseVector::new(vec![0, 1], vec![1.0, 1.0]),
                SparseVector::new(vec![1], vec![1.0]),
                SparseVector::new(vec![0, 1], vec![0.9, 1.0]),
                SparseVector::new(vec![1], vec![1.1]),
            ],
            labels: vec![0, 1, 0, 1],
            num_features: 2,
            num_labels: 2,
        }
    }

    #[test]
    fn test_separable_binary_training() {
        for algorithm in [
            Algorithm::LogisticL1,
            Algorithm::LogisticL2,
            Algorithm::HingeL1,
            Algorithm::HingeL2,
        ] {
            let problem = binary_problem();
            let params = Parameters::new(algorithm, 2).with_c(10.0);
            let model = LinearBackend.train(&problem, &params).unwrap();
            for (x, &label) in problem.examples.iter().zip(problem.labels.iter()) {
                let pred = LinearBackend.predict(&model, x, false).unwrap();
                assert_eq!(pred.label, label, "algorithm {algorithm:?}");
            }
        }
    }

    #[test]
    fn test_probabilities_for_logistic_only() {
        let problem = binary_problem();
        let x = problem.examples[0].clone();

        let logistic = Parameters::new(Algorithm::LogisticL2, 2).with_c(10.0);
        let model = LinearBackend.train(&problem, &logistic).unwrap();
        let pred = LinearBackend.predict(&model, &x, true).unwrap();
        match pred.distribution {
            Some(Distribution::Binary(p0)) => assert!(p0 > 0.5),
            other => panic!("expected binary distribution, got {other:?}"),
        }

        let hinge = Parameters::new(Algorithm::HingeL2, 2).with_c(10.0);
        let model = LinearBackend.train(&problem, &hinge).unwrap();
        assert!(matches!(
            LinearBackend.predict(&model, &x, true),
            Err(TrainError::ProbabilitiesUnsupported(_))
        ));
    }

    #[test]
    fn test_multiclass_one_vs_rest() {
        let problem = EncodedProblem {
            examples: vec![
                SparseVector::new(vec![0], vec![1.0]),
                SparseVector::new(vec![1], vec![1.0]),
                SparseVector::new(vec![2], vec![1.0]),
                SparseVector::new(vec![0], vec![0.9]),
                SparseVector::new(vec![1], vec![1.1]),
                SparseVector::new(vec![2], vec![0.8]),
            ],
            labels: vec![0, 1, 2, 0, 1, 2],
            num_features: 3,
            num_labels: 3,
        };
        let params = Parameters::new(Algorithm::LogisticL2, 3).with_c(10.0);
        let model = LinearBackend.train(&problem, &params).unwrap();
        for (x, &label) in problem.examples.iter().zip(problem.labels.iter()) {
            assert_eq!(
                LinearBackend.predict(&model, x, false).unwrap().label,
                label
            );
        }
        let pred = LinearBackend
            .predict(&model, &problem.examples[0], true)
            .unwrap();
        assert!(matches!(
            pred.distribution,
            Some(Distribution::Explicit(ref p)) if p.len() == 3
        ));
    }

    #[test]
    fn test_training_is_deterministic() {
        let params = Parameters::new(Algorithm::LogisticL2, 2).with_c(2.0);
        let a = LinearBackend.train(&binary_problem(), &params).unwrap();
        let b = LinearBackend.train(&binary_problem(), &params).unwrap();
        assert_eq!(
            LinearBackend.serialize(&a).unwrap(),
            LinearBackend.serialize(&b).unwrap()
        );
    }

    #[test]
    fn test_serialize_round_trip() {
        let params = Parameters::new(Algorithm::HingeL2, 2)
            .with_c(5.0)
            .with_bias(1.0);
        let model = LinearBackend.train(&binary_problem(), &params).unwrap();
        let bytes = LinearBackend.serialize(&model).unwrap();
        let restored = LinearBackend.deserialize(&bytes).unwrap();
        assert_eq!(bytes, LinearBackend.serialize(&restored).unwrap());

        let x = SparseVector::new(vec![0, 1], vec![1.0, 1.0]);
        assert_eq!(
            LinearBackend.predict(&model, &x, false).unwrap().label,
            LinearBackend.predict(&restored, &x, false).unwrap().label
        );
    }
}
