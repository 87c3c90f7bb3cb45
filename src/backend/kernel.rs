//! In-process kernel backend
//!
//! Regularized least-squares classification solved by deterministic
//! Gauss-Seidel sweeps over `(K + I/C) alpha = y`, one-vs-rest across
//! labels. Gram rows are served through the LRU cache so repeated sweeps
//! stay within a fixed memory budget.

use crate::backend::{wrong_model_kind, Backend, Prediction, TrainedModel};
use crate::cache::GramCache;
use crate::core::{Result, SparseVector, TrainError};
use crate::encoding::EncodedProblem;
use crate::params::{Algorithm, Parameters};
use serde::{Deserialize, Serialize};

const MAX_SWEEPS: usize = 200;
const CONVERGENCE_TOLERANCE: f64 = 1e-9;
/// Memory budget for cached Gram rows during training
const GRAM_CACHE_BYTES: usize = 100_000_000;

/// Kernel function selected by the algorithm and its knobs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum KernelFn {
    Linear,
    Rbf { gamma: f64 },
    Sigmoid { gamma: f64, coef0: f64 },
    Poly { gamma: f64, coef0: f64, degree: u32 },
}

impl KernelFn {
    /// Build from parameters, applying the conventional defaults for knobs
    /// the caller left unset: gamma = 1 / num_features, coef0 = 0, degree = 3
    pub fn from_params(params: &Parameters, num_features: usize) -> Result<Self> {
        let gamma = params
            .gamma()
            .unwrap_or(1.0 / num_features.max(1) as f64);
        let coef0 = params.coef0().unwrap_or(0.0);
        let degree = params.degree().unwrap_or(3);
        match params.algorithm() {
            Algorithm::KernelLinear => Ok(KernelFn::Linear),
            Algorithm::KernelRbf => Ok(KernelFn::Rbf { gamma }),
            Algorithm::KernelSigmoid => Ok(KernelFn::Sigmoid { gamma, coef0 }),
            Algorithm::KernelPoly => Ok(KernelFn::Poly {
                gamma,
                coef0,
                degree,
            }),
            other => Err(TrainError::Backend(format!(
                "{other} is not a kernel algorithm"
            ))),
        }
    }

    pub fn compute(&self, x: &SparseVector, y: &SparseVector) -> f64 {
        match *self {
            KernelFn::Linear => x.dot(y),
            KernelFn::Rbf { gamma } => {
                let dist_sq = x.norm_squared() - 2.0 * x.dot(y) + y.norm_squared();
                (-gamma * dist_sq.max(0.0)).exp()
            }
            KernelFn::Sigmoid { gamma, coef0 } => (gamma * x.dot(y) + coef0).tanh(),
            KernelFn::Poly {
                gamma,
                coef0,
                degree,
            } => (gamma * x.dot(y) + coef0).powi(degree as i32),
        }
    }
}

/// Trained kernel model: the training vectors plus one coefficient vector
/// per class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelModel {
    pub algorithm: Algorithm,
    pub num_labels: usize,
    pub kernel: KernelFn,
    pub vectors: Vec<SparseVector>,
    pub alpha: Vec<Vec<f64>>,
}

impl KernelModel {
    fn decision(&self, class: usize, encoded: &SparseVector) -> f64 {
        self.vectors
            .iter()
            .zip(self.alpha[class].iter())
            .map(|(v, &a)| a * self.kernel.compute(v, encoded))
            .sum()
    }
}

pub struct KernelBackend;

impl Backend for KernelBackend {
    fn train(&self, problem: &EncodedProblem, params: &Parameters) -> Result<TrainedModel> {
        if problem.is_empty() {
            return Err(TrainError::EmptyTrainingSet);
        }
        let kernel = KernelFn::from_params(params, problem.num_features)?;
        let n = problem.len();

        // Per-example ridge term: 1 / (C * class weight)
        let ridges: Vec<f64> = problem
            .labels
            .iter()
            .map(|&label| {
                let class_weight = params.weights().map(|w| w[label]).unwrap_or(1.0);
                1.0 / (params.c() * class_weight)
            })
            .collect();

        let mut cache = GramCache::with_memory_limit(GRAM_CACHE_BYTES, n);
        let mut compute_row = |i: usize, cache: &mut GramCache| {
            cache.row(i, |i| {
                (0..n)
                    .map(|j| kernel.compute(&problem.examples[i], &problem.examples[j]))
                    .collect()
            })
        };

        let mut alpha = vec![vec![0.0; n]; problem.num_labels];
        for (class, alpha_class) in alpha.iter_mut().enumerate() {
            let targets: Vec<f64> = problem
                .labels
                .iter()
                .map(|&l| if l == class { 1.0 } else { -1.0 })
                .collect();

            for _sweep in 0..MAX_SWEEPS {
                let mut max_delta: f64 = 0.0;
                for i in 0..n {
                    let row = compute_row(i, &mut cache);
                    let mut residual = targets[i];
                    for j in 0..n {
                        if j != i {
                            residual -= row[j] * alpha_class[j];
                        }
                    }
                    let denom = row[i] + ridges[i];
                    let updated = if denom.abs() > f64::EPSILON {
                        residual / denom
                    } else {
                        0.0
                    };
                    max_delta = max_delta.max((updated - alpha_class[i]).abs());
                    alpha_class[i] = updated;
                }
                if max_delta < CONVERGENCE_TOLERANCE {
                    break;
                }
            }
        }

        Ok(TrainedModel::Kernel(KernelModel {
            algorithm: params.algorithm(),
            num_labels: problem.num_labels,
            kernel,
            vectors: problem.examples.clone(),
            alpha,
        }))
    }

    fn predict(
        &self,
        model: &TrainedModel,
        encoded: &SparseVector,
        with_probabilities: bool,
    ) -> Result<Prediction> {
        let model = match model {
            TrainedModel::Kernel(m) => m,
            _ => return Err(wrong_model_kind("kernel")),
        };
        if with_probabilities {
            return Err(TrainError::ProbabilitiesUnsupported(model.algorithm));
        }
        let decisions: Vec<f64> = (0..model.num_labels)
            .map(|class| model.decision(class, encoded))
            .collect();
        let mut label = 0;
        for (i, &d) in decisions.iter().enumerate() {
            if d > decisions[label] {
                label = i;
            }
        }
        Ok(Prediction {
            label,
            distribution: None,
        })
    }

    fn serialize(&self, model: &TrainedModel) -> Result<Vec<u8>> {
        match model {
            TrainedModel::Kernel(m) => serde_json::to_vec(m)
                .map_err(|e| TrainError::Serialization(e.to_string())),
            _ => Err(wrong_model_kind("kernel")),
        }
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<TrainedModel> {
        let model: KernelModel = serde_json::from_slice(bytes)
            .map_err(|e| TrainError::Serialization(e.to_string()))?;
        Ok(TrainedModel::Kernel(model))
    }
}
