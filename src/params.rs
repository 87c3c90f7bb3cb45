//! Training parameters: algorithm selection, regularization, per-class
//! weights, backend knobs, and hyperparameter grid expansion

use crate::core::{Result, TrainError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Solver family a parameter set dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Linear,
    Kernel,
}

/// Algorithm selector. The first four are linear-model variants
/// (regularizer x loss), the rest kernel-machine variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    LogisticL1,
    LogisticL2,
    HingeL1,
    HingeL2,
    KernelLinear,
    KernelRbf,
    KernelSigmoid,
    KernelPoly,
}

impl Algorithm {
    pub fn family(self) -> Family {
        match self {
            Algorithm::LogisticL1
            | Algorithm::LogisticL2
            | Algorithm::HingeL1
            | Algorithm::HingeL2 => Family::Linear,
            _ => Family::Kernel,
        }
    }

    /// Only the logistic-loss linear variants produce calibrated
    /// probability estimates
    pub fn supports_probabilities(self) -> bool {
        matches!(self, Algorithm::LogisticL1 | Algorithm::LogisticL2)
    }

    fn uses_bias(self) -> bool {
        self.family() == Family::Linear
    }

    fn uses_dual(self) -> bool {
        self.family() == Family::Linear
    }

    fn uses_gamma(self) -> bool {
        matches!(
            self,
            Algorithm::KernelRbf | Algorithm::KernelSigmoid | Algorithm::KernelPoly
        )
    }

    fn uses_coef0(self) -> bool {
        matches!(self, Algorithm::KernelSigmoid | Algorithm::KernelPoly)
    }

    fn uses_degree(self) -> bool {
        self == Algorithm::KernelPoly
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::LogisticL1 => "logistic-l1",
            Algorithm::LogisticL2 => "logistic-l2",
            Algorithm::HingeL1 => "hinge-l1",
            Algorithm::HingeL2 => "hinge-l2",
            Algorithm::KernelLinear => "kernel-linear",
            Algorithm::KernelRbf => "kernel-rbf",
            Algorithm::KernelSigmoid => "kernel-sigmoid",
            Algorithm::KernelPoly => "kernel-poly",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "logistic-l1" => Ok(Algorithm::LogisticL1),
            "logistic-l2" => Ok(Algorithm::LogisticL2),
            "hinge-l1" => Ok(Algorithm::HingeL1),
            "hinge-l2" => Ok(Algorithm::HingeL2),
            "kernel-linear" => Ok(Algorithm::KernelLinear),
            "kernel-rbf" => Ok(Algorithm::KernelRbf),
            "kernel-sigmoid" => Ok(Algorithm::KernelSigmoid),
            "kernel-poly" => Ok(Algorithm::KernelPoly),
            other => Err(TrainError::Parse(format!("unknown algorithm: {other}"))),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grid expansion bounds for C
const C_BOUNDS: (f64, f64) = (0.01, 100_000.0);
/// Grid expansion bounds for the bias value
const BIAS_BOUNDS: (f64, f64) = (0.01, 1_000.0);
/// Grid expansion bounds for gamma
const GAMMA_BOUNDS: (f64, f64) = (1e-6, 8.0);

/// Immutable training parameters.
///
/// Knobs irrelevant to the selected algorithm are always `None`, even if
/// supplied through the builder; equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    algorithm: Algorithm,
    num_labels: usize,
    c: f64,
    weights: Option<Vec<f64>>,
    bias: Option<f64>,
    dual: Option<bool>,
    gamma: Option<f64>,
    coef0: Option<f64>,
    degree: Option<u32>,
}

impl Parameters {
    pub fn new(algorithm: Algorithm, num_labels: usize) -> Self {
        Self {
            algorithm,
            num_labels,
            c: 1.0,
            weights: None,
            bias: None,
            dual: None,
            gamma: None,
            coef0: None,
            degree: None,
        }
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn with_weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_bias(mut self, bias: f64) -> Self {
        if self.algorithm.uses_bias() {
            self.bias = Some(bias);
        }
        self
    }

    pub fn with_dual(mut self, dual: bool) -> Self {
        if self.algorithm.uses_dual() {
            self.dual = Some(dual);
        }
        self
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        if self.algorithm.uses_gamma() {
            self.gamma = Some(gamma);
        }
        self
    }

    pub fn with_coef0(mut self, coef0: f64) -> Self {
        if self.algorithm.uses_coef0() {
            self.coef0 = Some(coef0);
        }
        self
    }

    pub fn with_degree(mut self, degree: u32) -> Self {
        if self.algorithm.uses_degree() {
            self.degree = Some(degree);
        }
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    pub fn bias(&self) -> Option<f64> {
        self.bias
    }

    pub fn dual(&self) -> Option<bool> {
        self.dual
    }

    pub fn gamma(&self) -> Option<f64> {
        self.gamma
    }

    pub fn coef0(&self) -> Option<f64> {
        self.coef0
    }

    pub fn degree(&self) -> Option<u32> {
        self.degree
    }

    /// Check the structural invariants before training
    pub fn validate(&self) -> Result<()> {
        if self.num_labels < 2 {
            return Err(TrainError::InvalidParameter(format!(
                "numLabels must be >= 2, got {}",
                self.num_labels
            )));
        }
        if !(self.c > 0.0) || !self.c.is_finite() {
            return Err(TrainError::InvalidParameter(format!(
                "c must be positive, got {}",
                self.c
            )));
        }
        if let Some(weights) = &self.weights {
            if weights.len() != self.num_labels {
                return Err(TrainError::SizeMismatch {
                    expected: self.num_labels,
                    actual: weights.len(),
                });
            }
            if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
                return Err(TrainError::InvalidParameter(
                    "class weights must be positive and finite".to_string(),
                ));
            }
        }
        if let Some(gamma) = self.gamma {
            if !(gamma > 0.0) || !gamma.is_finite() {
                return Err(TrainError::InvalidParameter(format!(
                    "gamma must be positive, got {gamma}"
                )));
            }
        }
        if self.degree == Some(0) {
            return Err(TrainError::InvalidParameter(
                "polynomial degree must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Expand this parameter set into a bounded candidate grid.
    ///
    /// C is always expanded; bias only when this set's bias is positive;
    /// gamma only when this set defines gamma. Each axis grows by repeated
    /// multiplication and division with `multiplier` inside fixed bounds,
    /// and axes are trimmed so the Cartesian product never exceeds
    /// `max_combinations`. This parameter set itself is always element 0.
    pub fn grid(&self, max_combinations: usize, multiplier: f64) -> Vec<Parameters> {
        if max_combinations <= 1 || multiplier <= 1.0 {
            return vec![self.clone()];
        }

        let mut c_axis = expand_axis(self.c, multiplier, C_BOUNDS);
        let mut bias_axis = match self.bias {
            Some(b) if b > 0.0 => expand_axis(b, multiplier, BIAS_BOUNDS),
            _ => vec![],
        };
        let mut gamma_axis = match self.gamma {
            Some(g) => expand_axis(g, multiplier, GAMMA_BOUNDS),
            None => vec![],
        };

        // Trim the longest axis until the product fits the budget
        loop {
            let product =
                c_axis.len() * bias_axis.len().max(1) * gamma_axis.len().max(1);
            if product <= max_combinations {
                break;
            }
            let longest = [&mut c_axis, &mut bias_axis, &mut gamma_axis]
                .into_iter()
                .max_by_key(|axis| axis.len())
                .unwrap();
            longest.pop();
        }

        let mut combos = Vec::new();
        for &c in &c_axis {
            for bias_idx in 0..bias_axis.len().max(1) {
                for gamma_idx in 0..gamma_axis.len().max(1) {
                    let mut candidate = self.clone();
                    candidate.c = c;
                    if let Some(&b) = bias_axis.get(bias_idx) {
                        candidate.bias = Some(b);
                    }
                    if let Some(&g) = gamma_axis.get(gamma_idx) {
                        candidate.gamma = Some(g);
                    }
                    combos.push(candidate);
                }
            }
        }
        combos
    }

    /// Render as `key=value` property text, the format stored inside a
    /// persisted model root
    pub fn to_properties(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# created {}\n", chrono::Utc::now().to_rfc3339()));
        out.push_str(&format!("algorithm={}\n", self.algorithm));
        out.push_str(&format!("numLabels={}\n", self.num_labels));
        out.push_str(&format!("c={}\n", self.c));
        if let Some(weights) = &self.weights {
            for (i, w) in weights.iter().enumerate() {
                out.push_str(&format!("weight.{i}={w}\n"));
            }
        }
        if let Some(bias) = self.bias {
            out.push_str(&format!("bias={bias}\n"));
        }
        if let Some(dual) = self.dual {
            out.push_str(&format!("dual={dual}\n"));
        }
        if let Some(gamma) = self.gamma {
            out.push_str(&format!("gamma={gamma}\n"));
        }
        if let Some(coef0) = self.coef0 {
            out.push_str(&format!("coeff={coef0}\n"));
        }
        if let Some(degree) = self.degree {
            out.push_str(&format!("degree={degree}\n"));
        }
        out
    }

    /// Parse the property text produced by [`to_properties`](Self::to_properties)
    pub fn from_properties(text: &str) -> Result<Parameters> {
        let mut map: BTreeMap<&str, &str> = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| TrainError::Parse(format!("malformed property line: {line}")))?;
            map.insert(key.trim(), value.trim());
        }

        let algorithm = Algorithm::parse(
            map.get("algorithm")
                .ok_or_else(|| TrainError::MissingEntry("algorithm".to_string()))?,
        )?;
        let num_labels = parse_value::<usize>(&map, "numLabels")?
            .ok_or_else(|| TrainError::MissingEntry("numLabels".to_string()))?;
        let c = parse_value::<f64>(&map, "c")?
            .ok_or_else(|| TrainError::MissingEntry("c".to_string()))?;

        let mut params = Parameters::new(algorithm, num_labels).with_c(c);

        let mut weights = Vec::new();
        for i in 0.. {
            match map.get(format!("weight.{i}").as_str()) {
                Some(value) => weights.push(value.parse::<f64>().map_err(|e| {
                    TrainError::Parse(format!("invalid weight.{i}: {e}"))
                })?),
                None => break,
            }
        }
        if !weights.is_empty() {
            params = params.with_weights(weights);
        }
        if let Some(bias) = parse_value::<f64>(&map, "bias")? {
            params = params.with_bias(bias);
        }
        if let Some(dual) = parse_value::<bool>(&map, "dual")? {
            params = params.with_dual(dual);
        }
        if let Some(gamma) = parse_value::<f64>(&map, "gamma")? {
            params = params.with_gamma(gamma);
        }
        if let Some(coef0) = parse_value::<f64>(&map, "coeff")? {
            params = params.with_coef0(coef0);
        }
        if let Some(degree) = parse_value::<u32>(&map, "degree")? {
            params = params.with_degree(degree);
        }

        params.validate()?;
        Ok(params)
    }
}

// Structural equality holds because validate() rejects NaN knobs
impl Eq for Parameters {}

impl Hash for Parameters {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.algorithm.hash(state);
        self.num_labels.hash(state);
        float_bits(self.c).hash(state);
        if let Some(weights) = &self.weights {
            for &w in weights {
                float_bits(w).hash(state);
            }
        }
        self.bias.map(float_bits).hash(state);
        self.dual.hash(state);
        self.gamma.map(float_bits).hash(state);
        self.coef0.map(float_bits).hash(state);
        self.degree.hash(state);
    }
}

/// Hashable bit pattern with -0.0 folded into +0.0, since the two compare
/// equal under `==`
fn float_bits(v: f64) -> u64 {
    (v + 0.0).to_bits()
}

fn parse_value<T: std::str::FromStr>(
    map: &BTreeMap<&str, &str>,
    key: &str,
) -> Result<Option<T>>
where
    T::Err: fmt::Display,
{
    match map.get(key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| TrainError::Parse(format!("invalid {key}: {e}"))),
        None => Ok(None),
    }
}

/// Expand one axis around its seed value: the seed first, then alternating
/// multiplied and divided values while they stay inside `bounds`
fn expand_axis(seed: f64, multiplier: f64, bounds: (f64, f64)) -> Vec<f64> {
    let (lo, hi) = bounds;
    let mut axis = vec![seed];
    let mut up = seed * multiplier;
    let mut down = seed / multiplier;
    loop {
        let mut grew = false;
        if up <= hi {
            axis.push(up);
            up *= multiplier;
            grew = true;
        }
        if down >= lo {
            axis.push(down);
            down /= multiplier;
            grew = true;
        }
        if !grew {
            break;
        }
    }
    axis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irrelevant_knobs_stay_absent() {
        let params = Parameters::new(Algorithm::LogisticL2, 2)
            .with_gamma(0.5)
            .with_degree(3)
            .with_bias(1.0);
        assert_eq!(params.gamma(), None);
        assert_eq!(params.degree(), None);
        assert_eq!(params.bias(), Some(1.0));

        let kernel = Parameters::new(Algorithm::KernelRbf, 2)
            .with_gamma(0.5)
            .with_bias(1.0)
            .with_dual(true);
        assert_eq!(kernel.gamma(), Some(0.5));
        assert_eq!(kernel.bias(), None);
        assert_eq!(kernel.dual(), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(Parameters::new(Algorithm::LogisticL2, 1).validate().is_err());
        assert!(Parameters::new(Algorithm::LogisticL2, 2)
            .with_c(0.0)
            .validate()
            .is_err());
        assert!(Parameters::new(Algorithm::LogisticL2, 2)
            .with_weights(vec![1.0])
            .validate()
            .is_err());
        assert!(Parameters::new(Algorithm::LogisticL2, 2)
            .with_weights(vec![1.0, 2.0])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_grid_contains_seed_first_and_respects_bound() {
        let seed = Parameters::new(Algorithm::KernelRbf, 2)
            .with_c(1.0)
            .with_gamma(0.25);
        for max in [1, 2, 5, 10, 50] {
            let grid = seed.grid(max, 2.0);
            assert!(!grid.is_empty());
            assert!(grid.len() <= max, "len {} > max {}", grid.len(), max);
            assert_eq!(grid[0], seed);
        }
    }

    #[test]
    fn test_grid_expands_only_defined_axes() {
        let seed = Parameters::new(Algorithm::LogisticL2, 2).with_c(1.0);
        let grid = seed.grid(100, 10.0);
        assert!(grid.len() > 1);
        // No bias and no gamma on the seed, so only C varies
        assert!(grid.iter().all(|p| p.bias().is_none() && p.gamma().is_none()));
        let mut cs: Vec<f64> = grid.iter().map(|p| p.c()).collect();
        cs.dedup();
        assert_eq!(cs.len(), grid.len());
    }

    #[test]
    fn test_properties_round_trip() {
        let params = Parameters::new(Algorithm::KernelPoly, 3)
            .with_c(4.0)
            .with_weights(vec![1.0, 2.0, 0.5])
            .with_gamma(0.125)
            .with_coef0(1.0)
            .with_degree(3);
        let text = params.to_properties();
        let parsed = Parameters::from_properties(&text).unwrap();
        assert_eq!(parsed, params);
    }

    #[test]
    fn test_properties_malformed() {
        assert!(Parameters::from_properties("algorithm=unknown\nnumLabels=2\nc=1").is_err());
        assert!(Parameters::from_properties("numLabels=2\nc=1").is_err());
        assert!(Parameters::from_properties("algorithm=logistic-l2\nnumLabels=two\nc=1").is_err());
    }

    #[test]
    fn test_structural_hash_and_eq() {
        use std::collections::HashSet;
        let a = Parameters::new(Algorithm::LogisticL2, 2).with_c(2.0);
        let b = Parameters::new(Algorithm::LogisticL2, 2).with_c(2.0);
        let c = Parameters::new(Algorithm::LogisticL2, 2).with_c(3.0);
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn test_negative_zero_coef0_hashes_like_positive_zero() {
        use std::collections::hash_map::DefaultHasher;

        fn fingerprint(params: &Parameters) -> u64 {
            let mut hasher = DefaultHasher::new();
            params.hash(&mut hasher);
            hasher.finish()
        }

        let pos = Parameters::new(Algorithm::KernelSigmoid, 2).with_coef0(0.0);
        let neg = Parameters::new(Algorithm::KernelSigmoid, 2).with_coef0(-0.0);
        assert_eq!(pos, neg);
        assert_eq!(fingerprint(&pos), fingerprint(&neg));
    }
}
