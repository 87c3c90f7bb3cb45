//! Core data types shared by the encoding layer, the backends, and the
//! evaluation engine

use crate::core::{Result, TrainError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Leading character marking a metadata feature. Metadata features stay on
/// the vector for inspection but are never encoded for a backend.
pub const METADATA_PREFIX: char = '_';

/// A named feature with a float value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub value: f64,
}

impl Feature {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Metadata features are excluded from backend encoding
    pub fn is_metadata(&self) -> bool {
        self.name.starts_with(METADATA_PREFIX)
    }
}

/// An immutable ordered sequence of features, optionally carrying an
/// opaque identifier. Feature order is caller-defined and preserved;
/// encoding to backend form re-sorts by dictionary index, not by this order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    id: Option<String>,
    features: Vec<Feature>,
}

impl Vector {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { id: None, features }
    }

    pub fn with_id(id: impl Into<String>, features: Vec<Feature>) -> Self {
        Self {
            id: Some(id.into()),
            features,
        }
    }

    /// Convenience constructor from (name, value) pairs
    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, f64)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(n, v)| Feature::new(n, v))
                .collect(),
        )
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Per-class probability payload of a labelled vector.
///
/// Three lifecycle variants by payload size: a proven label carries no
/// distribution, a 2-class outcome is compacted into a single float
/// (probability of class 0), and the general case stores an explicit array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Distribution {
    /// Label is proven; probability is all-or-nothing
    Proven,
    /// Probability of class 0; class 1 holds the complement
    Binary(f64),
    /// One probability per class
    Explicit(Vec<f64>),
}

/// A vector paired with an integer label in `[0, num_labels)` and an
/// optional per-class probability distribution.
///
/// Whether the probabilities sum to one is the backend's responsibility;
/// this layer stores whatever the backend returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledVector {
    vector: Vector,
    label: usize,
    distribution: Distribution,
}

impl LabelledVector {
    pub fn new(vector: Vector, label: usize) -> Self {
        Self {
            vector,
            label,
            distribution: Distribution::Proven,
        }
    }

    pub fn with_distribution(vector: Vector, label: usize, distribution: Distribution) -> Self {
        Self {
            vector,
            label,
            distribution,
        }
    }

    pub fn vector(&self) -> &Vector {
        &self.vector
    }

    pub fn label(&self) -> usize {
        self.label
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// Probability of `label` under the stored distribution. Labels outside
    /// the natural range yield 0.0 rather than an error.
    pub fn probability_of(&self, label: usize) -> f64 {
        match &self.distribution {
            Distribution::Proven => {
                if label == self.label {
                    1.0
                } else {
                    0.0
                }
            }
            Distribution::Binary(p0) => match label {
                0 => *p0,
                1 => 1.0 - *p0,
                _ => 0.0,
            },
            Distribution::Explicit(probs) => probs.get(label).copied().unwrap_or(0.0),
        }
    }
}

/// Sparse vector representation with sorted indices: the backend-ready
/// encoded form of a `Vector`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    /// Sorted indices of non-zero elements
    pub indices: Vec<usize>,
    /// Values corresponding to indices
    pub values: Vec<f64>,
}

impl SparseVector {
    /// Create a new sparse vector, ensuring indices are sorted
    pub fn new(indices: Vec<usize>, values: Vec<f64>) -> Self {
        assert_eq!(
            indices.len(),
            values.len(),
            "Indices and values must have same length"
        );

        let mut pairs: Vec<_> = indices.into_iter().zip(values).collect();
        pairs.sort_by_key(|&(idx, _)| idx);

        let (indices, values): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        Self { indices, values }
    }

    /// Create an empty sparse vector
    pub fn empty() -> Self {
        Self {
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Get the value at a specific index (0 if not present)
    pub fn get(&self, index: usize) -> f64 {
        match self.indices.binary_search(&index) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }

    /// Dot product with another sparse vector, merging the sorted index lists
    pub fn dot(&self, other: &SparseVector) -> f64 {
        let mut sum = 0.0;
        let (mut i, mut j) = (0, 0);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }

    /// Compute squared L2 norm
    pub fn norm_squared(&self) -> f64 {
        self.values.iter().map(|&v| v * v).sum()
    }

    /// Number of non-zero elements
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// A `num_labels x num_labels` matrix of non-negative counts indexed as
/// `[actual][predicted]`, summable element-wise across folds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    num_labels: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_labels: usize) -> Self {
        Self {
            num_labels,
            counts: vec![0; num_labels * num_labels],
        }
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Record one evaluated vector
    pub fn record(&mut self, actual: usize, predicted: usize) {
        assert!(
            actual < self.num_labels && predicted < self.num_labels,
            "label out of range: actual {actual}, predicted {predicted}, num_labels {}",
            self.num_labels
        );
        self.counts[actual * self.num_labels + predicted] += 1;
    }

    pub fn count(&self, actual: usize, predicted: usize) -> u64 {
        self.counts[actual * self.num_labels + predicted]
    }

    /// Element-wise sum with another matrix over the same label set
    pub fn add(&mut self, other: &ConfusionMatrix) -> Result<()> {
        if other.num_labels != self.num_labels {
            return Err(TrainError::SizeMismatch {
                expected: self.num_labels,
                actual: other.num_labels,
            });
        }
        for (a, b) in self.counts.iter_mut().zip(other.counts.iter()) {
            *a += *b;
        }
        Ok(())
    }

    /// Total number of evaluated vectors
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Fraction of vectors on the diagonal
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: u64 = (0..self.num_labels).map(|i| self.count(i, i)).sum();
        correct as f64 / total as f64
    }

    /// Precision for one label: `count(l, l) / sum_a count(a, l)`
    pub fn precision(&self, label: usize) -> f64 {
        let predicted: u64 = (0..self.num_labels).map(|a| self.count(a, label)).sum();
        if predicted == 0 {
            0.0
        } else {
            self.count(label, label) as f64 / predicted as f64
        }
    }

    /// Recall for one label: `count(l, l) / sum_p count(l, p)`
    pub fn recall(&self, label: usize) -> f64 {
        let actual: u64 = (0..self.num_labels).map(|p| self.count(label, p)).sum();
        if actual == 0 {
            0.0
        } else {
            self.count(label, label) as f64 / actual as f64
        }
    }

    /// F1 for one label
    pub fn f1(&self, label: usize) -> f64 {
        let p = self.precision(label);
        let r = self.recall(label);
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Unweighted mean F1 across labels
    pub fn macro_f1(&self) -> f64 {
        if self.num_labels == 0 {
            return 0.0;
        }
        (0..self.num_labels).map(|l| self.f1(l)).sum::<f64>() / self.num_labels as f64
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "actual \\ predicted")?;
        for actual in 0..self.num_labels {
            for predicted in 0..self.num_labels {
                write!(f, "{:>8}", self.count(actual, predicted))?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "total {} accuracy {:.4}",
            self.total(),
            self.accuracy()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_feature_detection() {
        assert!(Feature::new("_id", 1.0).is_metadata());
        assert!(!Feature::new("word", 1.0).is_metadata());
    }

    #[test]
    fn test_vector_preserves_order() {
        let v = Vector::from_pairs(vec![("b", 2.0), ("a", 1.0)]);
        assert_eq!(v.features()[0].name, "b");
        assert_eq!(v.features()[1].name, "a");
        assert_eq!(v.len(), 2);
        assert!(v.id().is_none());
    }

    #[test]
    fn test_probability_proven() {
        let lv = LabelledVector::new(Vector::from_pairs(vec![("a", 1.0)]), 2);
        assert_eq!(lv.probability_of(2), 1.0);
        assert_eq!(lv.probability_of(0), 0.0);
        assert_eq!(lv.probability_of(99), 0.0);
    }

    #[test]
    fn test_probability_binary() {
        let lv = LabelledVector::with_distribution(
            Vector::from_pairs(vec![("a", 1.0)]),
            0,
            Distribution::Binary(0.75),
        );
        assert_eq!(lv.probability_of(0), 0.75);
        assert_eq!(lv.probability_of(1), 0.25);
        assert_eq!(lv.probability_of(2), 0.0);
    }

    #[test]
    fn test_probability_explicit_out_of_range() {
        let lv = LabelledVector::with_distribution(
            Vector::from_pairs(vec![("a", 1.0)]),
            1,
            Distribution::Explicit(vec![0.2, 0.5, 0.3]),
        );
        assert_eq!(lv.probability_of(1), 0.5);
        assert_eq!(lv.probability_of(3), 0.0);
    }

    #[test]
    fn test_sparse_vector_sorts_indices() {
        let sv = SparseVector::new(vec![2, 0, 4], vec![2.0, 1.0, 3.0]);
        assert_eq!(sv.indices, vec![0, 2, 4]);
        assert_eq!(sv.values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_sparse_vector_dot() {
        let a = SparseVector::new(vec![0, 2, 5], vec![1.0, 2.0, 3.0]);
        let b = SparseVector::new(vec![2, 5, 7], vec![4.0, 5.0, 6.0]);
        assert_eq!(a.dot(&b), 2.0 * 4.0 + 3.0 * 5.0);
        assert_eq!(a.dot(&SparseVector::empty()), 0.0);
    }

    #[test]
    fn test_confusion_matrix_counts_and_metrics() {
        let mut m = ConfusionMatrix::new(2);
        m.record(0, 0);
        m.record(0, 0);
        m.record(0, 1);
        m.record(1, 1);
        assert_eq!(m.total(), 4);
        assert_eq!(m.count(0, 1), 1);
        assert_eq!(m.accuracy(), 0.75);
        assert_eq!(m.recall(0), 2.0 / 3.0);
        assert_eq!(m.precision(1), 0.5);
        assert!(m.f1(0) > 0.0);
    }

    #[test]
    fn test_confusion_matrix_sum() {
        let mut a = ConfusionMatrix::new(2);
        a.record(0, 0);
        let mut b = ConfusionMatrix::new(2);
        b.record(1, 0);
        a.add(&b).unwrap();
        assert_eq!(a.total(), 2);
        assert_eq!(a.count(1, 0), 1);

        let c = ConfusionMatrix::new(3);
        assert!(a.add(&c).is_err());
    }
}
