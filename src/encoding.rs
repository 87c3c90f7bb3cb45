//! Encoding between the named-feature vector model and the numeric
//! sparse form the backends consume
//!
//! Training-time encoding grows the dictionary; prediction-time encoding
//! never does, silently dropping features the dictionary has not seen.
//! Metadata features (leading underscore) are skipped in both directions.

use crate::core::{LabelledVector, Result, SparseVector, TrainError, Vector};
use crate::dictionary::Dictionary;
use std::collections::BTreeMap;

/// A fully encoded training problem: one sparse example per vector, a
/// parallel label array, and the dimensions the backend needs
#[derive(Debug, Clone)]
pub struct EncodedProblem {
    pub examples: Vec<SparseVector>,
    pub labels: Vec<usize>,
    pub num_features: usize,
    pub num_labels: usize,
}

impl EncodedProblem {
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

/// Encode one vector while training, growing `dictionary` for unseen
/// feature names. The result is sorted by dictionary index.
pub fn encode_growing(dictionary: &mut Dictionary<String>, vector: &Vector) -> SparseVector {
    let mut by_index: BTreeMap<usize, f64> = BTreeMap::new();
    for feature in vector.features() {
        if feature.is_metadata() {
            continue;
        }
        if let Some(index) = dictionary.index_for(&feature.name) {
            by_index.insert(index, feature.value);
        }
    }
    from_index_map(by_index)
}

/// Encode one vector against an existing dictionary. Unseen features are
/// dropped, never added; the dictionary may be frozen and shared.
pub fn encode_fixed(dictionary: &Dictionary<String>, vector: &Vector) -> SparseVector {
    let mut by_index: BTreeMap<usize, f64> = BTreeMap::new();
    for feature in vector.features() {
        if feature.is_metadata() {
            continue;
        }
        if let Some(index) = dictionary.index_of(&feature.name) {
            by_index.insert(index, feature.value);
        }
    }
    from_index_map(by_index)
}

/// Encode a whole training set, building the dictionary as a side effect
pub fn encode_problem(
    dictionary: &mut Dictionary<String>,
    training_set: &[LabelledVector],
    num_labels: usize,
) -> Result<EncodedProblem> {
    if training_set.is_empty() {
        return Err(TrainError::EmptyTrainingSet);
    }
    let mut examples = Vec::with_capacity(training_set.len());
    let mut labels = Vec::with_capacity(training_set.len());
    for labelled in training_set {
        if labelled.label() >= num_labels {
            return Err(TrainError::InvalidParameter(format!(
                "label {} out of range for numLabels {}",
                labelled.label(),
                num_labels
            )));
        }
        examples.push(encode_growing(dictionary, labelled.vector()));
        labels.push(labelled.label());
    }
    Ok(EncodedProblem {
        examples,
        labels,
        num_features: dictionary.len(),
        num_labels,
    })
}

fn from_index_map(by_index: BTreeMap<usize, f64>) -> SparseVector {
    let mut indices = Vec::with_capacity(by_index.len());
    let mut values = Vec::with_capacity(by_index.len());
    for (index, value) in by_index {
        indices.push(index);
        values.push(value);
    }
    SparseVector { indices, values }
}
