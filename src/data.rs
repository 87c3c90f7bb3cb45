//! Named-feature training file format
//!
//! One example per line:
//! label name:value name:value ...
//!
//! Example:
//! 0 width:0.5 colour_red:1
//! 1 width:2.3 colour_blue:1
//!
//! Labels are non-negative integers. Empty lines and `#` comments are
//! skipped. Feature names may themselves contain `:`; the value starts
//! after the last one.

use crate::core::{Feature, LabelledVector, Result, TrainError, Vector};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A training set loaded from a named-feature file
#[derive(Debug, Clone)]
pub struct TrainingFile {
    examples: Vec<LabelledVector>,
    num_labels: usize,
}

impl TrainingFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut examples = Vec::new();
        let mut max_label = 0;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let example = parse_line(line).map_err(|e| {
                TrainError::Parse(format!("line {}: {}", line_num + 1, e))
            })?;
            max_label = max_label.max(example.label());
            examples.push(example);
        }

        if examples.is_empty() {
            return Err(TrainError::EmptyTrainingSet);
        }
        Ok(TrainingFile {
            examples,
            num_labels: max_label + 1,
        })
    }

    pub fn examples(&self) -> &[LabelledVector] {
        &self.examples
    }

    pub fn into_examples(self) -> Vec<LabelledVector> {
        self.examples
    }

    /// Highest label seen plus one
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

fn parse_line(line: &str) -> std::result::Result<LabelledVector, String> {
    let mut parts = line.split_whitespace();
    let label_token = parts.next().ok_or_else(|| "empty line".to_string())?;
    let label = label_token
        .parse::<usize>()
        .map_err(|_| format!("invalid label: {label_token}"))?;

    let mut features = Vec::new();
    for token in parts {
        let (name, value_token) = token
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid feature: {token}"))?;
        if name.is_empty() {
            return Err(format!("invalid feature: {token}"));
        }
        let value = value_token
            .parse::<f64>()
            .map_err(|_| format!("invalid feature value: {token}"))?;
        features.push(Feature::new(name, value));
    }

    Ok(LabelledVector::new(Vector::new(features), label))
}
