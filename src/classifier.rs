//! The public classifier: train, predict, persist
//!
//! A trained classifier owns a frozen dictionary and an opaque model from
//! exactly one backend. Its identity is a content hash over the dictionary
//! contents and the serialized model bytes, so classifiers trained in
//! different processes compare equal when they are the same trained model.

use crate::backend::{self, Backend, TrainedModel, Variant};
use crate::context::ExecContext;
use crate::core::{Distribution, LabelledVector, Result, TrainError, Vector};
use crate::dictionary::Dictionary;
use crate::encoding::{self, encode_fixed};
use crate::params::Parameters;
use crate::store::{ModelReader, ModelWriter};
use log::info;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

/// Entry names inside a persisted model root
const PARAMETERS_ENTRY: &str = "parameters";
const DICTIONARY_ENTRY: &str = "dictionary";
const MODEL_ENTRY: &str = "model";

/// Key inside the parameters entry naming the backend variant that
/// serialized the model bytes
const BACKEND_KEY: &str = "backend";

pub struct Classifier {
    params: Parameters,
    dictionary: Dictionary<String>,
    model: TrainedModel,
    model_bytes: Vec<u8>,
    backend: Arc<dyn Backend>,
    content_hash: String,
}

impl Classifier {
    /// Train a classifier. Builds a fresh dictionary while encoding the
    /// training set, dispatches to the backend the parameters select, and
    /// wraps the result with its content hash.
    pub fn train(
        ctx: &ExecContext,
        params: &Parameters,
        training_set: &[LabelledVector],
    ) -> Result<Classifier> {
        params.validate()?;
        if training_set.is_empty() {
            return Err(TrainError::EmptyTrainingSet);
        }

        let mut dictionary = Dictionary::new();
        let problem =
            encoding::encode_problem(&mut dictionary, training_set, params.num_labels())?;
        let backend = backend::select(params.algorithm(), ctx);
        let model = backend.train(&problem, params)?;
        let model_bytes = backend.serialize(&model)?;
        let dictionary = dictionary.freeze();
        let content_hash = content_hash(&dictionary, &model_bytes);

        info!(
            "trained {} classifier {} on {} vectors ({} features)",
            params.algorithm(),
            &content_hash[..12],
            training_set.len(),
            dictionary.len()
        );

        Ok(Classifier {
            params: params.clone(),
            dictionary,
            model,
            model_bytes,
            backend,
            content_hash,
        })
    }

    /// Predict one vector against the frozen dictionary. Unseen features
    /// are silently dropped, never added.
    pub fn predict(&self, vector: &Vector, with_probabilities: bool) -> Result<LabelledVector> {
        self.check_probability_support(with_probabilities)?;
        let encoded = encode_fixed(&self.dictionary, vector);
        let prediction = self
            .backend
            .predict(&self.model, &encoded, with_probabilities)?;
        Ok(LabelledVector::with_distribution(
            vector.clone(),
            prediction.label,
            prediction.distribution.unwrap_or(Distribution::Proven),
        ))
    }

    /// Predict a batch of vectors in input order
    pub fn predict_batch(
        &self,
        vectors: &[Vector],
        with_probabilities: bool,
    ) -> Result<Vec<LabelledVector>> {
        self.check_probability_support(with_probabilities)?;
        let encoded: Vec<_> = vectors
            .iter()
            .map(|v| encode_fixed(&self.dictionary, v))
            .collect();
        let predictions = self
            .backend
            .predict_batch(&self.model, &encoded, with_probabilities)?;
        if predictions.len() != vectors.len() {
            return Err(TrainError::SizeMismatch {
                expected: vectors.len(),
                actual: predictions.len(),
            });
        }
        Ok(vectors
            .iter()
            .zip(predictions)
            .map(|(vector, prediction)| {
                LabelledVector::with_distribution(
                    vector.clone(),
                    prediction.label,
                    prediction.distribution.unwrap_or(Distribution::Proven),
                )
            })
            .collect())
    }

    fn check_probability_support(&self, with_probabilities: bool) -> Result<()> {
        if with_probabilities && !self.params.algorithm().supports_probabilities() {
            return Err(TrainError::ProbabilitiesUnsupported(
                self.params.algorithm(),
            ));
        }
        Ok(())
    }

    /// Persist into a directory or zip root chosen by the path's extension
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = ModelWriter::open(path)?;
        let mut properties = self.params.to_properties();
        let _ = writeln!(properties, "{BACKEND_KEY}={}", self.model.variant());
        writer.put(PARAMETERS_ENTRY, properties.as_bytes())?;
        let mut dictionary_bytes = Vec::new();
        self.dictionary.write_text(&mut dictionary_bytes)?;
        writer.put(DICTIONARY_ENTRY, &dictionary_bytes)?;
        writer.put(MODEL_ENTRY, &self.model_bytes)?;
        writer.finish()
    }

    /// Reload a persisted classifier. The backend variant recorded at write
    /// time decodes the model bytes; roots written before the variant was
    /// recorded fall back to context selection.
    pub fn read_from<P: AsRef<Path>>(ctx: &ExecContext, path: P) -> Result<Classifier> {
        let mut reader = ModelReader::open(path)?;

        let params_text = String::from_utf8(reader.get(PARAMETERS_ENTRY)?)
            .map_err(|e| TrainError::Parse(format!("invalid parameters entry: {e}")))?;
        let params = Parameters::from_properties(&params_text)?;

        let dictionary_bytes = reader.get(DICTIONARY_ENTRY)?;
        let dictionary = Dictionary::read_text(&dictionary_bytes[..])?.freeze();

        let model_bytes = reader.get(MODEL_ENTRY)?;
        let backend = match persisted_variant(&params_text)? {
            Some(variant) => backend::for_variant(params.algorithm(), ctx, variant),
            None => backend::select(params.algorithm(), ctx),
        };
        let model = backend.deserialize(&model_bytes)?;
        let content_hash = content_hash(&dictionary, &model_bytes);

        Ok(Classifier {
            params,
            dictionary,
            model,
            model_bytes,
            backend,
            content_hash,
        })
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn dictionary(&self) -> &Dictionary<String> {
        &self.dictionary
    }

    /// Stable identity over dictionary contents and model bytes
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

fn persisted_variant(properties: &str) -> Result<Option<Variant>> {
    for line in properties.lines() {
        if let Some(value) = line.strip_prefix(BACKEND_KEY) {
            if let Some(value) = value.strip_prefix('=') {
                return Variant::parse(value.trim()).map(Some);
            }
        }
    }
    Ok(None)
}

/// SHA-256 over the length-prefixed dictionary elements followed by the
/// serialized model bytes
fn content_hash(dictionary: &Dictionary<String>, model_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    for element in dictionary.elements() {
        hasher.update((element.len() as u64).to_le_bytes());
        hasher.update(element.as_bytes());
    }
    hasher.update((model_bytes.len() as u64).to_le_bytes());
    hasher.update(model_bytes);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

impl PartialEq for Classifier {
    fn eq(&self, other: &Self) -> bool {
        self.content_hash == other.content_hash
    }
}

impl Eq for Classifier {}

impl Hash for Classifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.content_hash.hash(state);
    }
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content_hash)
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("algorithm", &self.params.algorithm())
            .field("num_labels", &self.params.num_labels())
            .field("features", &self.dictionary.len())
            .field("content_hash", &self.content_hash)
            .finish()
    }
}
