//! Backend bridge: one contract, four variants
//!
//! Each solver family (linear, kernel) has an in-process implementation and
//! an external-process implementation. Family selection is a pure function
//! of the algorithm; in-process vs external is decided once per family by a
//! capability probe (or forced by the context's backend preference) and
//! never re-checked per call.

pub mod external;
pub mod kernel;
pub mod linear;

use crate::context::{BackendPreference, ExecContext};
use crate::core::{Distribution, Result, SparseVector, TrainError};
use crate::encoding::EncodedProblem;
use crate::params::{Algorithm, Family, Parameters};
use std::fmt;
use std::sync::Arc;

/// Which side of the bridge produced a model. Persisted alongside the model
/// bytes, since the two variants use incompatible serialized forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    InProcess,
    External,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::InProcess => "in-process",
            Variant::External => "external",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "in-process" => Ok(Variant::InProcess),
            "external" => Ok(Variant::External),
            other => Err(TrainError::Parse(format!(
                "unknown backend variant: {other}"
            ))),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single backend prediction
#[derive(Debug, Clone)]
pub struct Prediction {
    pub label: usize,
    pub distribution: Option<Distribution>,
}

/// Opaque trained model handle. Exactly one variant matches the backend
/// that produced it.
#[derive(Debug, Clone)]
pub enum TrainedModel {
    Linear(linear::LinearModel),
    Kernel(kernel::KernelModel),
    /// Raw model file bytes produced by an external solver process
    External(Vec<u8>),
}

impl TrainedModel {
    pub fn variant(&self) -> Variant {
        match self {
            TrainedModel::External(_) => Variant::External,
            _ => Variant::InProcess,
        }
    }
}

/// The contract every backend variant implements
pub trait Backend: Send + Sync {
    /// Train an opaque model from an encoded problem
    fn train(&self, problem: &EncodedProblem, params: &Parameters) -> Result<TrainedModel>;

    /// Predict a label (and optionally a distribution) for one encoded vector
    fn predict(
        &self,
        model: &TrainedModel,
        encoded: &SparseVector,
        with_probabilities: bool,
    ) -> Result<Prediction>;

    /// Predict many encoded vectors. External backends override this to
    /// amortize one process invocation over the whole batch.
    fn predict_batch(
        &self,
        model: &TrainedModel,
        encoded: &[SparseVector],
        with_probabilities: bool,
    ) -> Result<Vec<Prediction>> {
        encoded
            .iter()
            .map(|v| self.predict(model, v, with_probabilities))
            .collect()
    }

    fn serialize(&self, model: &TrainedModel) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<TrainedModel>;
}

/// Select the backend variant for `algorithm` under the given context
pub fn select(algorithm: Algorithm, ctx: &ExecContext) -> Arc<dyn Backend> {
    let family = algorithm.family();
    let use_external = match ctx.preference() {
        BackendPreference::InProcess => false,
        BackendPreference::External => true,
        BackendPreference::Auto => ctx
            .probe()
            .get_or_probe(family, || external::probe_tool(ctx.resolver(), family)),
    };
    let variant = if use_external {
        Variant::External
    } else {
        Variant::InProcess
    };
    for_variant(algorithm, ctx, variant)
}

/// Backend for a known variant, bypassing preference and probing. Reloading
/// a persisted model uses this so the recorded variant always decodes its
/// own bytes.
pub fn for_variant(algorithm: Algorithm, ctx: &ExecContext, variant: Variant) -> Arc<dyn Backend> {
    match (algorithm.family(), variant) {
        (Family::Linear, Variant::InProcess) => Arc::new(linear::LinearBackend),
        (Family::Kernel, Variant::InProcess) => Arc::new(kernel::KernelBackend),
        (family, Variant::External) => Arc::new(external::ExternalBackend::new(
            family,
            ctx.resolver().clone(),
        )),
    }
}

pub(crate) fn wrong_model_kind(expected: &str) -> TrainError {
    TrainError::Backend(format!("model was not trained by the {expected} backend"))
}
