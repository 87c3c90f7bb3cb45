//! Process-wide execution context
//!
//! One explicitly constructed, explicitly injected object carries the shared
//! thread pool, the external-tool command resolver, and the backend
//! capability probe. Nothing in the crate reads global mutable state.

use crate::core::{Result, TrainError};
use crate::params::Family;
use std::collections::HashMap;
use std::sync::OnceLock;

/// How the bridge picks between the in-process and external-process
/// variants of a solver family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Probe the external tool once; use it if the probe succeeds
    #[default]
    Auto,
    /// Always use the in-process solver
    InProcess,
    /// Always use the external tool, even unprobed
    External,
}

/// Maps a logical program name to an OS command line.
///
/// Resolution order: explicit override on the context, then a
/// `GRIDTRAIN_<NAME>` environment variable, then the conventional tool name.
#[derive(Debug, Clone, Default)]
pub struct CommandResolver {
    overrides: HashMap<String, Vec<String>>,
}

impl CommandResolver {
    pub fn set(&mut self, logical_name: &str, command_line: Vec<String>) {
        self.overrides.insert(logical_name.to_string(), command_line);
    }

    pub fn resolve(&self, logical_name: &str) -> Vec<String> {
        if let Some(command) = self.overrides.get(logical_name) {
            return command.clone();
        }
        let env_key = format!(
            "GRIDTRAIN_{}",
            logical_name.to_uppercase().replace('-', "_")
        );
        if let Ok(value) = std::env::var(&env_key) {
            let parts: Vec<String> = value.split_whitespace().map(String::from).collect();
            if !parts.is_empty() {
                return parts;
            }
        }
        let default = match logical_name {
            "linear-train" => "train",
            "linear-predict" => "predict",
            "kernel-train" => "svm-train",
            "kernel-predict" => "svm-predict",
            other => other,
        };
        vec![default.to_string()]
    }
}

/// One-time capability probe per solver family, cached for the process
/// lifetime
#[derive(Debug, Default)]
pub struct CapabilityProbe {
    linear: OnceLock<bool>,
    kernel: OnceLock<bool>,
}

impl CapabilityProbe {
    pub fn get_or_probe<F: FnOnce() -> bool>(&self, family: Family, probe: F) -> bool {
        let slot = match family {
            Family::Linear => &self.linear,
            Family::Kernel => &self.kernel,
        };
        *slot.get_or_init(probe)
    }
}

/// Folds run sequentially instead of on the pool once the training set
/// exceeds this many vectors, to avoid holding several full training copies
/// in memory at once.
const DEFAULT_SEQUENTIAL_THRESHOLD: usize = 100_000;

/// Shared execution context: bounded thread pool sized to available cores,
/// backend preference, command resolver, and the capability probe
pub struct ExecContext {
    pool: rayon::ThreadPool,
    cores: usize,
    sequential_threshold: usize,
    preference: BackendPreference,
    resolver: CommandResolver,
    probe: CapabilityProbe,
}

impl ExecContext {
    /// Context with a pool sized to the available CPU cores
    pub fn new() -> Result<Self> {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_threads(cores)
    }

    /// Context with an explicitly sized pool (useful for tests)
    pub fn with_threads(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| TrainError::Concurrency(e.to_string()))?;
        Ok(Self {
            pool,
            cores: threads,
            sequential_threshold: DEFAULT_SEQUENTIAL_THRESHOLD,
            preference: BackendPreference::default(),
            resolver: CommandResolver::default(),
            probe: CapabilityProbe::default(),
        })
    }

    pub fn with_preference(mut self, preference: BackendPreference) -> Self {
        self.preference = preference;
        self
    }

    pub fn with_sequential_threshold(mut self, threshold: usize) -> Self {
        self.sequential_threshold = threshold;
        self
    }

    pub fn with_command(mut self, logical_name: &str, command_line: Vec<String>) -> Self {
        self.resolver.set(logical_name, command_line);
        self
    }

    pub fn pool(&self) -> &rayon::ThreadPool {
        &self.pool
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    pub fn sequential_threshold(&self) -> usize {
        self.sequential_threshold
    }

    pub fn preference(&self) -> BackendPreference {
        self.preference
    }

    pub fn resolver(&self) -> &CommandResolver {
        &self.resolver
    }

    pub fn probe(&self) -> &CapabilityProbe {
        &self.probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_override_beats_default() {
        let mut resolver = CommandResolver::default();
        assert_eq!(resolver.resolve("kernel-train"), vec!["svm-train"]);
        resolver.set(
            "kernel-train",
            vec!["/opt/libsvm/svm-train".to_string(), "-q".to_string()],
        );
        assert_eq!(
            resolver.resolve("kernel-train"),
            vec!["/opt/libsvm/svm-train", "-q"]
        );
    }

    #[test]
    fn test_probe_runs_once() {
        let probe = CapabilityProbe::default();
        let mut calls = 0;
        for _ in 0..3 {
            probe.get_or_probe(Family::Linear, || {
                calls += 1;
                false
            });
        }
        assert_eq!(calls, 1);
        // The kernel family probes independently
        assert!(probe.get_or_probe(Family::Kernel, || true));
    }

    #[test]
    fn test_context_builders() {
        let ctx = ExecContext::with_threads(2)
            .unwrap()
            .with_preference(BackendPreference::InProcess)
            .with_sequential_threshold(10);
        assert_eq!(ctx.cores(), 2);
        assert_eq!(ctx.preference(), BackendPreference::InProcess);
        assert_eq!(ctx.sequential_threshold(), 10);
    }
}
