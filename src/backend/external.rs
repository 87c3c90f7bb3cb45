//! External-process backend
//!
//! Serializes the encoded problem to a scratch file in the sparse
//! `label index:value ...` line format, spawns the configured solver
//! command with flags derived from the parameters, drains its stderr on a
//! separate thread so the process cannot deadlock on a full OS pipe, and
//! loads the resulting model file. Stdout `key = value` tokens are scraped
//! into a best-effort diagnostics map; only the model file is authoritative.
//!
//! There is no timeout on the solver process: a hung solver hangs the
//! caller. Callers that cannot tolerate that should force the in-process
//! variant through [`BackendPreference`](crate::context::BackendPreference).

use crate::backend::{wrong_model_kind, Backend, Prediction, TrainedModel};
use crate::context::CommandResolver;
use crate::core::{Distribution, Result, SparseVector, TrainError};
use crate::encoding::EncodedProblem;
use crate::params::{Algorithm, Family, Parameters};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;

/// Probe whether the family's external train tool can be spawned at all.
/// The result is cached by the context for the process lifetime.
pub fn probe_tool(resolver: &CommandResolver, family: Family) -> bool {
    let argv = resolver.resolve(&logical_name(family, "train"));
    let spawned = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(mut child) => {
            let _ = child.kill();
            let _ = child.wait();
            info!("external {family:?} solver `{}` is available", argv[0]);
            true
        }
        Err(e) => {
            info!(
                "external {family:?} solver `{}` unavailable ({e}), using in-process variant",
                argv[0]
            );
            false
        }
    }
}

fn logical_name(family: Family, op: &str) -> String {
    let family = match family {
        Family::Linear => "linear",
        Family::Kernel => "kernel",
    };
    format!("{family}-{op}")
}

/// Solver-family selector codes understood by the external tools
fn linear_solver_code(algorithm: Algorithm, dual: bool) -> &'static str {
    match (algorithm, dual) {
        (Algorithm::LogisticL2, false) => "0",
        (Algorithm::LogisticL2, true) => "7",
        (Algorithm::LogisticL1, _) => "6",
        (Algorithm::HingeL2, false) => "2",
        (Algorithm::HingeL2, true) => "1",
        (Algorithm::HingeL1, _) => "5",
        _ => "0",
    }
}

fn kernel_type_code(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::KernelLinear => "0",
        Algorithm::KernelPoly => "1",
        Algorithm::KernelRbf => "2",
        Algorithm::KernelSigmoid => "3",
        _ => "2",
    }
}

pub struct ExternalBackend {
    family: Family,
    resolver: CommandResolver,
}

impl ExternalBackend {
    pub fn new(family: Family, resolver: CommandResolver) -> Self {
        Self { family, resolver }
    }

    fn train_flags(&self, params: &Parameters) -> Vec<String> {
        let mut flags = Vec::new();
        match self.family {
            Family::Linear => {
                flags.push("-s".to_string());
                flags.push(linear_solver_code(
                    params.algorithm(),
                    params.dual().unwrap_or(false),
                )
                .to_string());
                if let Some(bias) = params.bias() {
                    flags.push("-B".to_string());
                    flags.push(bias.to_string());
                }
            }
            Family::Kernel => {
                flags.push("-t".to_string());
                flags.push(kernel_type_code(params.algorithm()).to_string());
                if let Some(gamma) = params.gamma() {
                    flags.push("-g".to_string());
                    flags.push(gamma.to_string());
                }
                if let Some(coef0) = params.coef0() {
                    flags.push("-r".to_string());
                    flags.push(coef0.to_string());
                }
                if let Some(degree) = params.degree() {
                    flags.push("-d".to_string());
                    flags.push(degree.to_string());
                }
            }
        }
        flags.push("-c".to_string());
        flags.push(params.c().to_string());
        if let Some(weights) = params.weights() {
            for (i, w) in weights.iter().enumerate() {
                flags.push(format!("-w{i}"));
                flags.push(w.to_string());
            }
        }
        flags
    }

    /// Spawn the resolved command, drain stderr to the logger on its own
    /// thread, scrape stdout diagnostics, and wait for exit
    fn run(&self, argv: &[String], args: &[String]) -> Result<BTreeMap<String, String>> {
        let program = argv[0].clone();
        let mut child: Child = Command::new(&argv[0])
            .args(&argv[1..])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TrainError::ExternalProcess {
                program: program.clone(),
                status: "spawn failed".to_string(),
                detail: e.to_string(),
            })?;

        // Drain stderr concurrently so the child never blocks on a full pipe
        let drain = child.stderr.take().map(|stderr| {
            let program = program.clone();
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(std::io::Result::ok) {
                    debug!("{program} stderr: {line}");
                }
            })
        });

        let mut diagnostics = BTreeMap::new();
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                let line = line?;
                scrape_diagnostics(&line, &mut diagnostics);
            }
        }

        let status = child.wait()?;
        if let Some(handle) = drain {
            let _ = handle.join();
        }
        if !status.success() {
            return Err(TrainError::ExternalProcess {
                program,
                status: status.to_string(),
                detail: "non-zero exit".to_string(),
            });
        }
        for (key, value) in &diagnostics {
            info!("{program}: {key} = {value}");
        }
        Ok(diagnostics)
    }

    fn run_predict(
        &self,
        model_bytes: &[u8],
        encoded: &[SparseVector],
        with_probabilities: bool,
    ) -> Result<Vec<Prediction>> {
        let dir = tempfile::tempdir()?;
        let model_path = dir.path().join("model");
        let test_path = dir.path().join("test");
        let output_path = dir.path().join("output");
        fs::write(&model_path, model_bytes)?;
        {
            let mut writer = BufWriter::new(fs::File::create(&test_path)?);
            for vector in encoded {
                write_problem_line(&mut writer, 0, vector)?;
            }
            writer.flush()?;
        }

        let argv = self.resolver.resolve(&logical_name(self.family, "predict"));
        let mut args = Vec::new();
        if with_probabilities {
            args.push("-b".to_string());
            args.push("1".to_string());
        }
        args.push(test_path.to_string_lossy().into_owned());
        args.push(model_path.to_string_lossy().into_owned());
        args.push(output_path.to_string_lossy().into_owned());

        self.run(&argv, &args)?;
        parse_predictions(&output_path, encoded.len(), with_probabilities)
    }
}

impl Backend for ExternalBackend {
    fn train(&self, problem: &EncodedProblem, params: &Parameters) -> Result<TrainedModel> {
        if problem.is_empty() {
            return Err(TrainError::EmptyTrainingSet);
        }
        let dir = tempfile::tempdir()?;
        let train_path = dir.path().join("training");
        let model_path = dir.path().join("model");
        {
            let mut writer = BufWriter::new(fs::File::create(&train_path)?);
            for (example, &label) in problem.examples.iter().zip(problem.labels.iter()) {
                write_problem_line(&mut writer, label, example)?;
            }
            writer.flush()?;
        }

        let argv = self.resolver.resolve(&logical_name(self.family, "train"));
        let mut args = self.train_flags(params);
        args.push(train_path.to_string_lossy().into_owned());
        args.push(model_path.to_string_lossy().into_owned());

        self.run(&argv, &args)?;

        let bytes = fs::read(&model_path).map_err(|_| {
            TrainError::Backend(format!(
                "external solver `{}` exited successfully but produced no model file",
                argv[0]
            ))
        })?;
        Ok(TrainedModel::External(bytes))
    }

    fn predict(
        &self,
        model: &TrainedModel,
        encoded: &SparseVector,
        with_probabilities: bool,
    ) -> Result<Prediction> {
        let predictions =
            self.predict_batch(model, std::slice::from_ref(encoded), with_probabilities)?;
        predictions
            .into_iter()
            .next()
            .ok_or_else(|| TrainError::Backend("external predictor returned no output".into()))
    }

    fn predict_batch(
        &self,
        model: &TrainedModel,
        encoded: &[SparseVector],
        with_probabilities: bool,
    ) -> Result<Vec<Prediction>> {
        let bytes = match model {
            TrainedModel::External(bytes) => bytes,
            _ => return Err(wrong_model_kind("external")),
        };
        if encoded.is_empty() {
            return Ok(Vec::new());
        }
        self.run_predict(bytes, encoded, with_probabilities)
    }

    fn serialize(&self, model: &TrainedModel) -> Result<Vec<u8>> {
        match model {
            TrainedModel::External(bytes) => Ok(bytes.clone()),
            _ => Err(wrong_model_kind("external")),
        }
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<TrainedModel> {
        Ok(TrainedModel::External(bytes.to_vec()))
    }
}

/// One training/test line: `<label> <index1>:<value1> ...` with 1-based
/// ascending indices
fn write_problem_line<W: Write>(
    writer: &mut W,
    label: usize,
    vector: &SparseVector,
) -> Result<()> {
    write!(writer, "{label}")?;
    for (&idx, &val) in vector.indices.iter().zip(vector.values.iter()) {
        write!(writer, " {}:{}", idx + 1, val)?;
    }
    writeln!(writer)?;
    Ok(())
}

/// Scrape `key = value` tokens from a solver stdout line
fn scrape_diagnostics(line: &str, diagnostics: &mut BTreeMap<String, String>) {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] == "=" && i > 0 && i + 1 < tokens.len() {
            diagnostics.insert(tokens[i - 1].to_string(), tokens[i + 1].to_string());
            i += 2;
            continue;
        }
        if let Some((key, value)) = tokens[i].split_once('=') {
            if !key.is_empty() && !value.is_empty() {
                diagnostics.insert(key.to_string(), value.to_string());
            }
        }
        i += 1;
    }
}

/// Parse the predictor's output file: an optional `labels ...` header when
/// probabilities were requested, then one line per vector with the label
/// and, when requested, one probability column per header label
fn parse_predictions(
    path: &Path,
    expected: usize,
    with_probabilities: bool,
) -> Result<Vec<Prediction>> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut label_order: Option<Vec<usize>> = None;
    let mut predictions = Vec::with_capacity(expected);

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let first = tokens.next().ok_or_else(|| {
            TrainError::Parse("empty prediction line".to_string())
        })?;

        if first == "labels" && label_order.is_none() && predictions.is_empty() {
            let order = tokens
                .map(parse_label)
                .collect::<Result<Vec<usize>>>()?;
            label_order = Some(order);
            continue;
        }

        let label = parse_label(first)?;
        let distribution = if with_probabilities {
            let columns = tokens
                .map(|t| {
                    t.parse::<f64>()
                        .map_err(|e| TrainError::Parse(format!("invalid probability: {e}")))
                })
                .collect::<Result<Vec<f64>>>()?;
            Some(order_distribution(&columns, label_order.as_deref()))
        } else {
            None
        };
        predictions.push(Prediction {
            label,
            distribution,
        });
    }

    if predictions.len() != expected {
        return Err(TrainError::SizeMismatch {
            expected,
            actual: predictions.len(),
        });
    }
    Ok(predictions)
}

fn parse_label(token: &str) -> Result<usize> {
    let value = token
        .parse::<f64>()
        .map_err(|e| TrainError::Parse(format!("invalid predicted label `{token}`: {e}")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(TrainError::Parse(format!(
            "predicted label `{token}` is not a class index"
        )));
    }
    Ok(value as usize)
}

/// Reorder probability columns from the tool's header order to label order
fn order_distribution(columns: &[f64], label_order: Option<&[usize]>) -> Distribution {
    let num_labels = match label_order {
        Some(order) => order.iter().copied().max().map_or(0, |m| m + 1),
        None => columns.len(),
    }
    .max(columns.len());
    let mut probs = vec![0.0; num_labels];
    match label_order {
        Some(order) => {
            for (&label, &p) in order.iter().zip(columns.iter()) {
                if label < probs.len() {
                    probs[label] = p;
                }
            }
        }
        None => probs.copy_from_slice(columns),
    }
    if probs.len() == 2 {
        Distribution::Binary(probs[0])
    } else {
        Distribution::Explicit(probs)
    }
}
