//! Grid-search orchestrator
//!
//! Candidates are drawn from a shared counter by a small set of top-level
//! workers, each evaluating one parameter set at a time through the
//! cross-validator over a single shared partitioning. Half the cores act as
//! workers; the fold-level parallelism underneath shares the same pool, so
//! the two levels together never exceed the pool budget.

use crate::classifier::Classifier;
use crate::context::ExecContext;
use crate::core::{ConfusionMatrix, LabelledVector, Result, TrainError};
use crate::params::Parameters;
use crate::validation::{self, cross_validate_partitions};
use log::{debug, info};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard};

/// Partitions shared by every candidate evaluation
const NUM_PARTITIONS: usize = 5;

/// Prefer the candidate with the higher overall accuracy
pub fn by_accuracy(a: &ConfusionMatrix, b: &ConfusionMatrix) -> Ordering {
    a.accuracy().total_cmp(&b.accuracy())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Evaluate every candidate in `grid` by cross-validation, pick the best
/// under `comparator`, and retrain it on the full data set. Ties go to the
/// earlier grid index, so the selection is deterministic. The first failed
/// evaluation aborts the whole search.
pub fn train_best<F>(
    ctx: &ExecContext,
    grid: &[Parameters],
    data: &[LabelledVector],
    comparator: F,
    max_per_partition: usize,
) -> Result<(Classifier, ConfusionMatrix)>
where
    F: Fn(&ConfusionMatrix, &ConfusionMatrix) -> Ordering,
{
    if grid.is_empty() {
        return Err(TrainError::InvalidParameter(
            "parameter grid is empty".to_string(),
        ));
    }
    if data.is_empty() {
        return Err(TrainError::EmptyTrainingSet);
    }

    let partitions = validation::partition(data, NUM_PARTITIONS, max_per_partition);
    let num_workers = (ctx.cores() / 2).max(1).min(grid.len());
    info!(
        "grid search over {} candidates with {} workers",
        grid.len(),
        num_workers
    );

    let next = AtomicUsize::new(0);
    let results: Mutex<Vec<(ConfusionMatrix, usize)>> = Mutex::new(Vec::with_capacity(grid.len()));
    let failure: Mutex<Option<TrainError>> = Mutex::new(None);

    ctx.pool().scope(|scope| {
        for _ in 0..num_workers {
            scope.spawn(|_| loop {
                let index = next.fetch_add(1, AtomicOrdering::SeqCst);
                if index >= grid.len() || lock(&failure).is_some() {
                    break;
                }
                match cross_validate_partitions(ctx, &grid[index], &partitions) {
                    Ok(matrix) => {
                        debug!(
                            "candidate {index}: accuracy {:.4} over {} vectors",
                            matrix.accuracy(),
                            matrix.total()
                        );
                        lock(&results).push((matrix, index));
                    }
                    Err(e) => {
                        *lock(&failure) = Some(e);
                        break;
                    }
                }
            });
        }
    });

    if let Some(error) = lock(&failure).take() {
        return Err(error);
    }

    let results = std::mem::take(&mut *lock(&results));
    let mut best: Option<(ConfusionMatrix, usize)> = None;
    for (matrix, index) in results {
        best = match best {
            None => Some((matrix, index)),
            Some((best_matrix, best_index)) => match comparator(&matrix, &best_matrix) {
                Ordering::Greater => Some((matrix, index)),
                Ordering::Equal if index < best_index => Some((matrix, index)),
                _ => Some((best_matrix, best_index)),
            },
        };
    }
    let (matrix, index) = best.ok_or_else(|| {
        TrainError::Concurrency("grid search produced no results".to_string())
    })?;

    info!(
        "selected candidate {index} (accuracy {:.4}), retraining on {} vectors",
        matrix.accuracy(),
        data.len()
    );
    let classifier = Classifier::train(ctx, &grid[index], data)?;
    Ok((classifier, matrix))
}
