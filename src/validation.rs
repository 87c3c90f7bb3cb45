//! k-fold cross-validation
//!
//! Data is split round-robin into disjoint partitions, each capped at a
//! caller-supplied size. One task per held-out fold runs on the shared pool;
//! above the context's sequential threshold the folds run one after another
//! so large working sets are never resident more than once at a time.

use crate::classifier::Classifier;
use crate::context::ExecContext;
use crate::core::{ConfusionMatrix, LabelledVector, Result, TrainError, Vector};
use crate::params::Parameters;
use log::debug;
use rayon::prelude::*;

/// Split round-robin into `num_partitions` disjoint partitions of at most
/// `max_per_partition` vectors each. Vectors beyond the combined cap are
/// dropped.
pub fn partition(
    data: &[LabelledVector],
    num_partitions: usize,
    max_per_partition: usize,
) -> Vec<Vec<LabelledVector>> {
    let mut partitions: Vec<Vec<LabelledVector>> = vec![Vec::new(); num_partitions];
    for (i, example) in data.iter().enumerate() {
        let target = &mut partitions[i % num_partitions];
        if target.len() < max_per_partition {
            target.push(example.clone());
        }
    }
    partitions
}

/// Cross-validate `params` over `data` with `num_folds` folds and return the
/// summed confusion matrix.
pub fn cross_validate(
    ctx: &ExecContext,
    params: &Parameters,
    data: &[LabelledVector],
    num_folds: usize,
    max_per_fold: usize,
) -> Result<ConfusionMatrix> {
    params.validate()?;
    if data.is_empty() {
        return Err(TrainError::EmptyTrainingSet);
    }
    if num_folds < 2 {
        return Err(TrainError::TooFewFolds(num_folds));
    }
    let partitions = partition(data, num_folds, max_per_fold);
    cross_validate_partitions(ctx, params, &partitions)
}

/// Cross-validate over pre-built partitions. Grid search reuses one
/// partitioning across every candidate, so the split is a separate step.
pub fn cross_validate_partitions(
    ctx: &ExecContext,
    params: &Parameters,
    partitions: &[Vec<LabelledVector>],
) -> Result<ConfusionMatrix> {
    let total: usize = partitions.iter().map(Vec::len).sum();
    if total == 0 {
        return Err(TrainError::EmptyTrainingSet);
    }

    let run_fold = |held_out: usize| -> Result<ConfusionMatrix> {
        let training: Vec<LabelledVector> = partitions
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != held_out)
            .flat_map(|(_, p)| p.iter().cloned())
            .collect();
        let classifier = Classifier::train(ctx, params, &training)?;
        let fold = &partitions[held_out];
        let inputs: Vec<Vector> = fold.iter().map(|lv| lv.vector().clone()).collect();
        let predicted = classifier.predict_batch(&inputs, false)?;
        evaluate(fold, &predicted, params.num_labels())
    };

    let matrices: Vec<ConfusionMatrix> = if total > ctx.sequential_threshold() {
        debug!(
            "cross-validating {} vectors sequentially ({} folds)",
            total,
            partitions.len()
        );
        (0..partitions.len())
            .map(run_fold)
            .collect::<Result<Vec<_>>>()?
    } else {
        ctx.pool().install(|| {
            (0..partitions.len())
                .into_par_iter()
                .map(run_fold)
                .collect::<Result<Vec<_>>>()
        })?
    };

    let mut summed = ConfusionMatrix::new(params.num_labels());
    for matrix in &matrices {
        summed.add(matrix)?;
    }
    Ok(summed)
}

/// Pair gold and predicted labels positionally into a confusion matrix
pub fn evaluate(
    gold: &[LabelledVector],
    predicted: &[LabelledVector],
    num_labels: usize,
) -> Result<ConfusionMatrix> {
    if gold.len() != predicted.len() {
        return Err(TrainError::SizeMismatch {
            expected: gold.len(),
            actual: predicted.len(),
        });
    }
    let mut matrix = ConfusionMatrix::new(num_labels);
    for (g, p) in gold.iter().zip(predicted.iter()) {
        for label in [g.label(), p.label()] {
            if label >= num_labels {
                return Err(TrainError::IndexOutOfRange {
                    index: label,
                    len: num_labels,
                });
            }
        }
        matrix.record(g.label(), p.label());
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BackendPreference;
    use crate::params::Algorithm;

    fn ctx() -> ExecContext {
        ExecContext::with_threads(2)
            .unwrap()
            .with_preference(BackendPreference::InProcess)
    }

    fn labelled(name: &str, value: f64, label: usize) -> LabelledVector {
        LabelledVector::new(Vector::from_pairs(vec![(name, value)]), label)
    }

    fn alternating_set(n: usize) -> Vec<LabelledVector> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    labelled("x", 1.0 + 0.01 * i as f64, 0)
                } else {
                    labelled("x", -1.0 - 0.01 * i as f64, 1)
                }
            })
            .collect()
    }

    #[test]
    fn test_partition_round_robin() {
        let data = alternating_set(7);
        let partitions = partition(&data, 3, 10);
        assert_eq!(partitions[0].len(), 3);
        assert_eq!(partitions[1].len(), 2);
        assert_eq!(partitions[2].len(), 2);
        assert_eq!(partitions[0][1].vector(), data[3].vector());
    }

    #[test]
    fn test_partition_respects_cap() {
        let data = alternating_set(10);
        let partitions = partition(&data, 2, 3);
        assert!(partitions.iter().all(|p| p.len() == 3));
    }

    #[test]
    fn test_too_few_folds() {
        let data = alternating_set(4);
        assert!(matches!(
            cross_validate(
                &ctx(),
                &Parameters::new(Algorithm::LogisticL2, 2),
                &data,
                1,
                100
            ),
            Err(TrainError::TooFewFolds(1))
        ));
    }

    #[test]
    fn test_empty_data() {
        assert!(matches!(
            cross_validate(
                &ctx(),
                &Parameters::new(Algorithm::LogisticL2, 2),
                &[],
                2,
                100
            ),
            Err(TrainError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn test_ten_examples_five_folds_counts_everything() {
        let ctx = ctx();
        let data = alternating_set(10);
        let params = Parameters::new(Algorithm::LogisticL2, 2).with_c(10.0);
        let matrix = cross_validate(&ctx, &params, &data, 5, 100).unwrap();
        assert_eq!(matrix.total(), 10);
        assert_eq!(matrix.accuracy(), 1.0);
    }

    #[test]
    fn test_fold_count_invariance() {
        let ctx = ctx();
        let data = alternating_set(12);
        let params = Parameters::new(Algorithm::LogisticL2, 2).with_c(10.0);
        for folds in [2, 3, 4, 6] {
            let matrix = cross_validate(&ctx, &params, &data, folds, 100).unwrap();
            assert_eq!(matrix.total(), 12, "folds = {folds}");
        }
    }

    #[test]
    fn test_evaluate_size_mismatch() {
        let gold = alternating_set(3);
        let predicted = alternating_set(2);
        assert!(matches!(
            evaluate(&gold, &predicted, 2),
            Err(TrainError::SizeMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_evaluate_counts_by_position() {
        let gold = vec![labelled("x", 1.0, 0), labelled("x", 1.0, 1)];
        let predicted = vec![labelled("x", 1.0, 1), labelled("x", 1.0, 1)];
        let matrix = evaluate(&gold, &predicted, 2).unwrap();
        assert_eq!(matrix.count(0, 1), 1);
        assert_eq!(matrix.count(1, 1), 1);
        assert_eq!(matrix.count(0, 0), 0);
    }
}
