//! End-to-end tests over the public API
//!
//! Everything here runs against the in-process backends so the suite does
//! not depend on liblinear/libsvm being installed.

use gridtrain::{
    by_accuracy, cross_validate, train_best, Algorithm, BackendPreference, Classifier,
    Distribution, ExecContext, LabelledVector, Parameters, TrainError, TrainingFile, Vector,
};
use std::io::Write;
use tempfile::NamedTempFile;

fn ctx() -> ExecContext {
    ExecContext::with_threads(2)
        .unwrap()
        .with_preference(BackendPreference::InProcess)
}

/// Two clearly separated classes over two named features
fn binary_training_set() -> Vec<LabelledVector> {
    vec![
        LabelledVector::new(Vector::from_pairs(vec![("height", 2.0), ("width", 1.0)]), 0),
        LabelledVector::new(Vector::from_pairs(vec![("height", 1.8), ("width", 0.9)]), 0),
        LabelledVector::new(Vector::from_pairs(vec![("height", 1.5), ("width", 0.8)]), 0),
        LabelledVector::new(Vector::from_pairs(vec![("height", -2.0), ("width", -1.0)]), 1),
        LabelledVector::new(Vector::from_pairs(vec![("height", -1.8), ("width", -0.9)]), 1),
        LabelledVector::new(Vector::from_pairs(vec![("height", -1.5), ("width", -0.8)]), 1),
    ]
}

#[test]
fn test_binary_round_trip_through_directory() {
    let ctx = ctx();
    let params = Parameters::new(Algorithm::LogisticL2, 2).with_c(10.0);
    let classifier = Classifier::train(&ctx, &params, &binary_training_set()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("model");
    classifier.write_to(&root).unwrap();
    let restored = Classifier::read_from(&ctx, &root).unwrap();

    assert_eq!(classifier, restored);
    assert_eq!(classifier.content_hash(), restored.content_hash());

    let probe = Vector::from_pairs(vec![("height", 1.7), ("width", 0.85)]);
    assert_eq!(
        classifier.predict(&probe, true).unwrap().label(),
        restored.predict(&probe, true).unwrap().label()
    );
}

#[test]
fn test_binary_round_trip_through_archive() {
    let ctx = ctx();
    let params = Parameters::new(Algorithm::KernelRbf, 2)
        .with_c(10.0)
        .with_gamma(0.5);
    let classifier = Classifier::train(&ctx, &params, &binary_training_set()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("model.zip");
    classifier.write_to(&root).unwrap();
    assert!(root.is_file());

    let restored = Classifier::read_from(&ctx, &root).unwrap();
    assert_eq!(classifier, restored);

    for example in binary_training_set() {
        let predicted = restored.predict(example.vector(), false).unwrap();
        assert_eq!(predicted.label(), example.label());
    }
}

#[test]
fn test_probability_distribution_on_round_trip() {
    let ctx = ctx();
    let params = Parameters::new(Algorithm::LogisticL2, 2).with_c(10.0);
    let classifier = Classifier::train(&ctx, &params, &binary_training_set()).unwrap();

    let probe = Vector::from_pairs(vec![("height", 2.0), ("width", 1.0)]);
    let predicted = classifier.predict(&probe, true).unwrap();
    assert_eq!(predicted.label(), 0);
    match predicted.distribution() {
        Distribution::Binary(p0) => assert!(*p0 > 0.5),
        other => panic!("expected binary distribution, got {other:?}"),
    }
    assert!(predicted.probability_of(0) + predicted.probability_of(1) > 0.99);
}

#[test]
fn test_unseen_feature_neither_fails_nor_grows() {
    let ctx = ctx();
    let params = Parameters::new(Algorithm::HingeL2, 2).with_c(10.0);
    let classifier = Classifier::train(&ctx, &params, &binary_training_set()).unwrap();
    let features_before = classifier.dictionary().len();

    let probe = Vector::from_pairs(vec![("depth", 3.0), ("height", 2.0)]);
    let predicted = classifier.predict(&probe, false).unwrap();
    assert_eq!(predicted.label(), 0);
    assert_eq!(classifier.dictionary().len(), features_before);

    // A vector with no known features still yields some label
    let unknown_only = Vector::from_pairs(vec![("depth", 3.0)]);
    assert!(classifier.predict(&unknown_only, false).is_ok());
}

#[test]
fn test_cross_validation_counts_ten_examples_in_five_folds() {
    let ctx = ctx();
    let data: Vec<LabelledVector> = (0..10)
        .map(|i| {
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            LabelledVector::new(
                Vector::from_pairs(vec![("x", sign * (1.0 + 0.05 * i as f64))]),
                usize::from(i % 2 == 1),
            )
        })
        .collect();
    let params = Parameters::new(Algorithm::LogisticL2, 2).with_c(10.0);
    let matrix = cross_validate(&ctx, &params, &data, 5, 100).unwrap();
    assert_eq!(matrix.total(), 10);
}

#[test]
fn test_fold_count_does_not_change_totals() {
    let ctx = ctx();
    let data = binary_training_set();
    let params = Parameters::new(Algorithm::LogisticL2, 2).with_c(10.0);
    for folds in [2, 3, 6] {
        let matrix = cross_validate(&ctx, &params, &data, folds, 100).unwrap();
        assert_eq!(matrix.total(), 6, "folds = {folds}");
    }
}

#[test]
fn test_grid_contains_seed_first_and_respects_cap() {
    let seed = Parameters::new(Algorithm::KernelRbf, 2)
        .with_c(1.0)
        .with_gamma(0.5);
    let grid = seed.grid(7, 10.0);
    assert!(grid.len() <= 7);
    assert_eq!(grid[0], seed);
    assert!(grid.iter().all(|p| p.algorithm() == Algorithm::KernelRbf));
}

#[test]
fn test_grid_search_end_to_end() {
    let ctx = ctx();
    let seed = Parameters::new(Algorithm::LogisticL2, 2).with_c(1.0);
    let grid = seed.grid(5, 10.0);
    let data = binary_training_set();

    let (classifier, matrix) = train_best(&ctx, &grid, &data, by_accuracy, 100).unwrap();
    assert_eq!(matrix.total(), 6);
    for example in &data {
        assert_eq!(
            classifier.predict(example.vector(), false).unwrap().label(),
            example.label()
        );
    }
}

#[test]
fn test_training_file_to_model_pipeline() {
    let ctx = ctx();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "# fruit training data").unwrap();
    writeln!(file, "0 weight:0.2 smooth:1").unwrap();
    writeln!(file, "0 weight:0.25 smooth:1").unwrap();
    writeln!(file, "1 weight:1.4 smooth:0").unwrap();
    writeln!(file, "1 weight:1.5 smooth:0").unwrap();
    file.flush().unwrap();

    let training = TrainingFile::from_file(file.path()).unwrap();
    assert_eq!(training.num_labels(), 2);

    let params = Parameters::new(Algorithm::LogisticL2, training.num_labels()).with_c(10.0);
    let classifier = Classifier::train(&ctx, &params, training.examples()).unwrap();
    let predicted = classifier
        .predict(&Vector::from_pairs(vec![("weight", 1.45), ("smooth", 0.0)]), false)
        .unwrap();
    assert_eq!(predicted.label(), 1);
}

#[test]
fn test_reading_missing_entry_is_reported() {
    let ctx = ctx();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("model");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("parameters"), "algorithm = logistic-l2\nnumLabels = 2\nc = 1\n")
        .unwrap();

    assert!(matches!(
        Classifier::read_from(&ctx, &root),
        Err(TrainError::MissingEntry(_))
    ));
}

#[test]
fn test_separately_trained_models_compare_equal() {
    let ctx = ctx();
    let params = Parameters::new(Algorithm::LogisticL1, 2).with_c(5.0);
    let a = Classifier::train(&ctx, &params, &binary_training_set()).unwrap();
    let b = Classifier::train(&ctx, &params, &binary_training_set()).unwrap();
    assert_eq!(a, b);

    let different = Parameters::new(Algorithm::LogisticL1, 2).with_c(50.0);
    let c = Classifier::train(&ctx, &different, &binary_training_set()).unwrap();
    assert_ne!(a, c);
}
