use std::fs;

use trafficdl::cli::{self, RunOptions};
use trafficdl::model::checkpoint::CheckpointStore;
use trafficdl::{ExecutorError, RunConfig};

fn config(cache: &std::path::Path) -> RunConfig {
    RunConfig::from_toml_str(&format!(
        r#"
        evaluator = "GeoSANEvaluator"
        model = "LocationRanker"
        dataset = "synthetic"
        cache_dir = "{}"

        [executor_config.train]
        num_epochs = 2
        seed = 3

        [executor_config.optimizer]
        learning_rate = 0.01

        [executor_config.checkpoint]
        keep = 1

        [model_config]
        embedding_dim = 8
        eval_negatives = 20

        [dataset_config]
        num_users = 4
        num_locations = 40
        batch_size = 8
        train_batches = 3
        test_batches = 2
        "#,
        cache.display()
    ))
    .unwrap()
}

#[test]
fn run_trains_saves_and_evaluates() {
    let cache = tempfile::tempdir().unwrap();
    let options = RunOptions {
        save: Some("ranker_a".to_string()),
        ..RunOptions::default()
    };

    let report = cli::run(config(cache.path()), &options).unwrap().unwrap();
    assert_eq!(report.epochs.len(), 2);
    assert_eq!(report.total_batches(), 6);

    let store = CheckpointStore::new(cache.path().join("model_cache"));
    assert!(store.exists("ranker_a"));

    let results: Vec<_> = fs::read_dir(cache.path().join("evaluate_cache"))
        .unwrap()
        .collect();
    assert_eq!(results.len(), 1);
}

#[test]
fn run_can_resume_from_latest_checkpoint() {
    let cache = tempfile::tempdir().unwrap();
    let first = RunOptions {
        save: Some("ranker_a".to_string()),
        ..RunOptions::default()
    };
    cli::run(config(cache.path()), &first).unwrap();

    let resume = RunOptions {
        save: Some("ranker_b".to_string()),
        load: Some(cli::LATEST.to_string()),
        skip_train: true,
    };
    let report = cli::run(config(cache.path()), &resume).unwrap();
    assert!(report.is_none());

    // retention keeps only the newest checkpoint
    let store = CheckpointStore::new(cache.path().join("model_cache"));
    assert_eq!(store.list().unwrap(), vec!["ranker_b".to_string()]);
}

#[test]
fn loading_a_missing_checkpoint_fails() {
    let cache = tempfile::tempdir().unwrap();
    let options = RunOptions {
        load: Some("never_saved".to_string()),
        ..RunOptions::default()
    };

    assert!(cli::run(config(cache.path()), &options).is_err());
}

#[test]
fn loading_latest_from_an_empty_store_names_the_directory() {
    let cache = tempfile::tempdir().unwrap();
    let options = RunOptions {
        load: Some(cli::LATEST.to_string()),
        ..RunOptions::default()
    };

    let err = cli::run(config(cache.path()), &options).unwrap_err();
    match &err {
        ExecutorError::NoCheckpoint { dir } => assert_eq!(dir, &cache.path().join("model_cache")),
        other => panic!("unexpected error {other}"),
    }
    assert!(err.to_string().starts_with("No checkpoint in"));
}
