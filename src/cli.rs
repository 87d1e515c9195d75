use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::backend::{device_from_config, TrainBackend};
use crate::config::{LoggingConfig, RunConfig};
use crate::error::{ExecutorError, Result};
use crate::evaluator::EvaluatorRegistry;
use crate::executor::{Executor, TrainingReport};
use crate::model::checkpoint::{timestamped_name, CheckpointStore};
use crate::model::{LocationRanker, LocationRankerConfig};
use crate::synthetic::{CheckinGenerator, SyntheticConfig};

/// Checkpoint name resolved to the newest stored checkpoint
pub const LATEST: &str = "latest";

const CHECKPOINT_KEEP: &str = "executor_config.checkpoint.keep";

#[derive(Parser, Debug)]
#[command(name = "trafficdl")]
#[command(version)]
#[command(about = "Train and evaluate trajectory and traffic-state prediction models", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train and evaluate the location ranker on synthetic check-ins
    Run {
        /// Config directory (default.toml + $TRAFFICDL_ENV) or a single config file
        #[arg(short, long, env = "TRAFFICDL_CONFIG")]
        config: Option<PathBuf>,
        /// Save the trained model under this checkpoint name (timestamped if omitted)
        #[arg(long, num_args = 0..=1)]
        save: Option<Option<String>>,
        /// Load this checkpoint before training (`latest` picks the newest)
        #[arg(long)]
        load: Option<String>,
        /// Skip training and only evaluate
        #[arg(long, default_value = "false")]
        skip_train: bool,
    },
    /// List registered evaluators
    Evaluators,
}

/// Install the global subscriber; `RUST_LOG` overrides the configured level
pub fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},burn=warn", logging.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    // A subscriber may already be installed (tests, embedding applications)
    let _ = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Load configuration from a directory, a single file, or `./config`
pub fn load_config(path: Option<&PathBuf>) -> Result<RunConfig> {
    let config = match path {
        Some(path) if path.is_file() => RunConfig::from_file(path)?,
        Some(dir) => RunConfig::load_from(dir)?,
        None => RunConfig::load()?,
    };
    Ok(config)
}

/// Options of the `run` command
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub save: Option<String>,
    pub load: Option<String>,
    pub skip_train: bool,
}

impl RunOptions {
    pub fn new(save: Option<Option<String>>, load: Option<String>, skip_train: bool) -> Self {
        Self {
            save: save.map(|name| name.unwrap_or_else(|| timestamped_name("model"))),
            load,
            skip_train,
        }
    }
}

/// Generate data, build the ranker and drive the executor through
/// load → train → save → evaluate.
pub fn run(config: RunConfig, options: &RunOptions) -> Result<Option<TrainingReport>> {
    let synthetic = SyntheticConfig::from_run_config(&config)?;
    let (train_data, test_data) = CheckinGenerator::new(synthetic.clone()).split();
    info!(
        train_batches = train_data.len(),
        test_batches = test_data.len(),
        "synthetic check-ins generated"
    );

    // The model covers the generated id space unless configured explicitly
    let mut config = config;
    if !config.contains("model_config.num_users") {
        config = config.with_override("model_config.num_users", synthetic.num_users as i64)?;
    }
    if !config.contains("model_config.num_locations") {
        config =
            config.with_override("model_config.num_locations", synthetic.num_locations as i64)?;
    }

    let store = match config.optional::<usize>(CHECKPOINT_KEEP)? {
        Some(keep) => CheckpointStore::from_config(&config)?.with_retention(keep),
        None => CheckpointStore::from_config(&config)?,
    };

    let device = device_from_config::<TrainBackend>(&config)?;
    let model: LocationRanker<TrainBackend> =
        LocationRankerConfig::from_run_config(&config)?.init(&device)?;
    let mut executor: Executor<TrainBackend, _> = Executor::new(Arc::new(config), model)?;

    if let Some(name) = &options.load {
        let name = if name == LATEST {
            store.latest()?.ok_or_else(|| ExecutorError::NoCheckpoint {
                dir: store.dir().to_path_buf(),
            })?
        } else {
            name.clone()
        };
        executor.load_model(store.path(&name))?;
        info!(checkpoint = %name, "model loaded");
    }

    let report = if options.skip_train {
        None
    } else {
        Some(executor.train(&train_data, &test_data)?)
    };

    if let Some(name) = &options.save {
        store.ensure_dir()?;
        executor.save_model(store.path(name))?;
        info!(checkpoint = %name, dir = %store.dir().display(), "model saved");
        store.prune()?;
    }

    executor.evaluate(&test_data)?;
    Ok(report)
}

/// Print the registered evaluator types
pub fn list_evaluators() {
    println!("Available evaluators:");
    for info in EvaluatorRegistry::global().available() {
        println!("  {:<24} {}", info.name, info.description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "trafficdl",
            "run",
            "--config",
            "experiments",
            "--save",
            "ranker",
            "--skip-train",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                config,
                save,
                load,
                skip_train,
            } => {
                assert_eq!(config, Some(PathBuf::from("experiments")));
                assert_eq!(save, Some(Some("ranker".to_string())));
                assert_eq!(load, None);
                assert!(skip_train);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bare_save_gets_timestamped_name() {
        let cli = Cli::try_parse_from(["trafficdl", "run", "--save"]).unwrap();
        let Commands::Run { save, load, skip_train, .. } = cli.command else {
            panic!("expected run");
        };

        let options = RunOptions::new(save, load, skip_train);
        assert!(options.save.unwrap().starts_with("model_"));
        assert!(!options.skip_train);
    }

    #[test]
    fn test_parse_evaluators() {
        let cli = Cli::try_parse_from(["trafficdl", "evaluators"]).unwrap();
        assert!(matches!(cli.command, Commands::Evaluators));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("run.toml");
        std::fs::write(&file, "evaluator = \"GeoSANEvaluator\"\n").unwrap();

        let config = load_config(Some(&file)).unwrap();
        assert_eq!(config.evaluator_type().unwrap(), "GeoSANEvaluator");
    }
}
