pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod grad;
pub mod model;
pub mod seed;
pub mod synthetic;

pub use backend::{device_from_config, ResolveDevice, TrainBackend};
pub use config::{LoggingConfig, RunConfig};
pub use error::{ExecutorError, Result};
pub use evaluator::{get_evaluator, Evaluator, EvaluatorRegistry, MetricReport};
pub use executor::{EpochSummary, Executor, TrainingReport};
pub use grad::{is_grad_enabled, no_grad, NoGradGuard};
pub use model::{CheckinBatch, LocationRanker, LocationRankerConfig, ModelOutput, TrafficModel};
pub use seed::{seed_all, SeededRngs, EVAL_SEED};
