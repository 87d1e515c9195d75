//! Evaluators: accumulate per-batch predictions and persist aggregate metrics.
//!
//! One evaluation run is a single `clear → collect* → save_result` cycle.
//! Concrete evaluators are resolved by name through [`EvaluatorRegistry`].

pub mod geosan;
pub mod traffic_state;
pub mod traj_loc_pred;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::info;

use crate::config::RunConfig;
use crate::error::{ExecutorError, Result};
use crate::model::ModelOutput;

pub use geosan::GeoSanEvaluator;
pub use traffic_state::TrafficStateEvaluator;
pub use traj_loc_pred::TrajLocPredEvaluator;

/// Metric name to value, ordered by name
pub type MetricReport = BTreeMap<String, f64>;

#[cfg_attr(test, mockall::automock)]
pub trait Evaluator: Send {
    /// Drop everything collected so far
    fn clear(&mut self);

    /// Accumulate the prediction output of one batch
    fn collect(&mut self, output: &ModelOutput) -> Result<()>;

    /// Aggregate metrics over everything collected
    fn evaluate(&self) -> Result<MetricReport>;

    /// Aggregate and write the result into `dir`, creating it if needed
    fn save_result(&mut self, dir: &Path) -> Result<()>;
}

/// Constructor registered under an evaluator type name
pub type EvaluatorFactory = fn(&RunConfig) -> Result<Box<dyn Evaluator>>;

/// Information about a registered evaluator type
#[derive(Debug, Clone)]
pub struct EvaluatorInfo {
    pub name: String,
    pub description: String,
}

#[derive(Clone)]
struct Registration {
    factory: EvaluatorFactory,
    description: String,
}

/// Factory for creating evaluators from configuration
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    entries: BTreeMap<String, Registration>,
}

impl EvaluatorRegistry {
    /// Registry without any evaluator
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in evaluators
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(
            geosan::NAME,
            "Hit rate and NDCG of the ground truth among sampled candidates",
            |config| Ok(Box::new(GeoSanEvaluator::from_config(config)?)),
        );
        registry.register(
            traj_loc_pred::NAME,
            "Top-k next-location metrics over full location scores",
            |config| Ok(Box::new(TrajLocPredEvaluator::from_config(config)?)),
        );
        registry.register(
            traffic_state::NAME,
            "Per-horizon error metrics for traffic state forecasts",
            |config| Ok(Box::new(TrafficStateEvaluator::from_config(config)?)),
        );
        registry
    }

    /// Process-wide registry of built-ins, populated on first use
    pub fn global() -> &'static EvaluatorRegistry {
        static GLOBAL: OnceLock<EvaluatorRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::with_builtins)
    }

    /// Register `factory` under `name`, replacing any earlier registration
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        factory: EvaluatorFactory,
    ) {
        self.entries.insert(
            name.into(),
            Registration {
                factory,
                description: description.into(),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn available(&self) -> Vec<EvaluatorInfo> {
        self.entries
            .iter()
            .map(|(name, entry)| EvaluatorInfo {
                name: name.clone(),
                description: entry.description.clone(),
            })
            .collect()
    }

    /// Construct the evaluator registered under `name`
    pub fn create(&self, name: &str, config: &RunConfig) -> Result<Box<dyn Evaluator>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ExecutorError::UnknownEvaluator(name.to_string()))?;
        (entry.factory)(config)
    }

    /// Construct the evaluator named by the `evaluator` key
    pub fn build(&self, config: &RunConfig) -> Result<Box<dyn Evaluator>> {
        self.create(&config.evaluator_type()?, config)
    }
}

impl std::fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("evaluators", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Evaluator for `config` from the global registry
pub fn get_evaluator(config: &RunConfig) -> Result<Box<dyn Evaluator>> {
    EvaluatorRegistry::global().build(config)
}

/// Write `report` as pretty JSON to `<dir>/<timestamp>_<tag>.json`
pub fn write_report(dir: &Path, tag: &str, report: &MetricReport) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let timestamp = chrono::Local::now().format("%Y_%m_%d_%H_%M_%S");
    let path = dir.join(format!("{timestamp}_{tag}.json"));
    fs::write(&path, serde_json::to_string_pretty(report)?)?;

    info!(path = %path.display(), metrics = report.len(), "evaluation result saved");
    Ok(path)
}
