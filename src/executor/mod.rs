//! Training and evaluation executor.
//!
//! The executor owns the model (placed on the configured device once, at
//! construction), the evaluator and the evaluation output directory. It runs
//! epochs of Adam updates in `train`, one deterministic inference pass in
//! `evaluate`, and forwards checkpoint I/O to the model.

mod summary;


use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use tracing::{debug, info, warn};

use crate::backend::{device_from_config, ResolveDevice};
use crate::config::RunConfig;
use crate::error::{ExecutorError, Result};
use crate::evaluator::{Evaluator, EvaluatorRegistry};
use crate::grad::{is_grad_enabled, no_grad};
use crate::model::TrafficModel;
use crate::seed::{seed_all, SeededRngs, EVAL_SEED};

pub use summary::{EpochSummary, TrainingReport};

/// First and second moment decay rates used for every run
pub const ADAM_BETAS: (f32, f32) = (0.9, 0.98);

pub struct Executor<B, M>
where
    B: AutodiffBackend + ResolveDevice,
    M: TrafficModel<B>,
{
    config: Arc<RunConfig>,
    device: B::Device,
    model: M,
    evaluator: Box<dyn Evaluator>,
    evaluate_res_dir: PathBuf,
}

impl<B, M> Executor<B, M>
where
    B: AutodiffBackend + ResolveDevice,
    M: TrafficModel<B>,
{
    /// Build an executor whose evaluator comes from the global registry
    pub fn new(config: Arc<RunConfig>, model: M) -> Result<Self> {
        Self::with_registry(config, model, EvaluatorRegistry::global())
    }

    pub fn with_registry(
        config: Arc<RunConfig>,
        model: M,
        registry: &EvaluatorRegistry,
    ) -> Result<Self> {
        let evaluator = registry.build(&config)?;
        Self::with_evaluator(config, model, evaluator)
    }

    /// Build an executor around an already constructed evaluator
    pub fn with_evaluator(
        config: Arc<RunConfig>,
        model: M,
        evaluator: Box<dyn Evaluator>,
    ) -> Result<Self> {
        let device = device_from_config::<B>(&config)?;
        let evaluate_res_dir = config.evaluate_res_dir()?;
        let model = model.fork(&device);

        debug!(device = ?device, dir = %evaluate_res_dir.display(), "executor ready");

        Ok(Self {
            config,
            device,
            model,
            evaluator,
            evaluate_res_dir,
        })
    }

    /// Run `executor_config.train.num_epochs` passes over `train_data`,
    /// stepping the optimizer after every batch.
    ///
    /// `_eval_data` is accepted for call-site symmetry and not consumed;
    /// validation is a separate [`Executor::evaluate`] call.
    pub fn train<L, E>(&mut self, train_data: &L, _eval_data: &E) -> Result<TrainingReport>
    where
        L: ?Sized,
        E: ?Sized,
        for<'a> &'a L: IntoIterator<Item = &'a M::Batch>,
    {
        if !is_grad_enabled() {
            return Err(ExecutorError::GradientsDisabled);
        }

        let num_epochs = self.config.num_epochs()?.get();
        let learning_rate = self.config.learning_rate()?;
        let (beta_1, beta_2) = ADAM_BETAS;
        let mut optimizer = AdamConfig::new()
            .with_beta_1(beta_1)
            .with_beta_2(beta_2)
            .init::<B, M>();

        let mut rngs = match self.config.train_seed()? {
            Some(seed) => seed_all::<B>(seed),
            None => SeededRngs::from_entropy(),
        };

        info!(num_epochs, learning_rate, "start training");

        let mut report = TrainingReport::default();
        for epoch in 1..=num_epochs {
            let start = Instant::now();
            let mut total_loss = 0.0f64;
            let mut batches = 0usize;

            for batch in train_data {
                let loss = self.model.calculate_loss(batch, &mut rngs)?;
                let loss_value = loss.clone().into_scalar().elem::<f64>();
                if !loss_value.is_finite() {
                    warn!(epoch, batch = batches + 1, loss = loss_value, "non-finite loss");
                }

                let grads = GradientsParams::from_grads(loss.backward(), &self.model);
                self.model = optimizer.step(learning_rate, self.model.clone(), grads);

                total_loss += loss_value;
                batches += 1;
                debug!(epoch, batch = batches, loss = loss_value, "batch done");
            }

            if batches == 0 {
                return Err(ExecutorError::NoBatches { epoch });
            }

            let summary = EpochSummary {
                epoch,
                batches,
                elapsed: start.elapsed(),
                avg_loss: total_loss / batches as f64,
            };
            info!(
                "epoch {}/{} complete, time_elapsed={:.2}s, avg_loss={:.6}",
                summary.epoch,
                num_epochs,
                summary.elapsed.as_secs_f64(),
                summary.avg_loss
            );
            report.epochs.push(summary);
        }

        info!(
            batches = report.total_batches(),
            final_loss = report.final_loss(),
            "training completed"
        );
        Ok(report)
    }

    /// One deterministic inference pass over `test_data`, with results saved
    /// to the evaluation directory.
    ///
    /// The evaluator is cleared first and the random sources are reseeded with
    /// [`EVAL_SEED`] before the first batch. Any failure aborts the pass
    /// without saving.
    pub fn evaluate<L>(&mut self, test_data: &L) -> Result<()>
    where
        L: ?Sized,
        for<'a> &'a L: IntoIterator<Item = &'a M::Batch>,
    {
        self.evaluator.clear();
        let model = self.model.valid();
        let mut rngs = seed_all::<B>(EVAL_SEED);

        let batches = {
            let _guard = no_grad();
            let mut batches = 0usize;
            for batch in test_data {
                let output = M::predict(&model, batch, &mut rngs)?;
                self.evaluator.collect(&output)?;
                batches += 1;
            }
            batches
        };

        debug!(batches, "evaluation pass done");
        self.evaluator.save_result(&self.evaluate_res_dir)
    }

    /// Ask the model to persist itself under `name`
    pub fn save_model(&self, name: impl AsRef<Path>) -> Result<()> {
        self.model.save(name.as_ref())
    }

    /// Ask the model to restore itself from `name`; on failure the current
    /// parameters are kept.
    pub fn load_model(&mut self, name: impl AsRef<Path>) -> Result<()> {
        self.model = self.model.clone().load(name.as_ref(), &self.device)?;
        Ok(())
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &dyn Evaluator {
        self.evaluator.as_ref()
    }

    pub fn evaluate_res_dir(&self) -> &Path {
        &self.evaluate_res_dir
    }
}
