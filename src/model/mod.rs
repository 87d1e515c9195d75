//! Model contract consumed by the executor.
//!
//! A model is a burn [`AutodiffModule`]: training runs on the autodiff
//! backend, while evaluation runs on [`AutodiffModule::valid`], the inner
//! module without gradient tracking or training-only behaviour.

pub mod checkpoint;
pub mod location_ranker;

use std::path::Path;

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use ndarray::Array2;

use crate::error::Result;
use crate::seed::SeededRngs;

pub use location_ranker::{CheckinBatch, LocationRanker, LocationRankerConfig};

/// Prediction output handed to an evaluator, one value per batch
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// Candidate scores `[batch, 1 + negatives]`; column 0 holds the ground truth
    Ranking(Array2<f32>),
    /// Next-location scores `[batch, num_locations]` with the true location ids
    NextLocation {
        loc_true: Vec<usize>,
        loc_pred: Array2<f32>,
    },
    /// Traffic readings `[samples, horizon]`
    TrafficState {
        y_true: Array2<f32>,
        y_pred: Array2<f32>,
    },
}

impl ModelOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            ModelOutput::Ranking(_) => "ranking",
            ModelOutput::NextLocation { .. } => "next_location",
            ModelOutput::TrafficState { .. } => "traffic_state",
        }
    }

    /// Number of rows (samples) in the output
    pub fn len(&self) -> usize {
        match self {
            ModelOutput::Ranking(scores) => scores.nrows(),
            ModelOutput::NextLocation { loc_true, .. } => loc_true.len(),
            ModelOutput::TrafficState { y_true, .. } => y_true.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A trainable prediction model.
///
/// `calculate_loss` is called on the autodiff module; `predict` receives the
/// inner module so evaluation never records a graph. Both get the random
/// sources explicitly, so stochastic steps such as negative sampling are
/// reproducible once the sources are seeded.
pub trait TrafficModel<B: AutodiffBackend>: AutodiffModule<B> {
    type Batch;

    /// Scalar training loss for one batch
    fn calculate_loss(&self, batch: &Self::Batch, rngs: &mut SeededRngs) -> Result<Tensor<B, 1>>;

    /// Evaluation-mode prediction for one batch
    fn predict(
        model: &Self::InnerModule,
        batch: &Self::Batch,
        rngs: &mut SeededRngs,
    ) -> Result<ModelOutput>;

    /// Persist the parameters under `path`
    fn save(&self, path: &Path) -> Result<()> {
        checkpoint::save_module::<B, Self>(self, path)
    }

    /// Restore parameters from `path`, consuming the current module
    fn load(self, path: &Path, device: &B::Device) -> Result<Self> {
        checkpoint::load_module::<B, Self>(self, path, device)
    }
}
