use std::time::Duration;

use serde::Serialize;

/// Statistics for one pass over the training data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochSummary {
    /// 1-based epoch index
    pub epoch: usize,
    pub batches: usize,
    pub elapsed: Duration,
    pub avg_loss: f64,
}

/// Per-epoch summaries of one `train` call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochSummary>,
}

impl TrainingReport {
    /// Average loss of the last epoch
    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|epoch| epoch.avg_loss)
    }

    pub fn total_batches(&self) -> usize {
        self.epochs.iter().map(|epoch| epoch.batches).sum()
    }

    pub fn total_elapsed(&self) -> Duration {
        self.epochs.iter().map(|epoch| epoch.elapsed).sum()
    }
}
