//! Synthetic check-in data for demos and tests.
//!
//! Every user owns a small set of favourite locations. Check-ins mostly move
//! between favourites and occasionally jump to a random location, so a model
//! that learns user preferences ranks the next visit well above chance.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::config::RunConfig;
use crate::error::{ExecutorError, Result};
use crate::model::CheckinBatch;

#[derive(Debug, Clone, Deserialize)]
pub struct SyntheticConfig {
    #[serde(default = "default_num_users")]
    pub num_users: usize,
    #[serde(default = "default_num_locations")]
    pub num_locations: usize,
    /// Favourite locations per user
    #[serde(default = "default_favourites")]
    pub favourites: usize,
    /// Probability of visiting a non-favourite location
    #[serde(default = "default_exploration")]
    pub exploration: f64,
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_train_batches")]
    pub train_batches: usize,
    #[serde(default = "default_test_batches")]
    pub test_batches: usize,
    #[serde(default)]
    pub seed: u64,
}

fn default_num_users() -> usize {
    16
}

fn default_num_locations() -> usize {
    200
}

fn default_favourites() -> usize {
    4
}

fn default_exploration() -> f64 {
    0.1
}

fn default_history_len() -> usize {
    5
}

fn default_batch_size() -> usize {
    32
}

fn default_train_batches() -> usize {
    20
}

fn default_test_batches() -> usize {
    5
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_users: default_num_users(),
            num_locations: default_num_locations(),
            favourites: default_favourites(),
            exploration: default_exploration(),
            history_len: default_history_len(),
            batch_size: default_batch_size(),
            train_batches: default_train_batches(),
            test_batches: default_test_batches(),
            seed: 0,
        }
    }
}

impl SyntheticConfig {
    /// Read the `dataset_config` section, falling back to defaults
    pub fn from_run_config(config: &RunConfig) -> Result<Self> {
        let synthetic: Self = config.get_or("dataset_config", Self::default())?;
        synthetic.validate()?;
        Ok(synthetic)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_users == 0 || self.batch_size == 0 {
            return Err(ExecutorError::invalid_config(
                "dataset_config",
                "num_users and batch_size must be positive",
            ));
        }
        if self.favourites == 0 || self.favourites > self.num_locations {
            return Err(ExecutorError::invalid_config(
                "dataset_config.favourites",
                format!("expected 1..={} favourites", self.num_locations),
            ));
        }
        if !(0.0..=1.0).contains(&self.exploration) {
            return Err(ExecutorError::invalid_config(
                "dataset_config.exploration",
                "expected a probability",
            ));
        }
        Ok(())
    }
}

/// Seeded generator of check-in batches
#[derive(Debug)]
pub struct CheckinGenerator {
    config: SyntheticConfig,
    favourites: Vec<Vec<usize>>,
    rng: StdRng,
}

impl CheckinGenerator {
    pub fn new(config: SyntheticConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let favourites = (0..config.num_users)
            .map(|_| {
                (0..config.favourites)
                    .map(|_| rng.gen_range(0..config.num_locations))
                    .collect()
            })
            .collect();

        Self {
            config,
            favourites,
            rng,
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    fn visit(&mut self, user: usize) -> usize {
        if self.rng.gen_bool(self.config.exploration) {
            self.rng.gen_range(0..self.config.num_locations)
        } else {
            let favourites = &self.favourites[user];
            favourites[self.rng.gen_range(0..favourites.len())]
        }
    }

    pub fn batch(&mut self) -> CheckinBatch {
        let size = self.config.batch_size;
        let mut batch = CheckinBatch {
            users: Vec::with_capacity(size),
            history: Vec::with_capacity(size),
            targets: Vec::with_capacity(size),
        };

        for _ in 0..size {
            let user = self.rng.gen_range(0..self.config.num_users);
            let history = (0..self.config.history_len).map(|_| self.visit(user)).collect();
            let target = self.visit(user);

            batch.users.push(user);
            batch.history.push(history);
            batch.targets.push(target);
        }
        batch
    }

    pub fn batches(&mut self, count: usize) -> Vec<CheckinBatch> {
        (0..count).map(|_| self.batch()).collect()
    }

    /// Train and test splits with the configured batch counts
    pub fn split(&mut self) -> (Vec<CheckinBatch>, Vec<CheckinBatch>) {
        let train = self.batches(self.config.train_batches);
        let test = self.batches(self.config.test_batches);
        (train, test)
    }
}
