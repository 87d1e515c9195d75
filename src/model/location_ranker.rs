//! Next-location ranking model.
//!
//! Scores candidate locations for a user given the user's recent check-ins.
//! Training contrasts the visited location with sampled negatives; prediction
//! ranks it against a larger negative sample, which is what the GeoSAN-style
//! hit-rate evaluation consumes.

use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::TensorData;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::Rng;

use super::{ModelOutput, TrafficModel};
use crate::config::RunConfig;
use crate::error::{self, ExecutorError};
use crate::seed::SeededRngs;

const PROB_EPS: f32 = 1e-6;

/// Location ranker configuration (`model_config.*`)
#[derive(Config, Debug)]
pub struct LocationRankerConfig {
    pub num_users: usize,
    pub num_locations: usize,
    /// Width of user and location embeddings
    #[config(default = "32")]
    pub embedding_dim: usize,
    /// Negatives per positive during training
    #[config(default = "5")]
    pub train_negatives: usize,
    /// Negatives per positive during evaluation
    #[config(default = "100")]
    pub eval_negatives: usize,
}

impl LocationRankerConfig {
    pub fn from_run_config(config: &RunConfig) -> error::Result<Self> {
        let mut ranker = Self::new(
            config.get("model_config.num_users")?,
            config.get("model_config.num_locations")?,
        );
        if let Some(dim) = config.optional("model_config.embedding_dim")? {
            ranker.embedding_dim = dim;
        }
        if let Some(k) = config.optional("model_config.train_negatives")? {
            ranker.train_negatives = k;
        }
        if let Some(k) = config.optional("model_config.eval_negatives")? {
            ranker.eval_negatives = k;
        }
        ranker.validate()?;
        Ok(ranker)
    }

    pub fn validate(&self) -> error::Result<()> {
        if self.num_users == 0 {
            return Err(ExecutorError::invalid_config(
                "model_config.num_users",
                "expected at least one user",
            ));
        }
        // Negatives are drawn from every location except the target
        if self.num_locations < 2 {
            return Err(ExecutorError::invalid_config(
                "model_config.num_locations",
                "expected at least two locations",
            ));
        }
        if self.embedding_dim == 0 {
            return Err(ExecutorError::invalid_config(
                "model_config.embedding_dim",
                "expected a positive width",
            ));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<LocationRanker<B>> {
        self.validate()?;
        let user_embedding = EmbeddingConfig::new(self.num_users, self.embedding_dim).init(device);
        let location_embedding =
            EmbeddingConfig::new(self.num_locations, self.embedding_dim).init(device);
        let projection =
            LinearConfig::new(2 * self.embedding_dim, self.embedding_dim).init(device);

        Ok(LocationRanker {
            user_embedding,
            location_embedding,
            projection,
            num_users: self.num_users,
            num_locations: self.num_locations,
            train_negatives: self.train_negatives,
            eval_negatives: self.eval_negatives,
        })
    }
}

/// One batch of check-in sequences
#[derive(Debug, Clone, PartialEq)]
pub struct CheckinBatch {
    pub users: Vec<usize>,
    /// Previously visited locations per row, oldest first (may be empty)
    pub history: Vec<Vec<usize>>,
    /// Location visited next
    pub targets: Vec<usize>,
}

impl CheckinBatch {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn check(&self, num_users: usize, num_locations: usize) -> error::Result<()> {
        if self.is_empty() {
            return Err(ExecutorError::Computation("empty check-in batch".to_string()));
        }
        if self.users.len() != self.len() || self.history.len() != self.len() {
            return Err(ExecutorError::ShapeMismatch(format!(
                "check-in batch has {} users, {} histories and {} targets",
                self.users.len(),
                self.history.len(),
                self.len()
            )));
        }
        if let Some(user) = self.users.iter().find(|&&user| user >= num_users) {
            return Err(ExecutorError::Computation(format!(
                "user id {user} out of range for {num_users} users"
            )));
        }
        let out_of_range = self
            .targets
            .iter()
            .chain(self.history.iter().flatten())
            .find(|&&loc| loc >= num_locations);
        if let Some(loc) = out_of_range {
            return Err(ExecutorError::Computation(format!(
                "location id {loc} out of range for {num_locations} locations"
            )));
        }
        Ok(())
    }
}

#[derive(Module, Debug)]
pub struct LocationRanker<B: Backend> {
    user_embedding: Embedding<B>,
    location_embedding: Embedding<B>,
    projection: Linear<B>,
    num_users: usize,
    num_locations: usize,
    train_negatives: usize,
    eval_negatives: usize,
}

impl<B: Backend> LocationRanker<B> {
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_locations(&self) -> usize {
        self.num_locations
    }

    fn device(&self) -> B::Device {
        self.location_embedding.weight.val().device()
    }

    /// Query vector `[batch, dim]` from the user and the mean of the history
    fn encode(&self, batch: &CheckinBatch) -> Tensor<B, 2> {
        let device = self.device();
        let rows = batch.len();

        let users: Vec<i64> = batch.users.iter().map(|&u| u as i64).collect();
        let users = Tensor::<B, 2, Int>::from_data(TensorData::new(users, [rows, 1]), &device);
        let user = self.user_embedding.forward(users);
        let [_, _, dim] = user.dims();
        let user = user.reshape([rows, dim]);

        let width = batch.history.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let mut ids = Vec::with_capacity(rows * width);
        let mut mask = Vec::with_capacity(rows * width);
        for visits in &batch.history {
            for slot in 0..width {
                match visits.get(slot) {
                    Some(&loc) => {
                        ids.push(loc as i64);
                        mask.push(1.0f32);
                    }
                    None => {
                        ids.push(0);
                        mask.push(0.0);
                    }
                }
            }
        }
        let counts: Vec<f32> = batch
            .history
            .iter()
            .map(|visits| visits.len().max(1) as f32)
            .collect();

        let ids = Tensor::<B, 2, Int>::from_data(TensorData::new(ids, [rows, width]), &device);
        let mask = Tensor::<B, 2>::from_data(TensorData::new(mask, [rows, width]), &device);
        let counts = Tensor::<B, 2>::from_data(TensorData::new(counts, [rows, 1]), &device);

        let visited = self.location_embedding.forward(ids) * mask.unsqueeze_dim::<3>(2);
        let history = visited.sum_dim(1).reshape([rows, dim]) / counts;

        self.projection.forward(Tensor::cat(vec![user, history], 1))
    }

    /// Dot-product scores `[batch, candidates]`
    pub fn score(&self, batch: &CheckinBatch, candidates: &[Vec<usize>]) -> Tensor<B, 2> {
        let device = self.device();
        let rows = candidates.len();
        let width = candidates.first().map_or(0, Vec::len);

        let query = self.encode(batch);
        let ids: Vec<i64> = candidates.iter().flatten().map(|&c| c as i64).collect();
        let ids = Tensor::<B, 2, Int>::from_data(TensorData::new(ids, [rows, width]), &device);
        let candidates = self.location_embedding.forward(ids);

        (candidates * query.unsqueeze_dim::<3>(1))
            .sum_dim(2)
            .reshape([rows, width])
    }

    /// Target in column 0 followed by `negatives` sampled locations per row
    fn candidates(&self, batch: &CheckinBatch, negatives: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
        batch
            .targets
            .iter()
            .map(|&target| {
                let mut row = Vec::with_capacity(1 + negatives);
                row.push(target);
                row.extend(sample_negatives(rng, self.num_locations, target, negatives));
                row
            })
            .collect()
    }
}

/// Draw `count` location ids uniformly (with replacement), never `target`
pub fn sample_negatives(
    rng: &mut StdRng,
    num_locations: usize,
    target: usize,
    count: usize,
) -> Vec<usize> {
    (0..count)
        .map(|_| {
            // Shift past the target instead of rejection sampling
            let draw = rng.gen_range(0..num_locations - 1);
            if draw >= target {
                draw + 1
            } else {
                draw
            }
        })
        .collect()
}

impl<B: AutodiffBackend> TrafficModel<B> for LocationRanker<B> {
    type Batch = CheckinBatch;

    fn calculate_loss(
        &self,
        batch: &CheckinBatch,
        rngs: &mut SeededRngs,
    ) -> error::Result<Tensor<B, 1>> {
        batch.check(self.num_users, self.num_locations)?;

        let candidates = self.candidates(batch, self.train_negatives, &mut rngs.general);
        let width = 1 + self.train_negatives;
        let labels: Vec<f32> = (0..batch.len())
            .flat_map(|_| (0..width).map(|col| if col == 0 { 1.0 } else { 0.0 }))
            .collect();
        let labels =
            Tensor::<B, 2>::from_data(TensorData::new(labels, [batch.len(), width]), &self.device());

        let probs = sigmoid(self.score(batch, &candidates)).clamp(PROB_EPS, 1.0 - PROB_EPS);
        let positive = labels.clone() * probs.clone().log();
        let negative = labels.neg().add_scalar(1.0) * probs.neg().add_scalar(1.0).log();

        Ok((positive + negative).mean().neg())
    }

    fn predict(
        model: &LocationRanker<B::InnerBackend>,
        batch: &CheckinBatch,
        rngs: &mut SeededRngs,
    ) -> error::Result<ModelOutput> {
        batch.check(model.num_users, model.num_locations)?;

        let candidates = model.candidates(batch, model.eval_negatives, &mut rngs.general);
        let width = 1 + model.eval_negatives;
        let scores = model
            .score(batch, &candidates)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ExecutorError::Computation(format!("reading scores: {e:?}")))?;

        Ok(ModelOutput::Ranking(Array2::from_shape_vec(
            (batch.len(), width),
            scores,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrainBackend;
    use crate::seed::seed_all;
    use burn::module::AutodiffModule;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;

    fn batch() -> CheckinBatch {
        CheckinBatch {
            users: vec![0, 1, 2],
            history: vec![vec![1, 2, 3], vec![], vec![4]],
            targets: vec![5, 6, 7],
        }
    }

    fn config() -> LocationRankerConfig {
        LocationRankerConfig::new(3, 10)
            .with_embedding_dim(8)
            .with_eval_negatives(4)
    }

    #[test]
    fn test_score_shape() {
        let device = Default::default();
        let model = config().init::<NdArray<f32>>(&device).unwrap();
        let candidates = vec![vec![5, 1, 2], vec![6, 1, 2], vec![7, 1, 2]];

        let scores = model.score(&batch(), &candidates);
        assert_eq!(scores.dims(), [3, 3]);
    }

    #[test]
    fn test_loss_is_finite_scalar() {
        let device = Default::default();
        let model = config().init::<TrainBackend>(&device).unwrap();
        let mut rngs = seed_all::<TrainBackend>(7);

        let loss = model.calculate_loss(&batch(), &mut rngs).unwrap();
        assert_eq!(loss.dims(), [1]);
        let value = loss.into_scalar();
        assert!(value.is_finite() && value > 0.0);
    }

    #[test]
    fn test_predict_ranking_shape() {
        let device = Default::default();
        let model = config().init::<TrainBackend>(&device).unwrap();
        let mut rngs = seed_all::<TrainBackend>(7);

        let output = LocationRanker::<TrainBackend>::predict(&model.valid(), &batch(), &mut rngs)
            .unwrap();
        match output {
            ModelOutput::Ranking(scores) => assert_eq!(scores.dim(), (3, 5)),
            other => panic!("unexpected output {}", other.kind()),
        }
    }

    #[test]
    fn test_negatives_exclude_target() {
        let mut rng = StdRng::seed_from_u64(3);
        for target in [0, 4, 9] {
            let negatives = sample_negatives(&mut rng, 10, target, 200);
            assert_eq!(negatives.len(), 200);
            assert!(negatives.iter().all(|&n| n != target && n < 10));
        }
    }

    #[test]
    fn test_malformed_batch_rejected() {
        let device = Default::default();
        let model = config().init::<TrainBackend>(&device).unwrap();
        let mut rngs = seed_all::<TrainBackend>(7);

        let mut short = batch();
        short.users.pop();
        assert!(matches!(
            model.calculate_loss(&short, &mut rngs),
            Err(ExecutorError::ShapeMismatch(_))
        ));

        let mut out_of_range = batch();
        out_of_range.targets[0] = 10;
        assert!(matches!(
            model.calculate_loss(&out_of_range, &mut rngs),
            Err(ExecutorError::Computation(_))
        ));

        let unknown_user = CheckinBatch {
            users: vec![5],
            history: vec![vec![1]],
            targets: vec![2],
        };
        let err = model.calculate_loss(&unknown_user, &mut rngs).unwrap_err();
        assert!(matches!(err, ExecutorError::Computation(_)));
        assert!(err.to_string().contains("user id 5"));
        assert!(LocationRanker::<TrainBackend>::predict(&model.valid(), &unknown_user, &mut rngs)
            .is_err());
    }

    #[test]
    fn test_from_run_config() {
        let run = RunConfig::from_toml_str(
            r#"
            [model_config]
            num_users = 4
            num_locations = 50
            eval_negatives = 20
            "#,
        )
        .unwrap();

        let ranker = LocationRankerConfig::from_run_config(&run).unwrap();
        assert_eq!(ranker.num_locations, 50);
        assert_eq!(ranker.eval_negatives, 20);
        assert_eq!(ranker.train_negatives, 5);
        assert_eq!(ranker.embedding_dim, 32);
    }

    #[test]
    fn test_single_location_rejected() {
        let run = RunConfig::from_toml_str(
            "[model_config]\nnum_users = 1\nnum_locations = 1\n",
        )
        .unwrap();
        let err = LocationRankerConfig::from_run_config(&run).unwrap_err();
        assert!(err.is_config());

        let direct = LocationRankerConfig::new(1, 1).init::<TrainBackend>(&Default::default());
        assert!(direct.err().unwrap().is_config());
    }
}
