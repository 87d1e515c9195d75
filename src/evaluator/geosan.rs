//! Sampled-candidate ranking evaluator.
//!
//! Each output row scores the ground truth (column 0) against sampled
//! negatives. The evaluator keeps a histogram of the ground truth's rank and
//! reports `Hit@k` and `NDCG@k` for every cut-off up to `topk`.

use std::path::Path;

use tracing::debug;

use super::{write_report, Evaluator, MetricReport};
use crate::config::RunConfig;
use crate::error::{ExecutorError, Result};
use crate::model::ModelOutput;

pub const NAME: &str = "GeoSANEvaluator";

const TOPK: &str = "evaluator_config.topk";
const DEFAULT_TOPK: usize = 10;

#[derive(Debug, Clone)]
pub struct GeoSanEvaluator {
    topk: usize,
    tag: String,
    /// `rank_counts[r]` = rows whose ground truth had 0-based rank `r`
    rank_counts: Vec<u64>,
    total: u64,
}

impl GeoSanEvaluator {
    pub fn new(topk: usize, tag: impl Into<String>) -> Result<Self> {
        if topk == 0 {
            return Err(ExecutorError::invalid_config(TOPK, "expected a positive cut-off"));
        }
        Ok(Self {
            topk,
            tag: tag.into(),
            rank_counts: Vec::new(),
            total: 0,
        })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Self::new(config.get_or(TOPK, DEFAULT_TOPK)?, config.result_tag()?)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    fn record(&mut self, rank: usize) {
        if self.rank_counts.len() <= rank {
            self.rank_counts.resize(rank + 1, 0);
        }
        self.rank_counts[rank] += 1;
        self.total += 1;
    }
}

/// 0-based rank of the ground truth: candidates scoring strictly higher.
/// A NaN truth ranks last.
fn ground_truth_rank(row: &[f32]) -> usize {
    let truth = row[0];
    if truth.is_nan() {
        return row.len() - 1;
    }
    row[1..].iter().filter(|&&score| score > truth).count()
}

impl Evaluator for GeoSanEvaluator {
    fn clear(&mut self) {
        self.rank_counts.clear();
        self.total = 0;
    }

    fn collect(&mut self, output: &ModelOutput) -> Result<()> {
        let ModelOutput::Ranking(scores) = output else {
            return Err(ExecutorError::UnsupportedOutput {
                evaluator: NAME,
                kind: output.kind(),
            });
        };
        if scores.ncols() == 0 {
            return Err(ExecutorError::ShapeMismatch(
                "ranking output has no ground-truth column".to_string(),
            ));
        }

        for row in scores.rows() {
            let rank = match row.as_slice() {
                Some(slice) => ground_truth_rank(slice),
                None => ground_truth_rank(&row.to_vec()),
            };
            self.record(rank);
        }
        debug!(rows = scores.nrows(), total = self.total, "collected ranking batch");
        Ok(())
    }

    fn evaluate(&self) -> Result<MetricReport> {
        if self.total == 0 {
            return Err(ExecutorError::NothingCollected { evaluator: NAME });
        }

        let total = self.total as f64;
        let mut report = MetricReport::new();
        let mut hits = 0.0;
        let mut gain = 0.0;
        for k in 1..=self.topk {
            let rank = k - 1;
            let count = self.rank_counts.get(rank).copied().unwrap_or(0) as f64;
            hits += count;
            gain += count / ((rank + 2) as f64).log2();

            report.insert(format!("Hit@{k}"), hits / total);
            report.insert(format!("NDCG@{k}"), gain / total);
        }
        Ok(report)
    }

    fn save_result(&mut self, dir: &Path) -> Result<()> {
        let report = self.evaluate()?;
        write_report(dir, &self.tag, &report)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn evaluator(topk: usize) -> GeoSanEvaluator {
        GeoSanEvaluator::new(topk, "GeoSAN_test").unwrap()
    }

    #[test]
    fn test_rank_counts_strictly_higher_scores() {
        assert_eq!(ground_truth_rank(&[0.9, 0.1, 0.2]), 0);
        assert_eq!(ground_truth_rank(&[0.5, 0.7, 0.5, 0.9]), 2);
        // ties do not push the ground truth down
        assert_eq!(ground_truth_rank(&[0.5, 0.5, 0.5]), 0);
    }

    #[test]
    fn test_nan_truth_is_never_a_hit() {
        assert_eq!(ground_truth_rank(&[f32::NAN, 0.9, 0.8]), 2);

        let mut eval = evaluator(1);
        eval.collect(&ModelOutput::Ranking(array![[f32::NAN, 0.9, 0.8]])).unwrap();
        let report = eval.evaluate().unwrap();
        assert_eq!(report["Hit@1"], 0.0);
        assert_eq!(report["NDCG@1"], 0.0);
    }

    #[test]
    fn test_hit_and_ndcg() {
        let mut eval = evaluator(3);
        // ranks: 0, 1, 3, 0
        let scores = array![
            [0.9, 0.1, 0.2, 0.3, 0.0],
            [0.5, 0.6, 0.1, 0.2, 0.0],
            [0.1, 0.6, 0.7, 0.8, 0.0],
            [1.0, 0.9, 0.8, 0.7, 0.6],
        ];
        eval.collect(&ModelOutput::Ranking(scores)).unwrap();

        let report = eval.evaluate().unwrap();
        assert_eq!(report.len(), 6);
        assert!((report["Hit@1"] - 0.5).abs() < 1e-12);
        assert!((report["Hit@2"] - 0.75).abs() < 1e-12);
        assert!((report["Hit@3"] - 0.75).abs() < 1e-12);

        let ndcg2 = (2.0 + 1.0 / 3f64.log2()) / 4.0;
        assert!((report["NDCG@1"] - 0.5).abs() < 1e-12);
        assert!((report["NDCG@2"] - ndcg2).abs() < 1e-12);
    }

    #[test]
    fn test_clear_resets() {
        let mut eval = evaluator(1);
        eval.collect(&ModelOutput::Ranking(array![[1.0, 0.0]])).unwrap();
        assert_eq!(eval.total(), 1);

        eval.clear();
        assert!(matches!(
            eval.evaluate(),
            Err(ExecutorError::NothingCollected { .. })
        ));
    }

    #[test]
    fn test_rejects_other_outputs() {
        let mut eval = evaluator(1);
        let output = ModelOutput::NextLocation {
            loc_true: vec![0],
            loc_pred: array![[1.0, 0.0]],
        };

        assert!(matches!(
            eval.collect(&output),
            Err(ExecutorError::UnsupportedOutput { kind: "next_location", .. })
        ));
    }

    #[test]
    fn test_zero_topk_is_config_error() {
        assert!(GeoSanEvaluator::new(0, "x").unwrap_err().is_config());
    }

    #[test]
    fn test_from_config() {
        let config = RunConfig::from_toml_str(
            r#"
            model = "GeoSAN"
            dataset = "gowalla"
            [evaluator_config]
            topk = 5
            "#,
        )
        .unwrap();
        let mut eval = GeoSanEvaluator::from_config(&config).unwrap();
        eval.collect(&ModelOutput::Ranking(array![[1.0, 0.0]])).unwrap();

        let dir = tempfile::tempdir().unwrap();
        eval.save_result(dir.path()).unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(eval.evaluate().unwrap().len(), 10);
    }
}
