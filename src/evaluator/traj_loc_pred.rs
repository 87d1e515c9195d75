//! Next-location prediction evaluator.
//!
//! Consumes full score vectors over all locations with one true location per
//! row, and reports top-k retrieval metrics for each configured cut-off.

use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use super::{write_report, Evaluator, MetricReport};
use crate::config::RunConfig;
use crate::error::{ExecutorError, Result};
use crate::model::ModelOutput;

pub const NAME: &str = "TrajLocPredEvaluator";

const METRICS: &str = "evaluator_config.metrics";
const TOPK: &str = "evaluator_config.topk";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrajMetric {
    Precision,
    Recall,
    F1,
    Mrr,
    Map,
    Ndcg,
}

impl TrajMetric {
    pub const ALL: [TrajMetric; 6] = [
        TrajMetric::Precision,
        TrajMetric::Recall,
        TrajMetric::F1,
        TrajMetric::Mrr,
        TrajMetric::Map,
        TrajMetric::Ndcg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrajMetric::Precision => "Precision",
            TrajMetric::Recall => "Recall",
            TrajMetric::F1 => "F1",
            TrajMetric::Mrr => "MRR",
            TrajMetric::Map => "MAP",
            TrajMetric::Ndcg => "NDCG",
        }
    }
}

impl FromStr for TrajMetric {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self> {
        TrajMetric::ALL
            .into_iter()
            .find(|metric| metric.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ExecutorError::UnknownMetric {
                evaluator: NAME,
                metric: s.to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct TrajLocPredEvaluator {
    metrics: Vec<TrajMetric>,
    topk: Vec<usize>,
    tag: String,
    /// 1-based rank of the true location for every collected row
    ranks: Vec<usize>,
}

impl TrajLocPredEvaluator {
    pub fn new(metrics: Vec<TrajMetric>, topk: Vec<usize>, tag: impl Into<String>) -> Result<Self> {
        if topk.is_empty() || topk.contains(&0) {
            return Err(ExecutorError::invalid_config(
                TOPK,
                "expected one or more positive cut-offs",
            ));
        }
        Ok(Self {
            metrics,
            topk,
            tag: tag.into(),
            ranks: Vec::new(),
        })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let metrics = match config.optional::<Vec<String>>(METRICS)? {
            Some(names) => names
                .iter()
                .map(|name| name.parse())
                .collect::<Result<Vec<_>>>()?,
            None => TrajMetric::ALL.to_vec(),
        };
        let topk = config.get_or(TOPK, vec![1, 5, 10])?;
        Self::new(metrics, topk, config.result_tag()?)
    }

    fn metric_at(&self, metric: TrajMetric, k: usize) -> f64 {
        let total = self.ranks.len() as f64;
        let within: Vec<usize> = self.ranks.iter().copied().filter(|&r| r <= k).collect();
        let recall = within.len() as f64 / total;
        let precision = recall / k as f64;

        match metric {
            TrajMetric::Precision => precision,
            TrajMetric::Recall => recall,
            TrajMetric::F1 if precision + recall > 0.0 => {
                2.0 * precision * recall / (precision + recall)
            }
            TrajMetric::F1 => 0.0,
            // a single relevant item makes average precision equal to reciprocal rank
            TrajMetric::Mrr | TrajMetric::Map => {
                within.iter().map(|&r| 1.0 / r as f64).sum::<f64>() / total
            }
            TrajMetric::Ndcg => {
                within
                    .iter()
                    .map(|&r| 1.0 / ((r + 1) as f64).log2())
                    .sum::<f64>()
                    / total
            }
        }
    }
}

/// 1-based rank of `truth` among `scores`; ties favour the true location
/// and a NaN truth ranks last
fn true_rank(scores: &[f32], truth: usize) -> usize {
    let target = scores[truth];
    if target.is_nan() {
        return scores.len();
    }
    1 + scores.iter().filter(|&&score| score > target).count()
}

impl Evaluator for TrajLocPredEvaluator {
    fn clear(&mut self) {
        self.ranks.clear();
    }

    fn collect(&mut self, output: &ModelOutput) -> Result<()> {
        let ModelOutput::NextLocation { loc_true, loc_pred } = output else {
            return Err(ExecutorError::UnsupportedOutput {
                evaluator: NAME,
                kind: output.kind(),
            });
        };
        if loc_true.len() != loc_pred.nrows() {
            return Err(ExecutorError::ShapeMismatch(format!(
                "{} true locations for {} score rows",
                loc_true.len(),
                loc_pred.nrows()
            )));
        }

        let num_locations = loc_pred.ncols();
        for (row, &truth) in loc_pred.rows().into_iter().zip(loc_true) {
            if truth >= num_locations {
                return Err(ExecutorError::ShapeMismatch(format!(
                    "true location {truth} outside {num_locations} scored locations"
                )));
            }
            let rank = match row.as_slice() {
                Some(slice) => true_rank(slice, truth),
                None => true_rank(&row.to_vec(), truth),
            };
            self.ranks.push(rank);
        }
        debug!(rows = loc_true.len(), total = self.ranks.len(), "collected next-location batch");
        Ok(())
    }

    fn evaluate(&self) -> Result<MetricReport> {
        if self.ranks.is_empty() {
            return Err(ExecutorError::NothingCollected { evaluator: NAME });
        }

        let mut report = MetricReport::new();
        for &k in &self.topk {
            for &metric in &self.metrics {
                report.insert(format!("{}@{k}", metric.as_str()), self.metric_at(metric, k));
            }
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

    fn output() -> ModelOutput {
        // true ranks: 1, 2, 3
        ModelOutput::NextLocation {
            loc_true: vec![0, 1, 2],
            loc_pred: array![
                [0.9, 0.1, 0.0, 0.0],
                [0.5, 0.4, 0.1, 0.0],
                [0.3, 0.6, 0.2, 0.1],
            ],
        }
    }

    #[test]
    fn test_metrics_by_cutoff() {
        let mut eval =
            TrajLocPredEvaluator::new(TrajMetric::ALL.to_vec(), vec![1, 2], "test").unwrap();
        eval.collect(&output()).unwrap();
        let report = eval.evaluate().unwrap();

        assert_eq!(report.len(), 12);
        assert!((report["Recall@1"] - 1.0 / 3.0).abs() < 1e-12);
        assert!((report["Recall@2"] - 2.0 / 3.0).abs() < 1e-12);
        assert!((report["Precision@2"] - 1.0 / 3.0).abs() < 1e-12);
        assert!((report["MRR@2"] - 0.5).abs() < 1e-12);
        assert_eq!(report["MRR@2"], report["MAP@2"]);

        let f1 = 2.0 * (1.0 / 3.0) * (2.0 / 3.0) / (1.0 / 3.0 + 2.0 / 3.0);
        assert!((report["F1@2"] - f1).abs() < 1e-12);

        let ndcg = (1.0 + 1.0 / 3f64.log2()) / 3.0;
        assert!((report["NDCG@2"] - ndcg).abs() < 1e-12);
    }

    #[test]
    fn test_nan_truth_ranks_last() {
        assert_eq!(true_rank(&[0.2, f32::NAN, 0.1], 1), 3);

        let mut eval = TrajLocPredEvaluator::new(vec![TrajMetric::Recall], vec![1], "t").unwrap();
        eval.collect(&ModelOutput::NextLocation {
            loc_true: vec![1],
            loc_pred: array![[0.2, f32::NAN, 0.1]],
        })
        .unwrap();
        assert_eq!(eval.evaluate().unwrap()["Recall@1"], 0.0);
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let config = RunConfig::from_toml_str(
            r#"
            [evaluator_config]
            metrics = ["Recall", "Coverage"]
            "#,
        )
        .unwrap();

        let err = TrajLocPredEvaluator::from_config(&config).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("Coverage"));
    }

    #[test]
    fn test_defaults_from_config() {
        let config = RunConfig::from_toml_str("").unwrap();
        let mut eval = TrajLocPredEvaluator::from_config(&config).unwrap();
        eval.collect(&output()).unwrap();

        // six metrics at three cut-offs
        assert_eq!(eval.evaluate().unwrap().len(), 18);
    }

    #[test]
    fn test_mismatched_rows() {
        let mut eval = TrajLocPredEvaluator::new(vec![TrajMetric::Recall], vec![1], "t").unwrap();
        let output = ModelOutput::NextLocation {
            loc_true: vec![0],
            loc_pred: array![[0.1, 0.2], [0.3, 0.4]],
        };

        assert!(matches!(
            eval.collect(&output),
            Err(ExecutorError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_nothing_collected() {
        let eval = TrajLocPredEvaluator::new(vec![TrajMetric::F1], vec![5], "t").unwrap();
        assert!(matches!(
            eval.evaluate(),
            Err(ExecutorError::NothingCollected { evaluator: NAME })
        ));
    }
}
