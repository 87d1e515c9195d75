//! Traffic state forecast evaluator.
//!
//! Outputs are `[samples, horizon]` arrays of ground truth and prediction.
//! Metrics are computed per horizon step `i` (1-based): in `single` mode over
//! step `i` alone, in `average` mode over steps `1..=i`. Masked metrics ignore
//! entries whose ground truth is zero (missing readings).

use std::path::Path;
use std::str::FromStr;

use ndarray::{concatenate, Array2, ArrayView2, Axis, Slice, Zip};
use tracing::debug;

use super::{write_report, Evaluator, MetricReport};
use crate::config::RunConfig;
use crate::error::{ExecutorError, Result};
use crate::model::ModelOutput;

pub const NAME: &str = "TrafficStateEvaluator";

const METRICS: &str = "evaluator_config.metrics";
const MODE: &str = "evaluator_config.mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMetric {
    Mae,
    Mse,
    Rmse,
    MaskedMae,
    MaskedMse,
    MaskedRmse,
    MaskedMape,
    R2,
}

impl StateMetric {
    pub const ALL: [StateMetric; 8] = [
        StateMetric::Mae,
        StateMetric::Mse,
        StateMetric::Rmse,
        StateMetric::MaskedMae,
        StateMetric::MaskedMse,
        StateMetric::MaskedRmse,
        StateMetric::MaskedMape,
        StateMetric::R2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateMetric::Mae => "MAE",
            StateMetric::Mse => "MSE",
            StateMetric::Rmse => "RMSE",
            StateMetric::MaskedMae => "masked_MAE",
            StateMetric::MaskedMse => "masked_MSE",
            StateMetric::MaskedRmse => "masked_RMSE",
            StateMetric::MaskedMape => "masked_MAPE",
            StateMetric::R2 => "R2",
        }
    }

    /// Value over a window of truth/prediction; NaN when undefined
    fn compute(&self, truth: ArrayView2<f32>, pred: ArrayView2<f32>) -> f64 {
        match self {
            StateMetric::Mae => mean_error(truth, pred, false, |d, _| d.abs()),
            StateMetric::Mse => mean_error(truth, pred, false, |d, _| d * d),
            StateMetric::Rmse => mean_error(truth, pred, false, |d, _| d * d).sqrt(),
            StateMetric::MaskedMae => mean_error(truth, pred, true, |d, _| d.abs()),
            StateMetric::MaskedMse => mean_error(truth, pred, true, |d, _| d * d),
            StateMetric::MaskedRmse => mean_error(truth, pred, true, |d, _| d * d).sqrt(),
            StateMetric::MaskedMape => mean_error(truth, pred, true, |d, t| (d / t).abs()),
            StateMetric::R2 => r2(truth, pred),
        }
    }
}

impl FromStr for StateMetric {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self> {
        StateMetric::ALL
            .into_iter()
            .find(|metric| metric.as_str() == s)
            .ok_or_else(|| ExecutorError::UnknownMetric {
                evaluator: NAME,
                metric: s.to_string(),
            })
    }
}

/// Mean of `f(pred - truth, truth)`, optionally skipping zero ground truth
fn mean_error<F>(truth: ArrayView2<f32>, pred: ArrayView2<f32>, masked: bool, f: F) -> f64
where
    F: Fn(f64, f64) -> f64,
{
    let mut sum = 0.0;
    let mut count = 0usize;
    Zip::from(truth).and(pred).for_each(|&t, &p| {
        if masked && t == 0.0 {
            return;
        }
        sum += f(p as f64 - t as f64, t as f64);
        count += 1;
    });

    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

fn r2(truth: ArrayView2<f32>, pred: ArrayView2<f32>) -> f64 {
    let n = truth.len();
    if n == 0 {
        return f64::NAN;
    }
    let mean = truth.iter().map(|&t| t as f64).sum::<f64>() / n as f64;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    Zip::from(truth).and(pred).for_each(|&t, &p| {
        ss_res += (t as f64 - p as f64).powi(2);
        ss_tot += (t as f64 - mean).powi(2);
    });

    if ss_tot == 0.0 {
        f64::NAN
    } else {
        1.0 - ss_res / ss_tot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizonMode {
    /// Each horizon step on its own
    Single,
    /// Steps `1..=i` pooled together
    Average,
}

impl FromStr for HorizonMode {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(HorizonMode::Single),
            "average" => Ok(HorizonMode::Average),
            other => Err(ExecutorError::invalid_config(
                MODE,
                format!("expected `single` or `average`, got `{other}`"),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrafficStateEvaluator {
    metrics: Vec<StateMetric>,
    mode: HorizonMode,
    tag: String,
    y_true: Vec<Array2<f32>>,
    y_pred: Vec<Array2<f32>>,
}

impl TrafficStateEvaluator {
    pub fn new(metrics: Vec<StateMetric>, mode: HorizonMode, tag: impl Into<String>) -> Self {
        Self {
            metrics,
            mode,
            tag: tag.into(),
            y_true: Vec::new(),
            y_pred: Vec::new(),
        }
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let metrics = match config.optional::<Vec<String>>(METRICS)? {
            Some(names) => names
                .iter()
                .map(|name| name.parse())
                .collect::<Result<Vec<_>>>()?,
            None => StateMetric::ALL.to_vec(),
        };
        let mode = config.get_or(MODE, "single".to_string())?.parse()?;
        Ok(Self::new(metrics, mode, config.result_tag()?))
    }

    fn horizon(&self) -> Option<usize> {
        self.y_true.first().map(Array2::ncols)
    }
}

impl Evaluator for TrafficStateEvaluator {
    fn clear(&mut self) {
        self.y_true.clear();
        self.y_pred.clear();
    }

    fn collect(&mut self, output: &ModelOutput) -> Result<()> {
        let ModelOutput::TrafficState { y_true, y_pred } = output else {
            return Err(ExecutorError::UnsupportedOutput {
                evaluator: NAME,
                kind: output.kind(),
            });
        };
        if y_true.dim() != y_pred.dim() {
            return Err(ExecutorError::ShapeMismatch(format!(
                "ground truth {:?} vs prediction {:?}",
                y_true.dim(),
                y_pred.dim()
            )));
        }
        if let Some(horizon) = self.horizon() {
            if y_true.ncols() != horizon {
                return Err(ExecutorError::ShapeMismatch(format!(
                    "horizon {} after earlier batches with horizon {horizon}",
                    y_true.ncols()
                )));
            }
        }

        self.y_true.push(y_true.clone());
        self.y_pred.push(y_pred.clone());
        debug!(rows = y_true.nrows(), batches = self.y_true.len(), "collected traffic state batch");
        Ok(())
    }

    fn evaluate(&self) -> Result<MetricReport> {
        let Some(horizon) = self.horizon() else {
            return Err(ExecutorError::NothingCollected { evaluator: NAME });
        };
        let views_true: Vec<_> = self.y_true.iter().map(Array2::view).collect();
        let views_pred: Vec<_> = self.y_pred.iter().map(Array2::view).collect();
        let truth = concatenate(Axis(0), &views_true)?;
        let pred = concatenate(Axis(0), &views_pred)?;

        let mut report = MetricReport::new();
        for step in 1..=horizon {
            let columns = match self.mode {
                HorizonMode::Single => Slice::from(step - 1..step),
                HorizonMode::Average => Slice::from(..step),
            };
            let t = truth.slice_axis(Axis(1), columns);
            let p = pred.slice_axis(Axis(1), columns);
            for metric in &self.metrics {
                report.insert(format!("{}@{step}", metric.as_str()), metric.compute(t, p));
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
