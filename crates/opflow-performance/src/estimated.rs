//! Error measures for numerical predictions.

use std::any::Any;

use serde::{Deserialize, Serialize};

use opflow_types::Result;

use crate::averagable::{moments, same_kind, Averagable, MacroAverage, PerformanceCriterion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AbsoluteError,
    SquaredError,
    RootMeanSquaredError,
    RelativeError,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::AbsoluteError => "absolute_error",
            ErrorKind::SquaredError => "squared_error",
            ErrorKind::RootMeanSquaredError => "root_mean_squared_error",
            ErrorKind::RelativeError => "relative_error",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ErrorKind::AbsoluteError => "Average absolute deviation of the prediction from the label",
            ErrorKind::SquaredError => "Average squared deviation of the prediction from the label",
            ErrorKind::RootMeanSquaredError => "Square root of the average squared deviation",
            ErrorKind::RelativeError => "Average absolute deviation relative to the label",
        }
    }

    /// Per-example deviation, or `None` if the example does not count.
    fn deviation(&self, label: f64, predicted: f64) -> Option<f64> {
        let diff = label - predicted;
        match self {
            ErrorKind::AbsoluteError => Some(diff.abs()),
            ErrorKind::SquaredError | ErrorKind::RootMeanSquaredError => Some(diff * diff),
            ErrorKind::RelativeError if label != 0.0 => Some((diff / label).abs()),
            ErrorKind::RelativeError => None,
        }
    }
}

/// A criterion built from one per-example deviation value.
///
/// Keeps the weighted sum and squared sum of deviations. Examples with a
/// zero label are skipped by the relative error. For the root mean squared
/// error the micro variance is the variance of the squared deviations.
#[derive(Debug, Clone)]
pub struct EstimatedCriterion {
    kind: ErrorKind,
    sum: f64,
    squared_sum: f64,
    weight: f64,
    macro_stats: MacroAverage,
}

impl EstimatedCriterion {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            sum: 0.0,
            squared_sum: 0.0,
            weight: 0.0,
            macro_stats: MacroAverage::default(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn count_example(&mut self, label: f64, predicted: f64) {
        self.count_weighted_example(label, predicted, 1.0);
    }

    pub fn count_weighted_example(&mut self, label: f64, predicted: f64, weight: f64) {
        if let Some(d) = self.kind.deviation(label, predicted) {
            self.sum += d * weight;
            self.squared_sum += d * d * weight;
            self.weight += weight;
        }
    }

    /// Raw statistics: (sum, squared sum, weight).
    pub fn raw(&self) -> (f64, f64, f64) {
        (self.sum, self.squared_sum, self.weight)
    }
}

impl Averagable for EstimatedCriterion {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn example_count(&self) -> f64 {
        self.weight
    }

    fn micro_average(&self) -> f64 {
        let (mean, _) = moments(self.sum, self.squared_sum, self.weight);
        match self.kind {
            ErrorKind::RootMeanSquaredError => mean.sqrt(),
            _ => mean,
        }
    }

    fn micro_variance(&self) -> f64 {
        moments(self.sum, self.squared_sum, self.weight).1
    }

    fn macro_stats(&self) -> &MacroAverage {
        &self.macro_stats
    }

    fn macro_stats_mut(&mut self) -> &mut MacroAverage {
        &mut self.macro_stats
    }

    fn merge_counts(&mut self, other: &dyn Averagable) -> Result<()> {
        let other: &EstimatedCriterion = same_kind(self.name(), other)?;
        self.sum += other.sum;
        self.squared_sum += other.squared_sum;
        self.weight += other.weight;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PerformanceCriterion for EstimatedCriterion {
    fn fitness(&self) -> f64 {
        -self.average()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(kind: ErrorKind, pairs: &[(f64, f64)]) -> EstimatedCriterion {
        let mut c = EstimatedCriterion::new(kind);
        for (l, p) in pairs {
            c.count_example(*l, *p);
        }
        c
    }

    #[test]
    fn absolute_error_average() {
        let c = filled(ErrorKind::AbsoluteError, &[(1.0, 2.0), (3.0, 0.0)]);
        assert_eq!(c.micro_average(), 2.0);
        assert_eq!(c.example_count(), 2.0);
        assert_eq!(c.micro_variance(), 1.0);
    }

    #[test]
    fn rmse_takes_root() {
        let c = filled(ErrorKind::RootMeanSquaredError, &[(0.0, 3.0), (0.0, 4.0)]);
        assert!((c.micro_average() - 12.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn relative_error_skips_zero_labels() {
        let c = filled(ErrorKind::RelativeError, &[(2.0, 1.0), (0.0, 5.0)]);
        assert_eq!(c.example_count(), 1.0);
        assert_eq!(c.micro_average(), 0.5);
    }

    #[test]
    fn merge_equals_pooled_counts() {
        let mut a = filled(ErrorKind::SquaredError, &[(1.0, 0.0), (2.0, 0.0)]);
        let b = filled(ErrorKind::SquaredError, &[(3.0, 0.0)]);
        a.merge(&b).unwrap();
        let pooled = filled(ErrorKind::SquaredError, &[(1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]);
        assert_eq!(a.raw(), pooled.raw());
        assert_eq!(a.macro_stats().count, 2);
        // Macro average is the mean of the two run averages: (2.5 + 9) / 2.
        assert_eq!(a.average(), 5.75);
    }

    #[test]
    fn merge_rejects_other_kind() {
        let mut a = EstimatedCriterion::new(ErrorKind::AbsoluteError);
        let b = EstimatedCriterion::new(ErrorKind::SquaredError);
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn lower_error_is_fitter() {
        let good = filled(ErrorKind::AbsoluteError, &[(1.0, 1.1)]);
        let bad = filled(ErrorKind::AbsoluteError, &[(1.0, 3.0)]);
        assert!(good.fitness() > bad.fitness());
    }
}
