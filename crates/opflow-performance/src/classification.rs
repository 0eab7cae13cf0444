//! Confusion-matrix based measures for nominal predictions.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use opflow_types::Result;

use crate::averagable::{same_kind, Averagable, MacroAverage, PerformanceCriterion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationKind {
    Accuracy,
    ClassificationError,
    Kappa,
}

impl ClassificationKind {
    pub fn name(&self) -> &'static str {
        match self {
            ClassificationKind::Accuracy => "accuracy",
            ClassificationKind::ClassificationError => "classification_error",
            ClassificationKind::Kappa => "kappa",
        }
    }
}

/// A criterion computed from a weighted confusion matrix.
///
/// The matrix is keyed by (true label, predicted label); merging adds the
/// matrices cell by cell.
#[derive(Debug, Clone)]
pub struct ClassificationCriterion {
    kind: ClassificationKind,
    matrix: BTreeMap<(String, String), f64>,
    macro_stats: MacroAverage,
}

impl ClassificationCriterion {
    pub fn new(kind: ClassificationKind) -> Self {
        Self {
            kind,
            matrix: BTreeMap::new(),
            macro_stats: MacroAverage::default(),
        }
    }

    pub fn kind(&self) -> ClassificationKind {
        self.kind
    }

    pub fn count_example(&mut self, label: &str, predicted: &str) {
        self.count_weighted_example(label, predicted, 1.0);
    }

    pub fn count_weighted_example(&mut self, label: &str, predicted: &str, weight: f64) {
        *self
            .matrix
            .entry((label.to_string(), predicted.to_string()))
            .or_insert(0.0) += weight;
    }

    /// Weight in the cell (true `label`, `predicted`).
    pub fn cell(&self, label: &str, predicted: &str) -> f64 {
        self.matrix
            .get(&(label.to_string(), predicted.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    /// All class values seen, as true or predicted label.
    pub fn classes(&self) -> BTreeSet<&str> {
        self.matrix
            .keys()
            .flat_map(|(l, p)| [l.as_str(), p.as_str()])
            .collect()
    }

    fn total(&self) -> f64 {
        self.matrix.values().sum()
    }

    fn correct(&self) -> f64 {
        self.matrix
            .iter()
            .filter(|((l, p), _)| l == p)
            .map(|(_, w)| w)
            .sum()
    }

    fn accuracy(&self) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            f64::NAN
        } else {
            self.correct() / total
        }
    }

    fn kappa(&self) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            return f64::NAN;
        }
        let mut row: BTreeMap<&str, f64> = BTreeMap::new();
        let mut col: BTreeMap<&str, f64> = BTreeMap::new();
        for ((l, p), w) in &self.matrix {
            *row.entry(l.as_str()).or_insert(0.0) += w;
            *col.entry(p.as_str()).or_insert(0.0) += w;
        }
        let expected: f64 = row
            .iter()
            .map(|(class, r)| (r / total) * (col.get(class).copied().unwrap_or(0.0) / total))
            .sum();
        let observed = self.correct() / total;
        if (1.0 - expected).abs() < f64::EPSILON {
            return if (observed - 1.0).abs() < f64::EPSILON { 1.0 } else { 0.0 };
        }
        (observed - expected) / (1.0 - expected)
    }
}

impl Averagable for ClassificationCriterion {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        match self.kind {
            ClassificationKind::Accuracy => "Relative number of correctly classified examples",
            ClassificationKind::ClassificationError => "Relative number of misclassified examples",
            ClassificationKind::Kappa => "Accuracy corrected for agreement by chance",
        }
    }

    fn example_count(&self) -> f64 {
        self.total()
    }

    fn micro_average(&self) -> f64 {
        match self.kind {
            ClassificationKind::Accuracy => self.accuracy(),
            ClassificationKind::ClassificationError => 1.0 - self.accuracy(),
            ClassificationKind::Kappa => self.kappa(),
        }
    }

    fn micro_variance(&self) -> f64 {
        match self.kind {
            ClassificationKind::Accuracy | ClassificationKind::ClassificationError => {
                let p = self.accuracy();
                p * (1.0 - p)
            }
            ClassificationKind::Kappa => f64::NAN,
        }
    }

    fn macro_stats(&self) -> &MacroAverage {
        &self.macro_stats
    }

    fn macro_stats_mut(&mut self) -> &mut MacroAverage {
        &mut self.macro_stats
    }

    fn merge_counts(&mut self, other: &dyn Averagable) -> Result<()> {
        let other: &ClassificationCriterion = same_kind(self.name(), other)?;
        for (cell, w) in &other.matrix {
            *self.matrix.entry(cell.clone()).or_insert(0.0) += w;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PerformanceCriterion for ClassificationCriterion {
    fn fitness(&self) -> f64 {
        match self.kind {
            ClassificationKind::ClassificationError => -self.average(),
            _ => self.average(),
        }
    }
}
