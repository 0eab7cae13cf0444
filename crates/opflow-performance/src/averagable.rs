use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

use opflow_types::{EngineError, Result};

/// Statistics over whole runs: how many runs were folded in, and the sum and
/// squared sum of their averages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MacroAverage {
    pub count: u64,
    pub sum: f64,
    pub squared_sum: f64,
}

impl MacroAverage {
    pub fn single(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            squared_sum: value * value,
        }
    }

    pub fn combine(&self, other: &MacroAverage) -> Self {
        Self {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            squared_sum: self.squared_sum + other.squared_sum,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        let n = self.count as f64;
        let avg = self.sum / n;
        (self.squared_sum / n - avg * avg).max(0.0)
    }
}

/// An accumulator that can be averaged across runs.
///
/// Implementations keep raw statistics; `micro_*` values are computed from
/// them. [`merge`](Averagable::merge) folds another accumulator of the same
/// kind into this one and is associative and commutative on the raw
/// statistics.
pub trait Averagable: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Number (or total weight) of examples counted so far.
    fn example_count(&self) -> f64;

    fn micro_average(&self) -> f64;

    /// Variance over the counted examples; `NaN` if the criterion has none.
    fn micro_variance(&self) -> f64;

    fn macro_stats(&self) -> &MacroAverage;

    fn macro_stats_mut(&mut self) -> &mut MacroAverage;

    /// Add the raw statistics of `other`, which must be of the same kind.
    fn merge_counts(&mut self, other: &dyn Averagable) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    /// Average over merged runs, or the micro average if nothing was merged.
    fn average(&self) -> f64 {
        let stats = self.macro_stats();
        if stats.is_empty() {
            self.micro_average()
        } else {
            stats.average()
        }
    }

    fn variance(&self) -> f64 {
        let stats = self.macro_stats();
        if stats.is_empty() {
            self.micro_variance()
        } else {
            stats.variance()
        }
    }

    fn standard_deviation(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Runs folded in so far, counting this one.
    fn run_count(&self) -> u64 {
        self.macro_stats().count.max(1)
    }

    /// This criterion's contribution to a macro average: its merged runs, or
    /// itself as a single run.
    fn macro_or_single(&self) -> MacroAverage {
        let stats = *self.macro_stats();
        if stats.is_empty() {
            MacroAverage::single(self.micro_average())
        } else {
            stats
        }
    }

    /// Merge `other` into this accumulator.
    fn merge(&mut self, other: &dyn Averagable) -> Result<()> {
        if self.as_any().type_id() != other.as_any().type_id() || self.name() != other.name() {
            return Err(EngineError::IncompatibleCriteria {
                expected: self.name().to_string(),
                found: other.name().to_string(),
            });
        }
        let combined = self.macro_or_single().combine(&other.macro_or_single());
        self.merge_counts(other)?;
        *self.macro_stats_mut() = combined;
        Ok(())
    }

    fn render(&self) -> String {
        if self.macro_stats().count > 1 {
            format!(
                "{}: {:.4} +/- {:.4} (micro average: {:.4})",
                self.name(),
                self.average(),
                self.standard_deviation(),
                self.micro_average()
            )
        } else {
            format!("{}: {:.4}", self.name(), self.micro_average())
        }
    }
}

/// Upcast helper, blanket-implemented for every [`Averagable`].
pub trait AsAveragable {
    fn as_averagable(&self) -> &dyn Averagable;
}

impl<T: Averagable> AsAveragable for T {
    fn as_averagable(&self) -> &dyn Averagable {
        self
    }
}

/// Boxed clone, blanket-implemented for every cloneable criterion.
pub trait CloneCriterion {
    fn clone_box(&self) -> Box<dyn PerformanceCriterion>;
}

impl<T: PerformanceCriterion + Clone + 'static> CloneCriterion for T {
    fn clone_box(&self) -> Box<dyn PerformanceCriterion> {
        Box::new(self.clone())
    }
}

/// An averagable that can rank runs.
pub trait PerformanceCriterion: Averagable + AsAveragable + CloneCriterion {
    /// Monotonic transform of the average where higher is always better.
    fn fitness(&self) -> f64;
}

impl Clone for Box<dyn PerformanceCriterion> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Downcast `other` to the concrete type of a merge target.
pub(crate) fn same_kind<'a, T: 'static>(target: &str, other: &'a dyn Averagable) -> Result<&'a T> {
    other
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| EngineError::IncompatibleCriteria {
            expected: target.to_string(),
            found: other.name().to_string(),
        })
}

/// Mean and variance of per-example values from their weighted sums.
pub(crate) fn moments(sum: f64, squared_sum: f64, weight: f64) -> (f64, f64) {
    if weight <= 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = sum / weight;
    (mean, (squared_sum / weight - mean * mean).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_average_combines() {
        let a = MacroAverage::single(1.0);
        let b = MacroAverage::single(3.0);
        let c = a.combine(&b);
        assert_eq!(c.count, 2);
        assert_eq!(c.average(), 2.0);
        assert_eq!(c.variance(), 1.0);
    }

    #[test]
    fn empty_macro_average_is_nan() {
        let m = MacroAverage::default();
        assert!(m.average().is_nan());
        assert!(m.variance().is_nan());
    }

    #[test]
    fn moments_from_sums() {
        let (mean, var) = moments(6.0, 14.0, 3.0);
        assert_eq!(mean, 2.0);
        assert!((var - 2.0 / 3.0).abs() < 1e-12);
        assert!(moments(0.0, 0.0, 0.0).0.is_nan());
    }
}
