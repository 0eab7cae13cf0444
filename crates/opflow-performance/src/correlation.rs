//! Correlation between label and prediction.

use std::any::Any;

use opflow_types::Result;

use crate::averagable::{same_kind, Averagable, MacroAverage, PerformanceCriterion};

// ---------------------------------------------------------------------------
// CorrelationCriterion: Pearson correlation from running sums
// ---------------------------------------------------------------------------

/// Pearson correlation (or its square) between label and prediction.
#[derive(Debug, Clone)]
pub struct CorrelationCriterion {
    squared: bool,
    n: f64,
    sum_x: f64,
    sum_y: f64,
    sum_xy: f64,
    sum_xx: f64,
    sum_yy: f64,
    macro_stats: MacroAverage,
}

impl CorrelationCriterion {
    pub fn new() -> Self {
        Self::with_squared(false)
    }

    pub fn squared() -> Self {
        Self::with_squared(true)
    }

    fn with_squared(squared: bool) -> Self {
        Self {
            squared,
            n: 0.0,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xy: 0.0,
            sum_xx: 0.0,
            sum_yy: 0.0,
            macro_stats: MacroAverage::default(),
        }
    }

    pub fn count_example(&mut self, label: f64, predicted: f64) {
        self.n += 1.0;
        self.sum_x += label;
        self.sum_y += predicted;
        self.sum_xy += label * predicted;
        self.sum_xx += label * label;
        self.sum_yy += predicted * predicted;
    }

    fn correlation(&self) -> f64 {
        let n = self.n;
        let cov = n * self.sum_xy - self.sum_x * self.sum_y;
        let var_x = n * self.sum_xx - self.sum_x * self.sum_x;
        let var_y = n * self.sum_yy - self.sum_y * self.sum_y;
        let denom = (var_x * var_y).sqrt();
        if n < 2.0 || denom == 0.0 {
            f64::NAN
        } else {
            cov / denom
        }
    }
}

impl Default for CorrelationCriterion {
    fn default() -> Self {
        Self::new()
    }
}

impl Averagable for CorrelationCriterion {
    fn name(&self) -> &str {
        if self.squared {
            "squared_correlation"
        } else {
            "correlation"
        }
    }

    fn description(&self) -> &str {
        if self.squared {
            "Squared Pearson correlation between label and prediction"
        } else {
            "Pearson correlation between label and prediction"
        }
    }

    fn example_count(&self) -> f64 {
        self.n
    }

    fn micro_average(&self) -> f64 {
        let r = self.correlation();
        if self.squared {
            r * r
        } else {
            r
        }
    }

    fn micro_variance(&self) -> f64 {
        f64::NAN
    }

    fn macro_stats(&self) -> &MacroAverage {
        &self.macro_stats
    }

    fn macro_stats_mut(&mut self) -> &mut MacroAverage {
        &mut self.macro_stats
    }

    fn merge_counts(&mut self, other: &dyn Averagable) -> Result<()> {
        let other: &CorrelationCriterion = same_kind(self.name(), other)?;
        self.n += other.n;
        self.sum_x += other.sum_x;
        self.sum_y += other.sum_y;
        self.sum_xy += other.sum_xy;
        self.sum_xx += other.sum_xx;
        self.sum_yy += other.sum_yy;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PerformanceCriterion for CorrelationCriterion {
    fn fitness(&self) -> f64 {
        self.average()
    }
}

// ---------------------------------------------------------------------------
// RankCorrelation: Spearman's rho
// ---------------------------------------------------------------------------

/// Spearman rank correlation between label and prediction.
///
/// Ranking needs every pair of the evaluated unit, which a merge does not
/// have. Merging therefore adds up per-unit coefficients and unit counts:
/// after a merge the micro average is the mean of the units' coefficients,
/// not the coefficient of the pooled data. This approximation is accepted.
#[derive(Debug, Clone, Default)]
pub struct RankCorrelation {
    pairs: Vec<(f64, f64)>,
    merged_rho: f64,
    merged_units: u64,
    merged_examples: f64,
    macro_stats: MacroAverage,
}

impl RankCorrelation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_example(&mut self, label: f64, predicted: f64) {
        self.pairs.push((label, predicted));
    }

    fn own_rho(&self) -> Option<f64> {
        if self.pairs.len() < 2 {
            return None;
        }
        let xs: Vec<f64> = self.pairs.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = self.pairs.iter().map(|p| p.1).collect();
        let mut pearson = CorrelationCriterion::new();
        for (x, y) in ranks(&xs).into_iter().zip(ranks(&ys)) {
            pearson.count_example(x, y);
        }
        Some(pearson.correlation())
    }

    /// Sum of unit coefficients and number of units, this unit included.
    fn rho_total(&self) -> (f64, u64) {
        match self.own_rho() {
            Some(rho) => (self.merged_rho + rho, self.merged_units + 1),
            None => (self.merged_rho, self.merged_units),
        }
    }
}

/// Ranks starting at 1; ties share their average rank.
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut out = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            out[idx] = rank;
        }
        i = j + 1;
    }
    out
}

impl Averagable for RankCorrelation {
    fn name(&self) -> &str {
        "spearman_rho"
    }

    fn description(&self) -> &str {
        "Spearman rank correlation between label and prediction"
    }

    fn example_count(&self) -> f64 {
        self.pairs.len() as f64 + self.merged_examples
    }

    fn micro_average(&self) -> f64 {
        let (sum, units) = self.rho_total();
        if units == 0 {
            f64::NAN
        } else {
            sum / units as f64
        }
    }

    fn micro_variance(&self) -> f64 {
        f64::NAN
    }

    fn macro_stats(&self) -> &MacroAverage {
        &self.macro_stats
    }

    fn macro_stats_mut(&mut self) -> &mut MacroAverage {
        &mut self.macro_stats
    }

    fn merge_counts(&mut self, other: &dyn Averagable) -> Result<()> {
        let other: &RankCorrelation = same_kind(self.name(), other)?;
        let (rho, units) = other.rho_total();
        self.merged_rho += rho;
        self.merged_units += units;
        self.merged_examples += other.example_count();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PerformanceCriterion for RankCorrelation {
    fn fitness(&self) -> f64 {
        self.average()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_linear_correlation() {
        let mut c = CorrelationCriterion::new();
        for x in [1.0, 2.0, 3.0, 4.0] {
            c.count_example(x, 2.0 * x + 1.0);
        }
        assert!((c.micro_average() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn squared_correlation_of_inverse() {
        let mut c = CorrelationCriterion::squared();
        for x in [1.0, 2.0, 3.0] {
            c.count_example(x, -x);
        }
        assert!((c.micro_average() - 1.0).abs() < 1e-12);
        assert_eq!(c.name(), "squared_correlation");
    }

    #[test]
    fn correlation_merge_matches_pooled() {
        let data = [(1.0, 1.5), (2.0, 1.0), (3.0, 3.5), (4.0, 3.0)];
        let mut a = CorrelationCriterion::new();
        let mut b = CorrelationCriterion::new();
        let mut pooled = CorrelationCriterion::new();
        for (i, (x, y)) in data.iter().enumerate() {
            if i < 2 {
                a.count_example(*x, *y);
            } else {
                b.count_example(*x, *y);
            }
            pooled.count_example(*x, *y);
        }
        a.merge(&b).unwrap();
        assert!((a.micro_average() - pooled.micro_average()).abs() < 1e-12);
        assert_eq!(a.example_count(), 4.0);
    }

    #[test]
    fn ranks_average_ties() {
        assert_eq!(ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn spearman_monotonic_is_one() {
        let mut c = RankCorrelation::new();
        for x in [1.0, 2.0, 3.0, 4.0] {
            c.count_example(x, x * x * x);
        }
        assert!((c.micro_average() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn spearman_merge_averages_unit_coefficients() {
        let mut up = RankCorrelation::new();
        let mut down = RankCorrelation::new();
        for x in [1.0, 2.0, 3.0] {
            up.count_example(x, x);
            down.count_example(x, -x);
        }
        up.merge(&down).unwrap();
        // Mean of +1 and -1, not the coefficient of the pooled pairs.
        assert!(up.micro_average().abs() < 1e-12);
        assert_eq!(up.example_count(), 6.0);
    }
}
