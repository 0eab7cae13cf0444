//! Ordered collection of named performance criteria.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use opflow_types::{EngineError, IoClass, IoObject, Result};

use crate::averagable::{Averagable, PerformanceCriterion};

/// Decides which of two performance vectors is better.
pub trait PerformanceComparator: fmt::Debug + Send + Sync {
    /// `Ordering::Greater` if `a` is better than `b`.
    fn compare(&self, a: &PerformanceVector, b: &PerformanceVector) -> Ordering;
}

/// Compares vectors by the fitness of their main criterion.
#[derive(Debug, Default, Clone, Copy)]
pub struct MainCriterionComparator;

impl PerformanceComparator for MainCriterionComparator {
    fn compare(&self, a: &PerformanceVector, b: &PerformanceVector) -> Ordering {
        a.fitness().total_cmp(&b.fitness())
    }
}

/// Serializable view of one criterion.
#[derive(Debug, Clone, Serialize)]
pub struct CriterionSummary {
    pub name: String,
    pub average: f64,
    pub standard_deviation: f64,
    pub micro_average: f64,
    pub runs: u64,
    pub examples: f64,
    pub fitness: f64,
}

/// Named criteria in insertion order plus a main criterion and a comparator.
#[derive(Debug, Clone)]
pub struct PerformanceVector {
    criteria: Vec<Box<dyn PerformanceCriterion>>,
    main: Option<String>,
    comparator: Arc<dyn PerformanceComparator>,
}

impl Default for PerformanceVector {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceVector {
    pub fn new() -> Self {
        Self {
            criteria: Vec::new(),
            main: None,
            comparator: Arc::new(MainCriterionComparator),
        }
    }

    /// Add a criterion. A criterion with the same name is replaced in place.
    pub fn add_criterion(&mut self, criterion: impl PerformanceCriterion + 'static) {
        self.add_boxed(Box::new(criterion));
    }

    pub fn add_boxed(&mut self, criterion: Box<dyn PerformanceCriterion>) {
        match self.criteria.iter().position(|c| c.name() == criterion.name()) {
            Some(i) => {
                tracing::warn!(criterion = %criterion.name(), "Performance criterion already present, replacing it");
                self.criteria[i] = criterion;
            }
            None => self.criteria.push(criterion),
        }
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn criteria(&self) -> impl Iterator<Item = &dyn PerformanceCriterion> {
        self.criteria.iter().map(|c| c.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.criteria.iter().map(|c| c.name()).collect()
    }

    pub fn criterion(&self, name: &str) -> Option<&dyn PerformanceCriterion> {
        self.criteria
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    pub fn criterion_mut(&mut self, name: &str) -> Option<&mut Box<dyn PerformanceCriterion>> {
        self.criteria.iter_mut().find(|c| c.name() == name)
    }

    /// Designate the main criterion. The name must belong to a criterion in
    /// the vector.
    pub fn set_main_criterion(&mut self, name: &str) -> Result<()> {
        if self.criterion(name).is_none() {
            return Err(EngineError::Other(format!(
                "No performance criterion named '{name}'"
            )));
        }
        self.main = Some(name.to_string());
        Ok(())
    }

    /// The designated main criterion, or the first one added.
    pub fn main_criterion(&self) -> Option<&dyn PerformanceCriterion> {
        match &self.main {
            Some(name) => self.criterion(name),
            None => self.criteria.first().map(|c| c.as_ref()),
        }
    }

    /// Fitness of the main criterion; `NaN` for an empty vector.
    pub fn fitness(&self) -> f64 {
        self.main_criterion().map_or(f64::NAN, |c| c.fitness())
    }

    pub fn set_comparator(&mut self, comparator: Arc<dyn PerformanceComparator>) {
        self.comparator = comparator;
    }

    /// Compare with `other` using this vector's comparator.
    pub fn compare(&self, other: &PerformanceVector) -> Ordering {
        self.comparator.compare(self, other)
    }

    /// Merge `other` criterion by criterion. Criteria only present in
    /// `other` are appended.
    /// On failure `self` is left unchanged.
    pub fn merge(&mut self, other: &PerformanceVector) -> Result<()> {
        let mut merged = self.criteria.clone();
        for theirs in &other.criteria {
            match merged.iter_mut().find(|c| c.name() == theirs.name()) {
                Some(mine) => mine.merge(theirs.as_averagable())?,
                None => merged.push(theirs.clone()),
            }
        }
        self.criteria = merged;
        if self.main.is_none() {
            self.main.clone_from(&other.main);
        }
        Ok(())
    }

    pub fn summary(&self) -> Vec<CriterionSummary> {
        self.criteria
            .iter()
            .map(|c| CriterionSummary {
                name: c.name().to_string(),
                average: c.average(),
                standard_deviation: c.standard_deviation(),
                micro_average: c.micro_average(),
                runs: c.run_count(),
                examples: c.example_count(),
                fitness: c.fitness(),
            })
            .collect()
    }
}

impl fmt::Display for PerformanceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PerformanceVector:")?;
        for c in &self.criteria {
            writeln!(f, "  {}", c.render())?;
        }
        Ok(())
    }
}

impl IoObject for PerformanceVector {
    fn io_class(&self) -> IoClass {
        IoClass::PERFORMANCE_VECTOR
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "main": self.main_criterion().map(|c| c.name().to_string()),
            "criteria": self.summary(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::averagable::MacroAverage;
    use crate::classification::{ClassificationCriterion, ClassificationKind};
    use crate::estimated::{EstimatedCriterion, ErrorKind};

    fn accuracy(correct: usize, wrong: usize) -> ClassificationCriterion {
        let mut c = ClassificationCriterion::new(ClassificationKind::Accuracy);
        for _ in 0..correct {
            c.count_example("a", "a");
        }
        for _ in 0..wrong {
            c.count_example("a", "b");
        }
        c
    }

    fn error(pairs: &[(f64, f64)]) -> EstimatedCriterion {
        let mut c = EstimatedCriterion::new(ErrorKind::AbsoluteError);
        for (l, p) in pairs {
            c.count_example(*l, *p);
        }
        c
    }

    #[test]
    fn main_criterion_defaults_to_first() {
        let mut v = PerformanceVector::new();
        assert!(v.main_criterion().is_none());
        assert!(v.fitness().is_nan());
        v.add_criterion(accuracy(3, 1));
        v.add_criterion(error(&[(1.0, 0.0)]));
        assert_eq!(v.main_criterion().unwrap().name(), "accuracy");
        v.set_main_criterion("absolute_error").unwrap();
        assert_eq!(v.main_criterion().unwrap().name(), "absolute_error");
        assert!(v.set_main_criterion("nope").is_err());
    }

    #[test]
    fn adding_same_name_replaces_in_place() {
        let mut v = PerformanceVector::new();
        v.add_criterion(accuracy(1, 1));
        v.add_criterion(error(&[(1.0, 0.0)]));
        v.add_criterion(accuracy(4, 0));
        assert_eq!(v.names(), vec!["accuracy", "absolute_error"]);
        assert_eq!(v.criterion("accuracy").unwrap().micro_average(), 1.0);
    }

    #[test]
    fn comparison_uses_main_fitness() {
        let mut better = PerformanceVector::new();
        better.add_criterion(error(&[(1.0, 1.0)]));
        let mut worse = PerformanceVector::new();
        worse.add_criterion(error(&[(1.0, 5.0)]));
        // Lower error means higher fitness.
        assert_eq!(better.compare(&worse), Ordering::Greater);
        assert_eq!(worse.compare(&better), Ordering::Less);
    }

    /// Named like accuracy but of a different kind.
    #[derive(Debug, Clone, Default)]
    struct Lookalike {
        stats: MacroAverage,
    }

    impl Averagable for Lookalike {
        fn name(&self) -> &str {
            "accuracy"
        }
        fn description(&self) -> &str {
            ""
        }
        fn example_count(&self) -> f64 {
            1.0
        }
        fn micro_average(&self) -> f64 {
            0.5
        }
        fn micro_variance(&self) -> f64 {
            0.0
        }
        fn macro_stats(&self) -> &MacroAverage {
            &self.stats
        }
        fn macro_stats_mut(&mut self) -> &mut MacroAverage {
            &mut self.stats
        }
        fn merge_counts(&mut self, _other: &dyn Averagable) -> Result<()> {
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl PerformanceCriterion for Lookalike {
        fn fitness(&self) -> f64 {
            self.micro_average()
        }
    }

    #[test]
    fn failed_merge_leaves_vector_unchanged() {
        let mut mine = PerformanceVector::new();
        mine.add_criterion(error(&[(1.0, 0.0)]));
        mine.add_criterion(accuracy(3, 1));
        let mut theirs = PerformanceVector::new();
        theirs.add_criterion(error(&[(5.0, 0.0)]));
        theirs.add_criterion(Lookalike::default());
        theirs.add_criterion(ClassificationCriterion::new(ClassificationKind::Kappa));

        let err = mine.merge(&theirs).unwrap_err();
        assert!(matches!(err, EngineError::IncompatibleCriteria { .. }));
        assert_eq!(mine.names(), vec!["absolute_error", "accuracy"]);
        let kept = mine.criterion("absolute_error").unwrap();
        assert_eq!(kept.run_count(), 1);
        assert_eq!(kept.example_count(), 1.0);
        assert_eq!(kept.micro_average(), 1.0);
    }

    #[derive(Debug)]
    struct Reversed;

    impl PerformanceComparator for Reversed {
        fn compare(&self, a: &PerformanceVector, b: &PerformanceVector) -> Ordering {
            b.fitness().total_cmp(&a.fitness())
        }
    }

    #[test]
    fn comparator_is_pluggable() {
        let mut a = PerformanceVector::new();
        a.add_criterion(accuracy(9, 1));
        let mut b = PerformanceVector::new();
        b.add_criterion(accuracy(1, 9));
        assert_eq!(a.compare(&b), Ordering::Greater);
        a.set_comparator(Arc::new(Reversed));
        assert_eq!(a.compare(&b), Ordering::Less);
    }

    #[test]
    fn merge_by_name_and_append_missing() {
        let mut a = PerformanceVector::new();
        a.add_criterion(accuracy(1, 1));
        let mut b = PerformanceVector::new();
        b.add_criterion(accuracy(2, 0));
        b.add_criterion(error(&[(0.0, 2.0)]));
        a.merge(&b).unwrap();
        assert_eq!(a.len(), 2);
        let acc = a.criterion("accuracy").unwrap();
        assert_eq!(acc.example_count(), 4.0);
        assert_eq!(acc.run_count(), 2);
        assert_eq!(acc.average(), 0.75);
    }

    #[test]
    fn merge_is_associative_on_raw_counts() {
        let parts = [
            [(1.0, 0.0), (2.0, 1.0)],
            [(5.0, 1.0), (0.0, 0.5)],
            [(3.0, 3.0), (4.0, 2.0)],
        ];
        let [a, b, c] = parts.map(|p| {
            let mut v = PerformanceVector::new();
            v.add_criterion(error(&p));
            v
        });

        let mut left = a.clone();
        left.merge(&b).unwrap();
        left.merge(&c).unwrap();

        let mut bc = b.clone();
        bc.merge(&c).unwrap();
        let mut right = a.clone();
        right.merge(&bc).unwrap();

        let l = left.criterion("absolute_error").unwrap();
        let r = right.criterion("absolute_error").unwrap();
        assert_eq!(l.example_count(), r.example_count());
        assert!((l.micro_average() - r.micro_average()).abs() < 1e-12);
        assert!((l.average() - r.average()).abs() < 1e-12);
        assert_eq!(l.run_count(), 3);
        assert_eq!(r.run_count(), 3);
    }

    #[test]
    fn json_summary_names_main() {
        let mut v = PerformanceVector::new();
        v.add_criterion(accuracy(1, 0));
        let json = v.to_json();
        assert_eq!(json["main"], "accuracy");
        assert_eq!(json["criteria"][0]["name"], "accuracy");
    }
}
