//! Performance aggregation for opflow.
//!
//! Criteria accumulate raw sufficient statistics (counts, sums, sums of
//! squares, confusion matrices) while an evaluation iterates over examples.
//! Criteria of the same kind merge counter-exactly, so averaging over
//! repeated runs (e.g. validation folds) never averages averages.
//!
//! - [`Averagable`]: the aggregation contract
//! - [`PerformanceCriterion`]: an averagable with a fitness
//! - [`PerformanceVector`]: ordered named criteria with a main criterion

pub mod averagable;
pub mod classification;
pub mod correlation;
pub mod estimated;
pub mod vector;

pub use averagable::{Averagable, AsAveragable, CloneCriterion, MacroAverage, PerformanceCriterion};
pub use classification::{ClassificationCriterion, ClassificationKind};
pub use correlation::{CorrelationCriterion, RankCorrelation};
pub use estimated::{EstimatedCriterion, ErrorKind};
pub use vector::{MainCriterionComparator, PerformanceComparator, PerformanceVector};
