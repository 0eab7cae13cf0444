use async_trait::async_trait;

use opflow_performance::PerformanceVector;
use opflow_types::{Artifact, EngineError, IoClass, Result};

use crate::apply::ApplyContext;
use crate::description::OperatorDescription;
use crate::operator::OperatorBehavior;

/// `PerformanceAverager`: merges every performance vector in the container
/// into one.
#[derive(Debug, Default, Clone)]
pub struct PerformanceAverager;

impl PerformanceAverager {
    pub fn description() -> OperatorDescription {
        OperatorDescription::operator("PerformanceAverager")
            .group("evaluation")
            .summary("Averages all performance vectors into a single one.")
            .input(IoClass::PERFORMANCE_VECTOR)
            .output(IoClass::PERFORMANCE_VECTOR)
    }
}

/// Merge the performance vectors held by `artifacts`, in order.
///
/// Returns `None` when `artifacts` is empty.
pub fn merge_performance(artifacts: &[Artifact]) -> Result<Option<PerformanceVector>> {
    let mut merged: Option<PerformanceVector> = None;
    for artifact in artifacts {
        let vector = artifact.downcast_ref::<PerformanceVector>().ok_or_else(|| {
            EngineError::Other(format!(
                "artifact of class {} is not a performance vector",
                artifact.io_class()
            ))
        })?;
        match merged.as_mut() {
            Some(acc) => acc.merge(vector)?,
            None => merged = Some(vector.clone()),
        }
    }
    Ok(merged)
}

#[async_trait]
impl OperatorBehavior for PerformanceAverager {
    async fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<Vec<Artifact>> {
        let first = ctx.take_input(&IoClass::PERFORMANCE_VECTOR, 0)?;
        let mut vectors = vec![first];
        vectors.extend(ctx.take_all(&IoClass::PERFORMANCE_VECTOR));
        tracing::debug!(operator = %ctx.operator().name(), vectors = vectors.len(), "Averaging performance vectors");

        Ok(merge_performance(&vectors)?
            .map(Artifact::new)
            .into_iter()
            .collect())
    }

    fn clone_behavior(&self) -> Box<dyn OperatorBehavior> {
        Box::new(self.clone())
    }
}
