use async_trait::async_trait;

use opflow_performance::Averagable;
use opflow_types::{Artifact, IoClass, IoContainer, Result, UserError};

use crate::apply::ApplyContext;
use crate::description::{InnerOperatorCondition, OperatorDescription};
use crate::operator::OperatorBehavior;
use crate::operators::merge_performance;
use crate::parameters::ParameterType;
use crate::values::{OperatorValue, ValueCell};

/// `IteratingOperatorChain`: applies its inner operators `iterations` times
/// to the chain's input.
///
/// With `average_performances` set, the performance vectors delivered by
/// the iterations are merged and returned in front of the last iteration's
/// output. Iterations without a vector contribute nothing.
#[derive(Debug, Default)]
pub struct IteratingChain {
    iteration: ValueCell,
    performance: ValueCell,
}

impl IteratingChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description() -> OperatorDescription {
        OperatorDescription::chain(
            "IteratingOperatorChain",
            1,
            None,
            InnerOperatorCondition::Chain {
                required: Vec::new(),
            },
        )
        .group("meta")
        .summary("Applies the inner operators a fixed number of times.")
        .parameter(ParameterType::integer(
            "iterations",
            "Number of iterations.",
            1,
            i64::from(i32::MAX),
            Some(5),
        ))
        .parameter(ParameterType::boolean(
            "average_performances",
            "Merge the performance vectors of all iterations.",
            true,
        ))
    }
}

#[async_trait]
impl OperatorBehavior for IteratingChain {
    async fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<Vec<Artifact>> {
        let name = ctx.operator().name().to_string();
        if ctx.children().is_empty() {
            return Err(UserError::new(926).arg(&name).arg(1).with_operator(&name).into());
        }
        let params = ctx.parameters();
        let iterations = params.get_int("iterations")?;
        let average = params.get_bool("average_performances")?;

        let input = ctx.take_all_input();
        let mut performances = Vec::new();
        let mut last = IoContainer::empty();
        for i in 1..=iterations {
            ctx.in_apply_loop(&last).await?;
            self.iteration.set(i as f64);
            tracing::debug!(operator = %name, iteration = i, "Starting iteration");

            let mut output = ctx.run_children(input.clone()).await?;
            if average {
                performances.extend(output.remove_all(&IoClass::PERFORMANCE_VECTOR));
            }
            last = output;
        }

        if let Some(merged) = merge_performance(&performances)? {
            let value = merged.main_criterion().map_or(f64::NAN, |c| c.average());
            self.performance.set(value);
            tracing::info!(operator = %name, performance = value, runs = performances.len(), "Averaged performance");
            last.push_front([Artifact::new(merged)]);
        }
        Ok(last.into_vec())
    }

    fn values(&self) -> Vec<OperatorValue> {
        vec![
            OperatorValue::new(
                "iteration",
                "The number of the current iteration.",
                self.iteration.getter(),
            ),
            OperatorValue::new(
                "performance",
                "The main criterion of the averaged performance.",
                self.performance.getter(),
            ),
        ]
    }

    fn clone_behavior(&self) -> Box<dyn OperatorBehavior> {
        Box::new(Self::new())
    }
}
