//! Plain operator chains.

use async_trait::async_trait;

use opflow_types::{Artifact, IoContainer, Result};

use crate::apply::ApplyContext;
use crate::context::ProcessContext;
use crate::description::{InnerOperatorCondition, OperatorDescription};
use crate::operator::{Operator, OperatorBehavior};

/// Run `children` in order, each on the previous one's output.
///
/// Disabled children pass their input through unchanged.
pub async fn run_children(
    children: &[Operator],
    input: IoContainer,
    process: &ProcessContext,
) -> Result<IoContainer> {
    let mut container = input;
    for child in children {
        container = child.run(container, process).await?;
    }
    Ok(container)
}

/// `OperatorChain`: applies its inner operators one after the other.
#[derive(Debug, Default, Clone)]
pub struct SimpleChain;

impl SimpleChain {
    pub fn description() -> OperatorDescription {
        OperatorDescription::chain(
            "OperatorChain",
            0,
            None,
            InnerOperatorCondition::Chain {
                required: Vec::new(),
            },
        )
        .group("meta")
        .summary("Applies all inner operators in sequence.")
    }
}

#[async_trait]
impl OperatorBehavior for SimpleChain {
    async fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<Vec<Artifact>> {
        let input = ctx.take_all_input();
        let output = ctx.run_children(input).await?;
        Ok(output.into_vec())
    }

    fn clone_behavior(&self) -> Box<dyn OperatorBehavior> {
        Box::new(self.clone())
    }
}
