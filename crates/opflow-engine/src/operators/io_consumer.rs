use async_trait::async_trait;

use opflow_types::{Artifact, EngineError, Result};

use crate::apply::ApplyContext;
use crate::description::OperatorDescription;
use crate::operator::OperatorBehavior;
use crate::parameters::ParameterType;

pub const DELETION_TYPES: &[&str] = &["delete_one", "delete_all"];

/// `IOConsumer`: removes artifacts whose class (or an ancestor) is named by
/// `io_object`.
#[derive(Debug, Default, Clone)]
pub struct IoConsumer;

impl IoConsumer {
    pub fn description() -> OperatorDescription {
        OperatorDescription::operator("IOConsumer")
            .group("utility")
            .summary("Removes unused artifacts from the container.")
            .parameter(ParameterType::string(
                "io_object",
                "Class name of the artifacts to remove.",
                None,
            ))
            .parameter(ParameterType::category(
                "deletion_type",
                "Remove one occurrence or all of them.",
                DELETION_TYPES,
                0,
            ))
            .parameter(ParameterType::integer(
                "delete_one_index",
                "Which occurrence to remove (1 is the first).",
                1,
                i64::from(i32::MAX),
                Some(1),
            ))
    }
}

#[async_trait]
impl OperatorBehavior for IoConsumer {
    async fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<Vec<Artifact>> {
        let params = ctx.parameters();
        let class = params.get_string("io_object")?;
        let delete_all = params.get_category("deletion_type")? == "delete_all";
        let operator = ctx.operator().name().to_string();
        let matches = |a: &Artifact| a.io_class().is_assignable_to_name(&class);

        if delete_all {
            let removed = ctx.input_mut().remove_where(matches);
            tracing::debug!(operator = %operator, class = %class, removed = removed.len(), "Removed artifacts");
            return Ok(Vec::new());
        }

        let occurrence = (params.get_int("delete_one_index")? - 1).max(0) as usize;
        let position = ctx
            .input()
            .iter()
            .enumerate()
            .filter(|(_, a)| matches(*a))
            .nth(occurrence)
            .map(|(i, _)| i);
        match position {
            Some(index) => {
                ctx.input_mut().remove_at(index);
                tracing::debug!(operator = %operator, class = %class, occurrence, "Removed artifact");
                Ok(Vec::new())
            }
            None => Err(EngineError::MissingInput {
                class,
                occurrence,
                operator: Some(operator),
            }),
        }
    }

    fn clone_behavior(&self) -> Box<dyn OperatorBehavior> {
        Box::new(self.clone())
    }
}
