use async_trait::async_trait;

use opflow_types::{Artifact, EngineError, Result};

use crate::apply::ApplyContext;
use crate::description::OperatorDescription;
use crate::operator::OperatorBehavior;
use crate::parameters::{ParameterKind, ParameterType, ParameterValue};

/// `MacroDefinition`: writes its `macros` list into the process macro table.
/// The input passes through untouched.
#[derive(Debug, Default, Clone)]
pub struct MacroDefinition;

impl MacroDefinition {
    pub fn description() -> OperatorDescription {
        OperatorDescription::operator("MacroDefinition")
            .group("utility")
            .summary("Defines user macros usable as %{name} in later parameters.")
            .parameter(ParameterType::list(
                "macros",
                "Macro names and their values.",
                ParameterKind::String,
            ))
    }
}

#[async_trait]
impl OperatorBehavior for MacroDefinition {
    async fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<Vec<Artifact>> {
        for (name, value) in ctx.parameters().get_list("macros")? {
            match value {
                ParameterValue::Text(text) => ctx.define_macro(&name, &text),
                list @ ParameterValue::List(_) => {
                    return Err(EngineError::InvalidParameter {
                        operator: ctx.operator().name().to_string(),
                        key: "macros".into(),
                        value: list.display(),
                        message: format!("macro '{name}' must have a single value"),
                    })
                }
            }
        }
        Ok(Vec::new())
    }

    fn clone_behavior(&self) -> Box<dyn OperatorBehavior> {
        Box::new(self.clone())
    }
}
