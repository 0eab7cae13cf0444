//! What an operator behaviour sees while it runs.

use std::path::PathBuf;

use opflow_types::{Artifact, EngineError, IoClass, IoContainer, Result};

use crate::context::ProcessContext;
use crate::control::BreakpointPosition;
use crate::description::ConsumePolicy;
use crate::events::ProcessEvent;
use crate::macros::MacroScope;
use crate::operator::Operator;
use crate::parameters::{parse_bool, ParameterKind, ParameterValue};

// ---------------------------------------------------------------------------
// ApplyContext
// ---------------------------------------------------------------------------

/// The operator being applied, its process, and the container it works on.
pub struct ApplyContext<'a> {
    operator: &'a Operator,
    process: &'a ProcessContext,
    input: IoContainer,
}

impl<'a> ApplyContext<'a> {
    pub fn new(operator: &'a Operator, process: &'a ProcessContext, input: IoContainer) -> Self {
        Self {
            operator,
            process,
            input,
        }
    }

    pub fn operator(&self) -> &'a Operator {
        self.operator
    }

    pub fn process(&self) -> &'a ProcessContext {
        self.process
    }

    pub fn input(&self) -> &IoContainer {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut IoContainer {
        &mut self.input
    }

    /// What is left of the input once the behaviour is done.
    pub fn into_input(self) -> IoContainer {
        self.input
    }

    /// Take the whole input container, leaving an empty one behind.
    pub fn take_all_input(&mut self) -> IoContainer {
        std::mem::take(&mut self.input)
    }

    pub fn has_input(&self, class: &IoClass) -> bool {
        self.input.contains(class)
    }

    /// Look at an input without consuming it.
    pub fn peek_input(&self, class: &IoClass, occurrence: usize) -> Result<Artifact> {
        self.input
            .get(class, occurrence)
            .map_err(|e| e.with_operator(self.operator.name()))
    }

    /// Read the first input of `class`, consuming it according to the
    /// declared port's policy. Undeclared classes are consumed.
    pub fn get_input(&mut self, class: &IoClass) -> Result<Artifact> {
        self.get_input_occurrence(class, 0)
    }

    pub fn get_input_occurrence(&mut self, class: &IoClass, occurrence: usize) -> Result<Artifact> {
        if self.keeps(class)? {
            self.peek_input(class, occurrence)
        } else {
            self.take_input(class, occurrence)
        }
    }

    /// Remove an input regardless of the declared policy.
    pub fn take_input(&mut self, class: &IoClass, occurrence: usize) -> Result<Artifact> {
        self.input
            .take(class, occurrence)
            .map_err(|e| e.with_operator(self.operator.name()))
    }

    /// Remove every input of `class`.
    pub fn take_all(&mut self, class: &IoClass) -> Vec<Artifact> {
        self.input.remove_all(class)
    }

    fn keeps(&self, class: &IoClass) -> Result<bool> {
        let Some(port) = self.operator.description().input_port(class) else {
            return Ok(false);
        };
        match port.policy {
            ConsumePolicy::Keep => Ok(true),
            ConsumePolicy::Consume => Ok(false),
            ConsumePolicy::Parameter { default_keep } => {
                let key = port.keep_parameter_key();
                let params = self.parameters();
                if params.is_declared(&key) || params.is_set(&key) {
                    params.get_bool(&key)
                } else {
                    Ok(default_keep)
                }
            }
        }
    }

    pub fn parameters(&self) -> ParameterResolver<'a> {
        ParameterResolver::new(self.operator, self.process)
    }

    pub fn check_for_stop(&self) -> Result<()> {
        self.process.control().check_stop(self.operator.name())
    }

    /// Loop checkpoint for operators that iterate: checks for a stop request,
    /// records the loop time, and pauses at a within-loop breakpoint showing
    /// `snapshot`.
    pub async fn in_apply_loop(&self, snapshot: &IoContainer) -> Result<()> {
        self.check_for_stop()?;
        self.operator.stats().mark_loop();
        if self.operator.breakpoints().is_set(BreakpointPosition::Within) {
            self.process
                .control()
                .suspend(
                    self.operator.name(),
                    BreakpointPosition::Within,
                    snapshot,
                    self.process.events(),
                )
                .await?;
        }
        Ok(())
    }

    pub fn children(&self) -> &'a [Operator] {
        self.operator.children()
    }

    /// Run all children in order on `input`.
    pub async fn run_children(&self, input: IoContainer) -> Result<IoContainer> {
        crate::chain::run_children(self.operator.children(), input, self.process).await
    }

    pub fn define_macro(&self, name: &str, value: &str) {
        tracing::debug!(operator = %self.operator.name(), name = %name, value = %value, "Defining macro");
        self.process.macros().define(name, value);
        self.process.emit(ProcessEvent::MacroDefined {
            operator: self.operator.name().to_string(),
            name: name.to_string(),
            value: value.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// ParameterResolver
// ---------------------------------------------------------------------------

/// Typed, macro-resolved access to one operator's parameters.
pub struct ParameterResolver<'a> {
    operator: &'a Operator,
    process: &'a ProcessContext,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(operator: &'a Operator, process: &'a ProcessContext) -> Self {
        Self { operator, process }
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.operator.parameters().is_set(key)
    }

    pub fn is_declared(&self, key: &str) -> bool {
        self.operator.description().parameter_type(key).is_some()
    }

    /// Apply user macros, then system placeholders.
    pub fn resolve(&self, text: &str) -> String {
        let scope = MacroScope {
            name: self.operator.name(),
            type_name: self.operator.type_name(),
            apply_count: self.operator.apply_count(),
            values: self.process.values(),
            timestamp_format: &self.process.config().timestamp_format,
        };
        self.process.macros().resolve(text, &scope)
    }

    fn raw(&self, key: &str) -> Option<ParameterValue> {
        self.operator.parameters().get(key).cloned().or_else(|| {
            self.operator
                .description()
                .parameter_type(key)
                .and_then(|ty| ty.default.clone())
        })
    }

    /// The resolved value; absent values without a default are an error.
    pub fn get(&self, key: &str) -> Result<ParameterValue> {
        self.get_optional(key)
            .ok_or_else(|| EngineError::UndefinedParameter {
                operator: self.operator.name().to_string(),
                key: key.to_string(),
            })
    }

    pub fn get_optional(&self, key: &str) -> Option<ParameterValue> {
        self.raw(key).map(|value| value.map_text(&|s| self.resolve(s)))
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        let value = self.get(key)?;
        self.text(key, value)
    }

    pub fn get_optional_string(&self, key: &str) -> Result<Option<String>> {
        self.get_optional(key).map(|v| self.text(key, v)).transpose()
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        let text = self.get_string(key)?;
        parse_bool(&text).map_err(|message| self.invalid(key, &text, message))
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        let text = self.get_string(key)?;
        let value: i64 = text
            .trim()
            .parse()
            .map_err(|_| self.invalid(key, &text, "expected an integer"))?;
        if let Some(ParameterKind::Integer { min, max }) = self.kind(key) {
            if value < *min || value > *max {
                return Err(self.invalid(key, &text, format!("must be between {min} and {max}")));
            }
        }
        Ok(value)
    }

    pub fn get_real(&self, key: &str) -> Result<f64> {
        let text = self.get_string(key)?;
        let value: f64 = text
            .trim()
            .parse()
            .map_err(|_| self.invalid(key, &text, "expected a real number"))?;
        if let Some(ParameterKind::Real { min, max }) = self.kind(key) {
            if value < *min || value > *max {
                return Err(self.invalid(key, &text, format!("must be between {min} and {max}")));
            }
        }
        Ok(value)
    }

    pub fn get_category(&self, key: &str) -> Result<String> {
        let text = self.get_string(key)?;
        if let Some(ParameterKind::Category(values)) = self.kind(key) {
            if !values.contains(&text) {
                return Err(self.invalid(key, &text, format!("must be one of {}", values.join(", "))));
            }
        }
        Ok(text)
    }

    /// Index of the category value; numeric values are taken as indices.
    pub fn get_category_index(&self, key: &str) -> Result<usize> {
        let text = self.get_string(key)?;
        let Some(ParameterKind::Category(values)) = self.kind(key) else {
            return Err(self.invalid(key, &text, "not a category parameter"));
        };
        if let Some(index) = values.iter().position(|v| *v == text) {
            return Ok(index);
        }
        match text.trim().parse::<usize>() {
            Ok(index) if index < values.len() => Ok(index),
            _ => Err(self.invalid(key, &text, format!("must be one of {}", values.join(", ")))),
        }
    }

    pub fn get_file(&self, key: &str) -> Result<PathBuf> {
        self.get_string(key).map(PathBuf::from)
    }

    pub fn get_list(&self, key: &str) -> Result<Vec<(String, ParameterValue)>> {
        match self.get(key)? {
            ParameterValue::List(items) => Ok(items),
            ParameterValue::Text(text) if text.trim().is_empty() => Ok(Vec::new()),
            ParameterValue::Text(text) => {
                Err(self.invalid(key, &text, "expected a list of key/value pairs"))
            }
        }
    }

    fn kind(&self, key: &str) -> Option<&'a ParameterKind> {
        self.operator
            .description()
            .parameter_type(key)
            .map(|ty| &ty.kind)
    }

    fn text(&self, key: &str, value: ParameterValue) -> Result<String> {
        match value {
            ParameterValue::Text(text) => Ok(text),
            list @ ParameterValue::List(_) => {
                Err(self.invalid(key, &list.display(), "expected a single value, found a list"))
            }
        }
    }

    fn invalid(&self, key: &str, value: &str, message: impl Into<String>) -> EngineError {
        EngineError::InvalidParameter {
            operator: self.operator.name().to_string(),
            key: key.to_string(),
            value: value.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::Arc;

    use async_trait::async_trait;
    use opflow_types::IoObject;

    use crate::description::OperatorDescription;
    use crate::operator::OperatorBehavior;
    use crate::parameters::ParameterType;

    const DATA: IoClass = IoClass::new("ExampleSet", &IoClass::ANY);

    #[derive(Debug)]
    struct Data;

    impl IoObject for Data {
        fn io_class(&self) -> IoClass {
            DATA
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Nothing;

    #[async_trait]
    impl OperatorBehavior for Nothing {
        async fn apply(&self, _ctx: &mut ApplyContext<'_>) -> Result<Vec<Artifact>> {
            Ok(Vec::new())
        }

        fn clone_behavior(&self) -> Box<dyn OperatorBehavior> {
            Box::new(Nothing)
        }
    }

    fn operator() -> Operator {
        let desc = OperatorDescription::operator("Reader")
            .optional_keep_input(DATA, false)
            .parameter(ParameterType::integer("iterations", "", 1, 10, Some(3)))
            .parameter(ParameterType::real("ratio", "", 0.0, 1.0, None))
            .parameter(ParameterType::category("mode", "", &["fast", "slow"], 0))
            .parameter(ParameterType::string("label", "", None))
            .parameter(ParameterType::string("note", "", None).optional());
        Operator::new("Reader", Arc::new(desc), Box::new(Nothing))
    }

    #[test]
    fn defaults_and_set_values() {
        let process = ProcessContext::default();
        let mut op = operator();
        op.set_parameter("ratio", "0.25");
        let params = ParameterResolver::new(&op, &process);
        assert_eq!(params.get_int("iterations").unwrap(), 3);
        assert_eq!(params.get_real("ratio").unwrap(), 0.25);
        assert_eq!(params.get_category("mode").unwrap(), "fast");
        assert_eq!(params.get_category_index("mode").unwrap(), 0);
    }

    #[test]
    fn undefined_parameter_names_operator_and_key() {
        let process = ProcessContext::default();
        let op = operator();
        let params = ParameterResolver::new(&op, &process);
        match params.get_string("label").unwrap_err() {
            EngineError::UndefinedParameter { operator, key } => {
                assert_eq!(operator, "Reader");
                assert_eq!(key, "label");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(params.get_optional_string("note").unwrap(), None);
    }

    #[test]
    fn out_of_range_is_invalid() {
        let process = ProcessContext::default();
        let op = operator().with_parameter("iterations", "11");
        let params = ParameterResolver::new(&op, &process);
        assert!(matches!(
            params.get_int("iterations").unwrap_err(),
            EngineError::InvalidParameter { .. }
        ));
    }

    #[test]
    fn macros_are_resolved_before_parsing() {
        let process = ProcessContext::default();
        process.macros().define("count", "7");
        let op = operator()
            .with_parameter("iterations", "%{count}")
            .with_parameter("label", "%{n}-%{missing}");
        let params = ParameterResolver::new(&op, &process);
        assert_eq!(params.get_int("iterations").unwrap(), 7);
        assert_eq!(params.get_string("label").unwrap(), "Reader-%{missing}");
    }

    #[test]
    fn keep_parameter_decides_consumption() {
        let process = ProcessContext::default();
        let input = IoContainer::new(vec![Artifact::new(Data)]);

        let op = operator();
        let mut ctx = ApplyContext::new(&op, &process, input.clone());
        ctx.get_input(&DATA).unwrap();
        assert!(ctx.input().is_empty());

        let op = operator().with_parameter("keep_example_set", "true");
        let mut ctx = ApplyContext::new(&op, &process, input);
        ctx.get_input(&DATA).unwrap();
        assert_eq!(ctx.input().len(), 1);
    }

    #[test]
    fn missing_input_is_attributed() {
        let process = ProcessContext::default();
        let op = operator();
        let mut ctx = ApplyContext::new(&op, &process, IoContainer::empty());
        let err = ctx.get_input(&DATA).unwrap_err();
        assert_eq!(err.operator(), Some("Reader"));
    }
}
