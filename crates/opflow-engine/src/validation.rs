//! Static process validation: lint rules and diagnostics.
//!
//! Rules check child counts, the class flow through every chain, and
//! parameter settings across the whole tree. Problems are collected, never
//! thrown: call [`validate`] for the full report or [`validate_or_raise`] to
//! fail on the first `Error`-severity issue.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use opflow_types::{EngineError, IoClass, Result};

use crate::description::{ConsumePolicy, InnerOperatorCondition, InputPort, MergePolicy};
use crate::operator::Operator;
use crate::parameters::{parse_bool, ParameterValue};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub operator: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// All diagnostics of one validation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, root: &Operator) -> Vec<Diagnostic>;
}

fn diagnostic(
    rule: &dyn LintRule,
    severity: Severity,
    operator: &Operator,
    message: String,
    fix: Option<String>,
) -> Diagnostic {
    Diagnostic {
        rule: rule.name().into(),
        severity,
        message,
        operator: Some(operator.name().to_string()),
        fix,
    }
}

/// Enabled operators of the tree; disabled subtrees are skipped.
fn enabled_operators(root: &Operator) -> Vec<&Operator> {
    fn collect<'a>(op: &'a Operator, out: &mut Vec<&'a Operator>) {
        if !op.is_enabled() {
            return;
        }
        out.push(op);
        for child in op.children() {
            collect(child, out);
        }
    }
    let mut out = Vec::new();
    collect(root, &mut out);
    out
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct ChildCountRule;
impl LintRule for ChildCountRule {
    fn name(&self) -> &str { "child_count" }
    fn apply(&self, root: &Operator) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for op in enabled_operators(root) {
            let Some(chain) = &op.description().chain else {
                continue;
            };
            let n = op.children().len();
            if n < chain.min_children {
                diags.push(diagnostic(
                    self,
                    Severity::Error,
                    op,
                    format!(
                        "Operator '{}' needs at least {} inner operator(s) but has {}",
                        op.name(),
                        chain.min_children,
                        n
                    ),
                    Some("Add inner operators to the chain".into()),
                ));
            }
            if let Some(max) = chain.max_children {
                if n > max {
                    diags.push(diagnostic(
                        self,
                        Severity::Error,
                        op,
                        format!(
                            "Operator '{}' accepts at most {} inner operator(s) but has {}",
                            op.name(),
                            max,
                            n
                        ),
                        Some("Remove inner operators or wrap them in an OperatorChain".into()),
                    ));
                }
            }
        }
        diags
    }
}

/// Simulates the class flow through the tree, starting from `input`.
struct IoFlowRule {
    input: Vec<IoClass>,
}

impl LintRule for IoFlowRule {
    fn name(&self) -> &str { "io_flow" }
    fn apply(&self, root: &Operator) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        self.simulate(root, self.input.clone(), &mut diags);
        diags
    }
}

impl IoFlowRule {
    fn simulate(&self, op: &Operator, input: Vec<IoClass>, diags: &mut Vec<Diagnostic>) -> Vec<IoClass> {
        if !op.is_enabled() {
            return input;
        }
        let desc = op.description();

        let mut remaining = input.clone();
        for port in &desc.inputs {
            match remaining.iter().position(|c| c.is_assignable_to(&port.class)) {
                Some(index) => {
                    if consumes(op, port) {
                        remaining.remove(index);
                    }
                }
                None => diags.push(diagnostic(
                    self,
                    Severity::Error,
                    op,
                    format!(
                        "Operator '{}' needs input of class {} which is not delivered",
                        op.name(),
                        port.class
                    ),
                    Some(format!("Add an operator producing {} before '{}'", port.class, op.name())),
                )),
            }
        }

        let Some(chain) = &desc.chain else {
            return merge_classes(remaining, &desc.outputs, desc.merge_policy);
        };

        let produced = match &chain.condition {
            InnerOperatorCondition::Chain { required } => {
                let delivered = self.simulate_sequence(op.children(), remaining.clone(), diags);
                self.check_required(op, required, &delivered, diags);
                delivered
            }
            InnerOperatorCondition::Unconstrained => {
                self.simulate_sequence(op.children(), remaining.clone(), diags)
            }
            InnerOperatorCondition::Each { input, required } => {
                let mut last = input.clone();
                for child in op.children() {
                    last = self.simulate(child, input.clone(), diags);
                    self.check_required(child, required, &last, diags);
                }
                last
            }
        };
        let mut produced = produced;
        produced.extend(desc.outputs.iter().copied());
        merge_classes(remaining, &produced, desc.merge_policy)
    }

    fn simulate_sequence(
        &self,
        children: &[Operator],
        input: Vec<IoClass>,
        diags: &mut Vec<Diagnostic>,
    ) -> Vec<IoClass> {
        children
            .iter()
            .fold(input, |classes, child| self.simulate(child, classes, diags))
    }

    fn check_required(
        &self,
        op: &Operator,
        required: &[IoClass],
        delivered: &[IoClass],
        diags: &mut Vec<Diagnostic>,
    ) {
        for class in required {
            if !delivered.iter().any(|c| c.is_assignable_to(class)) {
                diags.push(diagnostic(
                    self,
                    Severity::Error,
                    op,
                    format!("Inner operators of '{}' must deliver {}", op.name(), class),
                    None,
                ));
            }
        }
    }
}

fn consumes(op: &Operator, port: &InputPort) -> bool {
    match port.policy {
        ConsumePolicy::Keep => false,
        ConsumePolicy::Consume => true,
        ConsumePolicy::Parameter { default_keep } => {
            let keep = op
                .parameters()
                .get(&port.keep_parameter_key())
                .and_then(ParameterValue::as_text)
                .and_then(|text| parse_bool(text).ok())
                .unwrap_or(default_keep);
            !keep
        }
    }
}

/// Class-level counterpart of the runtime output merge.
fn merge_classes(remaining: Vec<IoClass>, produced: &[IoClass], policy: MergePolicy) -> Vec<IoClass> {
    let is_plain_model = |c: &IoClass| {
        c.is_assignable_to(&IoClass::MODEL) && !c.is_assignable_to(&IoClass::CONTAINER_MODEL)
    };
    let has_models = produced.iter().any(is_plain_model);
    let mut result: Vec<IoClass> = produced.iter().copied().filter(|c| !is_plain_model(c)).collect();
    let siblings = result.len();
    if policy == MergePolicy::Prepend {
        result.extend(remaining);
    }
    if has_models && !result.iter().any(|c| c.is_assignable_to(&IoClass::CONTAINER_MODEL)) {
        result.insert(siblings, IoClass::CONTAINER_MODEL);
    }
    result
}

struct MissingParameterRule;
impl LintRule for MissingParameterRule {
    fn name(&self) -> &str { "missing_parameter" }
    fn apply(&self, root: &Operator) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for op in enabled_operators(root) {
            for ty in &op.description().parameters {
                if !ty.optional && ty.default.is_none() && !op.parameters().is_set(&ty.key) {
                    diags.push(diagnostic(
                        self,
                        Severity::Error,
                        op,
                        format!("Operator '{}': parameter '{}' must be set", op.name(), ty.key),
                        Some(format!("Set '{}' ({})", ty.key, ty.kind.name())),
                    ));
                }
            }
        }
        diags
    }
}

fn has_macro(value: &ParameterValue) -> bool {
    match value {
        ParameterValue::Text(text) => text.contains("%{"),
        ParameterValue::List(items) => items.iter().any(|(_, v)| has_macro(v)),
    }
}

struct ParameterValueRule;
impl LintRule for ParameterValueRule {
    fn name(&self) -> &str { "parameter_value" }
    fn apply(&self, root: &Operator) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for op in enabled_operators(root) {
            for (key, value) in op.parameters().iter() {
                let Some(ty) = op.description().parameter_type(key) else {
                    continue;
                };
                // Macro values are only known at run time.
                if has_macro(value) {
                    continue;
                }
                if let Err(message) = ty.kind.check(value) {
                    diags.push(diagnostic(
                        self,
                        Severity::Error,
                        op,
                        format!(
                            "Operator '{}': illegal value '{}' for parameter '{}': {}",
                            op.name(),
                            value.display(),
                            key,
                            message
                        ),
                        None,
                    ));
                }
            }
        }
        diags
    }
}

struct UnknownParameterRule;
impl LintRule for UnknownParameterRule {
    fn name(&self) -> &str { "unknown_parameter" }
    fn apply(&self, root: &Operator) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        root.walk(&mut |op, _| {
            for (key, _) in op.parameters().iter() {
                if op.description().parameter_type(key).is_none() {
                    diags.push(diagnostic(
                        self,
                        Severity::Warning,
                        op,
                        format!(
                            "Operator '{}' ({}) has no parameter '{}'",
                            op.name(),
                            op.type_name(),
                            key
                        ),
                        Some(format!("Remove '{key}'")),
                    ));
                }
            }
        });
        diags
    }
}

struct UniqueNameRule;
impl LintRule for UniqueNameRule {
    fn name(&self) -> &str { "unique_name" }
    fn apply(&self, root: &Operator) -> Vec<Diagnostic> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        root.walk(&mut |op, _| *seen.entry(op.name()).or_default() += 1);
        let mut reported = HashSet::new();
        let mut diags = Vec::new();
        root.walk(&mut |op, _| {
            let count = seen.get(op.name()).copied().unwrap_or(0);
            if count > 1 && reported.insert(op.name().to_string()) {
                diags.push(diagnostic(
                    self,
                    Severity::Error,
                    op,
                    format!("Operator name '{}' is used {} times", op.name(), count),
                    Some("Rename the duplicates".into()),
                ));
            }
        });
        diags
    }
}

struct BreakpointRule;
impl LintRule for BreakpointRule {
    fn name(&self) -> &str { "breakpoint" }
    fn apply(&self, root: &Operator) -> Vec<Diagnostic> {
        enabled_operators(root)
            .into_iter()
            .filter(|op| op.breakpoints().any())
            .map(|op| {
                let positions: Vec<&str> =
                    op.breakpoints().positions().iter().map(|p| p.as_str()).collect();
                diagnostic(
                    self,
                    Severity::Info,
                    op,
                    format!(
                        "Operator '{}' will pause at: {}",
                        op.name(),
                        positions.join(", ")
                    ),
                    None,
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all lint rules on the tree, assuming the process receives no input.
pub fn validate(root: &Operator) -> ValidationReport {
    validate_with(root, &[])
}

/// Run all lint rules, with `input` as the classes handed to the root.
pub fn validate_with(root: &Operator, input: &[IoClass]) -> ValidationReport {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(ChildCountRule),
        Box::new(IoFlowRule {
            input: input.to_vec(),
        }),
        Box::new(MissingParameterRule),
        Box::new(ParameterValueRule),
        Box::new(UnknownParameterRule),
        Box::new(UniqueNameRule),
        Box::new(BreakpointRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(root));
    }
    ValidationReport { diagnostics }
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(root: &Operator) -> Result<ValidationReport> {
    let report = validate(root);
    if !report.is_ok() {
        let messages: Vec<_> = report.errors().map(|d| d.message.clone()).collect();
        return Err(EngineError::ValidationError(messages.join("; ")));
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use opflow_types::Artifact;

    use crate::apply::ApplyContext;
    use crate::description::OperatorDescription;
    use crate::operator::OperatorBehavior;
    use crate::parameters::ParameterType;
    use crate::registry::default_registry;

    const DATA: IoClass = IoClass::new("ExampleSet", &IoClass::ANY);
    const TREE: IoClass = IoClass::new("TreeModel", &IoClass::MODEL);

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

    fn op(name: &str, desc: OperatorDescription) -> Operator {
        Operator::new(name, Arc::new(desc), Box::new(Nothing))
    }

    fn root() -> Operator {
        default_registry().create("Process", "Root").unwrap()
    }

    fn reader() -> OperatorDescription {
        OperatorDescription::operator("Reader").output(DATA)
    }

    fn learner() -> OperatorDescription {
        OperatorDescription::operator("Learner").input(DATA).output(TREE)
    }

    #[test]
    fn single_child_chain_without_children_reports_one_error() {
        let wrapper = op(
            "Wrapper",
            OperatorDescription::chain("Wrapper", 1, Some(1), InnerOperatorCondition::Unconstrained),
        );
        let mut root = root();
        root.add_child(wrapper).unwrap();

        let report = validate(&root);
        assert_eq!(report.error_count(), 1, "{:?}", report.diagnostics);
        assert_eq!(report.errors().next().unwrap().rule, "child_count");
    }

    #[test]
    fn too_many_children() {
        let mut wrapper = op(
            "Wrapper",
            OperatorDescription::chain("Wrapper", 1, Some(1), InnerOperatorCondition::Unconstrained),
        );
        wrapper.add_child(op("R1", reader())).unwrap();
        wrapper.add_child(op("R2", reader())).unwrap();
        let report = validate(&wrapper);
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn missing_input_is_detected() {
        let mut root = root();
        root.add_child(op("Learner", learner())).unwrap();
        let report = validate(&root);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.errors().next().unwrap().rule, "io_flow");

        let mut root = self::root();
        root.add_child(op("Reader", reader())).unwrap();
        root.add_child(op("Learner", learner())).unwrap();
        assert!(validate(&root).is_ok());
    }

    #[test]
    fn input_classes_can_be_given() {
        let mut root = root();
        root.add_child(op("Learner", learner())).unwrap();
        assert!(validate_with(&root, &[DATA]).is_ok());
    }

    #[test]
    fn consumed_input_is_gone_for_later_operators() {
        let mut root = root();
        root.add_child(op("Reader", reader())).unwrap();
        root.add_child(op("Learner", learner())).unwrap();
        root.add_child(op("Learner 2", learner())).unwrap();
        assert_eq!(validate(&root).error_count(), 1);
    }

    #[test]
    fn required_inner_output() {
        let desc = OperatorDescription::chain(
            "Evaluation",
            1,
            None,
            InnerOperatorCondition::Each {
                input: vec![DATA],
                required: vec![IoClass::MODEL],
            },
        );
        let mut chain = op("Eval", desc);
        chain.add_child(op("Learner", learner())).unwrap();
        chain.add_child(op("Reader", reader())).unwrap();
        let report = validate(&chain);
        assert_eq!(report.error_count(), 1, "{:?}", report.diagnostics);
        assert_eq!(report.errors().next().unwrap().operator.as_deref(), Some("Reader"));
    }

    #[test]
    fn disabled_operators_are_skipped() {
        let mut learner = op("Learner", learner());
        learner.set_enabled(false);
        let mut root = root();
        root.add_child(learner).unwrap();
        assert!(validate(&root).is_ok());
    }

    #[test]
    fn parameter_rules() {
        let desc = OperatorDescription::operator("Sampler")
            .parameter(ParameterType::integer("size", "", 1, 100, None))
            .parameter(ParameterType::real("ratio", "", 0.0, 1.0, Some(0.5)));
        let mut root = root();
        root.add_child(op("Sampler", desc.clone())).unwrap();
        let mut bad = op("Bad", desc.clone());
        bad.set_parameter("size", "1000");
        bad.set_parameter("colour", "red");
        root.add_child(bad).unwrap();
        let mut deferred = op("Deferred", desc);
        deferred.set_parameter("size", "%{n}");
        root.add_child(deferred).unwrap();

        let report = validate(&root);
        let rules: Vec<&str> = report.errors().map(|d| d.rule.as_str()).collect();
        assert_eq!(rules, vec!["missing_parameter", "parameter_value"]);
        assert_eq!(report.warning_count(), 1);
        assert!(validate_or_raise(&root).is_err());
    }

    #[test]
    fn duplicate_names_are_errors() {
        let mut root = root();
        root.add_child(op("R", reader())).unwrap();
        root.add_child(op("R", reader())).unwrap();
        let report = validate(&root);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.errors().next().unwrap().rule, "unique_name");
    }

    #[test]
    fn models_collapse_into_container_model() {
        let merged = merge_classes(vec![DATA], &[TREE, TREE], MergePolicy::Prepend);
        assert_eq!(merged, vec![IoClass::CONTAINER_MODEL, DATA]);
    }
}
