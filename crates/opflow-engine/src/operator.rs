//! The operator tree node and its execution algorithm.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;

use opflow_types::{Artifact, ContainerModel, EngineError, IoClass, IoContainer, Result};

use crate::apply::ApplyContext;
use crate::context::ProcessContext;
use crate::control::{BreakpointPosition, Breakpoints};
use crate::description::{MergePolicy, OperatorDescription};
use crate::events::ProcessEvent;
use crate::parameters::{ParameterValue, Parameters};
use crate::values::OperatorValue;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ---------------------------------------------------------------------------
// OperatorBehavior trait
// ---------------------------------------------------------------------------

/// The work an operator type does. One instance per operator.
#[async_trait]
pub trait OperatorBehavior: Send + Sync {
    /// Read inputs from `ctx` and return the produced artifacts.
    async fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<Vec<Artifact>>;

    /// Values this behaviour exposes in addition to the standard ones.
    fn values(&self) -> Vec<OperatorValue> {
        Vec::new()
    }

    /// A fresh instance with the same configuration and new internal state.
    fn clone_behavior(&self) -> Box<dyn OperatorBehavior>;
}

// ---------------------------------------------------------------------------
// OperatorStats
// ---------------------------------------------------------------------------

/// Apply counter and timestamps of one operator.
#[derive(Debug, Default)]
pub struct OperatorStats {
    apply_count: AtomicU64,
    start_time: AtomicI64,
    loop_time: AtomicI64,
}

impl OperatorStats {
    pub fn apply_count(&self) -> u64 {
        self.apply_count.load(Ordering::SeqCst)
    }

    /// Milliseconds since the last apply started, 0 if never applied.
    pub fn elapsed_ms(&self) -> i64 {
        since(self.start_time.load(Ordering::SeqCst))
    }

    /// Milliseconds since the last loop checkpoint, 0 if none yet.
    pub fn loop_elapsed_ms(&self) -> i64 {
        since(self.loop_time.load(Ordering::SeqCst))
    }

    fn start(&self) -> u64 {
        let now = now_ms();
        self.start_time.store(now, Ordering::SeqCst);
        self.loop_time.store(now, Ordering::SeqCst);
        self.apply_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn mark_loop(&self) {
        self.loop_time.store(now_ms(), Ordering::SeqCst);
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn since(stamp: i64) -> i64 {
    if stamp == 0 {
        0
    } else {
        (now_ms() - stamp).max(0)
    }
}

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

pub struct Operator {
    name: String,
    description: Arc<OperatorDescription>,
    enabled: bool,
    expanded: bool,
    user_description: Option<String>,
    breakpoints: Breakpoints,
    parameters: Parameters,
    stats: Arc<OperatorStats>,
    in_flight: Arc<Mutex<Option<IoContainer>>>,
    errors: Arc<Mutex<Vec<String>>>,
    behavior: Box<dyn OperatorBehavior>,
    children: Vec<Operator>,
}

impl Operator {
    pub fn new(
        name: impl Into<String>,
        description: Arc<OperatorDescription>,
        behavior: Box<dyn OperatorBehavior>,
    ) -> Self {
        Self {
            name: name.into(),
            description,
            enabled: true,
            expanded: true,
            user_description: None,
            breakpoints: Breakpoints::none(),
            parameters: Parameters::new(),
            stats: Arc::new(OperatorStats::default()),
            in_flight: Arc::new(Mutex::new(None)),
            errors: Arc::new(Mutex::new(Vec::new())),
            behavior,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn type_name(&self) -> &str {
        &self.description.type_name
    }

    pub fn description(&self) -> &OperatorDescription {
        &self.description
    }

    pub fn is_chain(&self) -> bool {
        self.description.is_chain()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn set_expanded(&mut self, expanded: bool) {
        self.expanded = expanded;
    }

    pub fn user_description(&self) -> Option<&str> {
        self.user_description.as_deref()
    }

    pub fn set_user_description(&mut self, text: Option<String>) {
        self.user_description = text;
    }

    pub fn breakpoints(&self) -> Breakpoints {
        self.breakpoints
    }

    pub fn set_breakpoint(&mut self, position: BreakpointPosition, on: bool) {
        self.breakpoints.set(position, on);
    }

    pub fn set_breakpoints(&mut self, breakpoints: Breakpoints) {
        self.breakpoints = breakpoints;
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<ParameterValue>) {
        self.parameters.set(key, value);
    }

    /// Builder-style [`set_parameter`](Self::set_parameter).
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.parameters.set(key, value);
        self
    }

    pub fn stats(&self) -> &OperatorStats {
        &self.stats
    }

    pub fn apply_count(&self) -> u64 {
        self.stats.apply_count()
    }

    /// The container this operator is currently working on, if it is running.
    pub fn in_flight(&self) -> Option<IoContainer> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_in_flight(&self, container: Option<IoContainer>) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = container;
    }

    /// Messages of the errors this operator raised.
    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Standard values (`applycount`, `time`, `looptime`) plus the behaviour's own.
    pub fn values(&self) -> Vec<OperatorValue> {
        let count = self.stats.clone();
        let time = self.stats.clone();
        let looptime = self.stats.clone();
        let mut values = vec![
            OperatorValue::new("applycount", "The number of times the operator was applied.", move || {
                count.apply_count() as f64
            }),
            OperatorValue::new("time", "Milliseconds since the operator started.", move || {
                time.elapsed_ms() as f64
            }),
            OperatorValue::new(
                "looptime",
                "Milliseconds since the current loop iteration started.",
                move || looptime.loop_elapsed_ms() as f64,
            ),
        ];
        values.extend(self.behavior.values());
        values
    }

    // -- execution ----------------------------------------------------------

    /// Run this operator on `input` and return the resulting container.
    pub fn run<'a>(
        &'a self,
        input: IoContainer,
        process: &'a ProcessContext,
    ) -> BoxFuture<'a, Result<IoContainer>> {
        Box::pin(async move {
            if !self.enabled {
                tracing::debug!(operator = %self.name, "Operator disabled, passing input through");
                return Ok(input);
            }
            process.control().check_stop(&self.name)?;

            let apply_count = self.stats.start();
            let started = Instant::now();
            tracing::info!(
                operator = %self.name,
                type_name = %self.type_name(),
                apply_count,
                "Applying operator"
            );
            process.emit(ProcessEvent::OperatorStarted {
                operator: self.name.clone(),
                type_name: self.type_name().to_string(),
                apply_count,
            });

            if self.breakpoints.is_set(BreakpointPosition::Before) {
                process
                    .control()
                    .suspend(&self.name, BreakpointPosition::Before, &input, process.events())
                    .await?;
            }

            for artifact in input.iter() {
                artifact.set_working_operator(&self.name);
            }

            self.set_in_flight(Some(input.clone()));
            let applied = {
                let mut ctx = ApplyContext::new(self, process, input);
                match self.behavior.apply(&mut ctx).await {
                    Ok(produced) => Ok((produced, ctx.into_input())),
                    Err(err) => Err(err),
                }
            };
            self.set_in_flight(None);
            let (produced, remaining) = applied.map_err(|err| self.record_error(err))?;

            for artifact in &produced {
                artifact.set_source_if_unset(&self.name);
            }
            let output = merge_outputs(remaining, produced, self.description.merge_policy, &self.name);

            if self.breakpoints.is_set(BreakpointPosition::After) {
                process
                    .control()
                    .suspend(&self.name, BreakpointPosition::After, &output, process.events())
                    .await?;
            }

            let duration_ms = started.elapsed().as_millis() as u64;
            tracing::debug!(operator = %self.name, duration_ms, artifacts = output.len(), "Operator finished");
            process.emit(ProcessEvent::OperatorFinished {
                operator: self.name.clone(),
                duration_ms,
                artifacts: output.len(),
            });
            Ok(output)
        })
    }

    /// Attribute `err` to this operator unless it already names one, and
    /// record it if it originated here.
    fn record_error(&self, err: EngineError) -> EngineError {
        if err.is_stop() {
            return err;
        }
        let err = err.with_operator(&self.name);
        if err.operator() == Some(self.name.as_str()) {
            tracing::error!(operator = %self.name, error = %err, "Operator failed");
            self.errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(err.to_string());
        }
        err
    }

    // -- children -----------------------------------------------------------

    pub fn children(&self) -> &[Operator] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Operator> {
        &mut self.children
    }

    pub fn add_child(&mut self, child: Operator) -> Result<()> {
        let index = self.children.len();
        self.insert_child(index, child)
    }

    /// Builder-style [`add_child`](Self::add_child).
    pub fn with_child(mut self, child: Operator) -> Result<Self> {
        self.add_child(child)?;
        Ok(self)
    }

    pub fn insert_child(&mut self, index: usize, child: Operator) -> Result<()> {
        if !self.is_chain() {
            return Err(EngineError::NotAChain {
                operator: self.name.clone(),
            });
        }
        let index = index.min(self.children.len());
        self.children.insert(index, child);
        Ok(())
    }

    /// Remove the direct child named `name`.
    pub fn remove_child(&mut self, name: &str) -> Option<Operator> {
        let index = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(index))
    }

    /// Find `name` in this subtree, including this operator.
    pub fn find(&self, name: &str) -> Option<&Operator> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Operator> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(name))
    }

    /// The chain directly holding `name` in this subtree.
    pub fn parent_of(&self, name: &str) -> Option<&Operator> {
        if self.children.iter().any(|c| c.name == name) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.parent_of(name))
    }

    pub(crate) fn parent_of_mut(&mut self, name: &str) -> Option<&mut Operator> {
        if self.children.iter().any(|c| c.name == name) {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.parent_of_mut(name))
    }

    /// Visit this subtree depth first, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Operator, usize)) {
        self.walk_at(0, visit);
    }

    fn walk_at<'a>(&'a self, depth: usize, visit: &mut dyn FnMut(&'a Operator, usize)) {
        visit(self, depth);
        for child in &self.children {
            child.walk_at(depth + 1, visit);
        }
    }

    /// Number of operators in this subtree.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Operator::count).sum::<usize>()
    }
}

/// Deep copy of the configuration. Counters start fresh; the in-flight
/// container and the error list stay shared with the original.
impl Clone for Operator {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
            expanded: self.expanded,
            user_description: self.user_description.clone(),
            breakpoints: self.breakpoints,
            parameters: self.parameters.clone(),
            stats: Arc::new(OperatorStats::default()),
            in_flight: self.in_flight.clone(),
            errors: self.errors.clone(),
            behavior: self.behavior.clone_behavior(),
            children: self.children.clone(),
        }
    }
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("name", &self.name)
            .field("type", &self.description.type_name)
            .field("enabled", &self.enabled)
            .field("breakpoints", &self.breakpoints)
            .field("parameters", &self.parameters)
            .field("children", &self.children)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Output merging
// ---------------------------------------------------------------------------

/// Combine `produced` with what is left of the input.
///
/// Plain models are gathered into a single `ContainerModel`: an existing one
/// in the result is replaced by a copy holding the new models as well, and a
/// new one is created only if there is none and at least one model was
/// produced.
pub(crate) fn merge_outputs(
    remaining: IoContainer,
    produced: Vec<Artifact>,
    policy: MergePolicy,
    operator: &str,
) -> IoContainer {
    let (models, others): (Vec<Artifact>, Vec<Artifact>) =
        produced.into_iter().partition(Artifact::is_model);
    let sibling_count = others.len();

    let mut result = match policy {
        MergePolicy::Prepend => remaining,
        MergePolicy::OnlyNew => IoContainer::empty(),
    };
    result.push_front(others);
    if models.is_empty() {
        return result;
    }

    match result.position(&IoClass::CONTAINER_MODEL, 0) {
        Some(index) => {
            let existing = result.as_slice()[index].clone();
            let held = existing
                .object()
                .contained_models()
                .map(<[Artifact]>::to_vec)
                .unwrap_or_default();
            tracing::debug!(
                operator = %operator,
                added = models.len(),
                held = held.len(),
                "Adding models to existing container model"
            );
            let merged = Artifact::new(ContainerModel::new(held.into_iter().chain(models).collect()));
            if let Some(source) = existing.source() {
                merged.set_source_if_unset(source);
            }
            result.replace_at(index, merged);
        }
        None => {
            let container = Artifact::new(ContainerModel::new(models));
            container.set_source_if_unset(operator);
            result.insert(sibling_count, container);
        }
    }
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    use opflow_types::IoObject;

    use crate::description::InnerOperatorCondition;

    const DATA: IoClass = IoClass::new("ExampleSet", &IoClass::ANY);
    const TREE: IoClass = IoClass::new("TreeModel", &IoClass::MODEL);

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

    #[derive(Debug)]
    struct Tree;

    impl IoObject for Tree {
        fn io_class(&self) -> IoClass {
            TREE
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

    fn leaf(name: &str) -> Operator {
        Operator::new(name, Arc::new(OperatorDescription::operator("Nothing")), Box::new(Nothing))
    }

    fn chain(name: &str) -> Operator {
        Operator::new(
            name,
            Arc::new(OperatorDescription::chain(
                "OperatorChain",
                0,
                None,
                InnerOperatorCondition::Unconstrained,
            )),
            Box::new(Nothing),
        )
    }

    #[test]
    fn merge_creates_container_model_after_siblings() {
        let input = IoContainer::new(vec![Artifact::new(Data)]);
        let out = merge_outputs(
            input,
            vec![Artifact::new(Tree), Artifact::new(Data)],
            MergePolicy::Prepend,
            "Learner",
        );
        let classes: Vec<&str> = out.iter().map(|a| a.io_class().name()).collect();
        assert_eq!(classes, vec!["ExampleSet", "ContainerModel", "ExampleSet"]);
        let cm = out.get(&IoClass::CONTAINER_MODEL, 0).unwrap();
        assert_eq!(cm.source(), Some("Learner"));
        assert_eq!(cm.downcast_ref::<ContainerModel>().unwrap().len(), 1);
    }

    #[test]
    fn merge_appends_to_existing_container_model() {
        let first = Artifact::new(Tree);
        let after_first = merge_outputs(IoContainer::empty(), vec![first.clone()], MergePolicy::Prepend, "A");
        let second = Artifact::new(Tree);
        let out = merge_outputs(after_first, vec![second.clone()], MergePolicy::Prepend, "B");

        assert_eq!(out.count(&IoClass::CONTAINER_MODEL), 1);
        let cm = out.get(&IoClass::CONTAINER_MODEL, 0).unwrap();
        assert_eq!(cm.source(), Some("A"));
        let models = cm.downcast_ref::<ContainerModel>().unwrap().models().to_vec();
        assert!(models[0].ptr_eq(&first));
        assert!(models[1].ptr_eq(&second));
    }

    #[test]
    fn only_new_drops_remaining_input() {
        let input = IoContainer::new(vec![Artifact::new(Data)]);
        let out = merge_outputs(input, vec![], MergePolicy::OnlyNew, "Chain");
        assert!(out.is_empty());
    }

    #[test]
    fn no_models_no_container_model() {
        let out = merge_outputs(IoContainer::empty(), vec![Artifact::new(Data)], MergePolicy::Prepend, "A");
        assert!(!out.contains(&IoClass::CONTAINER_MODEL));
    }

    #[test]
    fn leaves_reject_children() {
        let mut op = leaf("A");
        let err = op.add_child(leaf("B")).unwrap_err();
        assert!(matches!(err, EngineError::NotAChain { .. }));
    }

    #[test]
    fn tree_navigation() {
        let inner = chain("Inner").with_child(leaf("B")).unwrap();
        let root = chain("Root")
            .with_child(leaf("A"))
            .unwrap()
            .with_child(inner)
            .unwrap();

        assert_eq!(root.count(), 4);
        assert_eq!(root.find("B").unwrap().name(), "B");
        assert_eq!(root.parent_of("B").unwrap().name(), "Inner");
        assert_eq!(root.parent_of("A").unwrap().name(), "Root");
        assert!(root.parent_of("Root").is_none());

        let mut names = Vec::new();
        root.walk(&mut |op, depth| names.push(format!("{}{}", depth, op.name())));
        assert_eq!(names, vec!["0Root", "1A", "1Inner", "2B"]);
    }

    #[test]
    fn clone_resets_counters_but_shares_errors() {
        let op = leaf("A").with_parameter("k", "v");
        op.stats.start();
        op.errors.lock().unwrap().push("boom".into());

        let copy = op.clone();
        assert_eq!(copy.apply_count(), 0);
        assert_eq!(copy.parameters().get("k").and_then(|v| v.as_text()), Some("v"));
        assert_eq!(copy.errors(), vec!["boom".to_string()]);
        assert!(Arc::ptr_eq(&op.in_flight, &copy.in_flight));
    }

    #[test]
    fn standard_values() {
        let op = leaf("A");
        op.stats.start();
        op.stats.start();
        let values = op.values();
        let count = values.iter().find(|v| v.key == "applycount").unwrap();
        assert_eq!(count.get(), 2.0);
        assert!(values.iter().any(|v| v.key == "looptime"));
    }
}
