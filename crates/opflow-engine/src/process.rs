//! The process: a root operator chain plus its per-run environment.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use opflow_types::{Artifact, EngineError, IoContainer, Result};

use crate::apply::{ApplyContext, ParameterResolver};
use crate::context::ProcessContext;
use crate::control::ProcessController;
use crate::description::{InnerOperatorCondition, OperatorDescription};
use crate::events::ProcessEvent;
use crate::operator::{Operator, OperatorBehavior};
use crate::parameters::ParameterType;
use crate::registry::{default_registry, OperatorRegistry};
use crate::tree::{self, OperatorRecord};
use crate::validation::{self, ValidationReport};

pub const LOG_VERBOSITY: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];
pub const SEND_MAIL: &[&str] = &["never", "always", "for_long_processes"];

// ---------------------------------------------------------------------------
// ProcessRoot operator
// ---------------------------------------------------------------------------

/// `Process`: the chain at the root of every process.
#[derive(Debug, Default, Clone)]
pub struct ProcessRoot;

impl ProcessRoot {
    pub fn description() -> OperatorDescription {
        OperatorDescription::chain(
            "Process",
            0,
            None,
            InnerOperatorCondition::Chain {
                required: Vec::new(),
            },
        )
        .group("meta")
        .summary("The root operator chain of a process.")
        .parameter(ParameterType::category(
            "logverbosity",
            "Log level used when the process is run from the command line.",
            LOG_VERBOSITY,
            2,
        ))
        .parameter(ParameterType::integer(
            "random_seed",
            "Process-wide seed for random number generation (-1 for no fixed seed).",
            -1,
            i64::from(i32::MAX),
            Some(2001),
        ))
        .parameter(ParameterType::string(
            "encoding",
            "Character encoding of files read and written by the process.",
            Some("UTF-8"),
        ))
        .parameter(ParameterType::category(
            "send_mail",
            "When to send a notification at the end of the process.",
            SEND_MAIL,
            0,
        ))
        .parameter(ParameterType::integer(
            "process_duration_for_mail",
            "Minimum duration in minutes for notifications of long processes.",
            0,
            i64::MAX,
            Some(30),
        ))
        .parameter(
            ParameterType::string("notification_email", "Recipient of notifications.", None)
                .optional(),
        )
    }
}

#[async_trait]
impl OperatorBehavior for ProcessRoot {
    async fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<Vec<Artifact>> {
        let input = ctx.take_all_input();
        let output = ctx.run_children(input).await?;
        Ok(output.into_vec())
    }

    fn clone_behavior(&self) -> Box<dyn OperatorBehavior> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

/// Owns the operator tree and the environment its runs share.
///
/// Operator names are unique within a process; operators added through the
/// process are renamed `Name (2)`, `Name (3)`, ... on collision.
pub struct Process {
    root: Operator,
    context: Arc<ProcessContext>,
}

impl Process {
    pub fn new(root: Operator) -> Self {
        Self::with_context(root, Arc::new(ProcessContext::default()))
    }

    pub fn with_context(mut root: Operator, context: Arc<ProcessContext>) -> Self {
        let mut taken = HashSet::new();
        make_unique(&mut root, &mut taken);
        let process = Self { root, context };
        process.register_values();
        process
    }

    /// An empty process with a `Process` root named `Root`.
    pub fn empty(registry: &OperatorRegistry) -> Result<Self> {
        Ok(Self::new(registry.create("Process", "Root")?))
    }

    pub fn root(&self) -> &Operator {
        &self.root
    }

    pub fn context(&self) -> &Arc<ProcessContext> {
        &self.context
    }

    pub fn controller(&self) -> ProcessController {
        self.context.controller()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProcessEvent> {
        self.context.events().subscribe()
    }

    // -- tree editing -------------------------------------------------------

    pub fn operator(&self, name: &str) -> Result<&Operator> {
        self.root.find(name).ok_or_else(|| unknown(name))
    }

    pub fn operator_mut(&mut self, name: &str) -> Result<&mut Operator> {
        self.root.find_mut(name).ok_or_else(|| unknown(name))
    }

    pub fn parent_of(&self, name: &str) -> Option<&Operator> {
        self.root.parent_of(name)
    }

    pub fn operator_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.root.walk(&mut |op, _| names.push(op.name().to_string()));
        names
    }

    /// `base` if unused, else `base (2)`, `base (3)`, ...
    pub fn unique_name(&self, base: &str) -> String {
        let taken: HashSet<String> = self.operator_names().into_iter().collect();
        next_free(base, &taken)
    }

    /// Append `operator` to the chain `parent`. Returns the name it got.
    pub fn add_operator(&mut self, parent: &str, operator: Operator) -> Result<String> {
        self.insert_operator(parent, usize::MAX, operator)
    }

    pub fn insert_operator(&mut self, parent: &str, index: usize, mut operator: Operator) -> Result<String> {
        let mut taken: HashSet<String> = self.operator_names().into_iter().collect();
        make_unique(&mut operator, &mut taken);
        let name = operator.name().to_string();
        let mut added = Vec::new();
        operator.walk(&mut |op, _| added.push((op.name().to_string(), op.values())));

        self.operator_mut(parent)?.insert_child(index, operator)?;
        for (op, values) in added {
            self.context.values().register(&op, values);
        }
        tracing::debug!(operator = %name, parent = %parent, "Operator added");
        Ok(name)
    }

    /// Detach `name` and its subtree. The root cannot be removed.
    pub fn remove_operator(&mut self, name: &str) -> Result<Operator> {
        let parent = self
            .root
            .parent_of_mut(name)
            .ok_or_else(|| unknown(name))?;
        let removed = parent.remove_child(name).ok_or_else(|| unknown(name))?;
        removed.walk(&mut |op, _| self.context.values().unregister(op.name()));
        tracing::debug!(operator = %name, "Operator removed");
        Ok(removed)
    }

    /// Rename `old`, keeping names unique. Returns the name it got.
    pub fn rename_operator(&mut self, old: &str, new: &str) -> Result<String> {
        self.operator(old)?;
        if old == new {
            return Ok(new.to_string());
        }
        let name = self.unique_name(new);
        let operator = self.operator_mut(old)?;
        operator.set_name(name.clone());
        let values = operator.values();
        self.context.values().unregister(old);
        self.context.values().register(&name, values);
        Ok(name)
    }

    /// Re-register the values of every operator in the tree.
    pub fn register_values(&self) {
        let values = self.context.values();
        values.clear();
        self.root.walk(&mut |op, _| values.register(op.name(), op.values()));
    }

    pub fn validate(&self) -> ValidationReport {
        validation::validate(&self.root)
    }

    // -- serialization ------------------------------------------------------

    pub fn to_record(&self) -> OperatorRecord {
        OperatorRecord::from_operator(&self.root)
    }

    pub fn from_record(record: &OperatorRecord, registry: &OperatorRegistry) -> Result<Self> {
        Ok(Self::new(record.build(registry)?))
    }

    pub fn to_xml(&self) -> String {
        tree::process_to_xml(&self.to_record())
    }

    pub fn from_xml(text: &str, registry: &OperatorRegistry) -> Result<Self> {
        Self::from_record(&tree::process_from_xml(text)?, registry)
    }

    pub fn to_json(&self) -> Result<String> {
        tree::process_to_json(&self.to_record())
    }

    pub fn from_json(text: &str, registry: &OperatorRegistry) -> Result<Self> {
        Self::from_record(&tree::process_from_json(text)?, registry)
    }

    /// Load a process file; `.json` files are read as JSON, anything else as XML.
    pub fn load(path: &Path, registry: &OperatorRegistry) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        if is_json(path) {
            Self::from_json(&text, registry)
        } else {
            Self::from_xml(&text, registry)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = if is_json(path) { self.to_json()? } else { self.to_xml() };
        std::fs::write(path, text)?;
        Ok(())
    }

    // -- execution ----------------------------------------------------------

    /// Run the whole tree on `input`.
    ///
    /// Ends in `Completed` on success and in `Stopped` otherwise; a stop
    /// request and a failure are told apart by the event emitted.
    pub async fn run(&self, input: IoContainer) -> Result<IoContainer> {
        let ctx = self.context.as_ref();
        let process = self.root.name().to_string();
        ctx.control().begin();
        ctx.macros().clear();
        let run_id = ctx.start_run();
        self.register_values();
        let started = Instant::now();

        tracing::info!(process = %process, run_id = %run_id, operators = self.root.count(), "Process starts");
        ctx.emit(ProcessEvent::ProcessStarted {
            process: process.clone(),
            run_id,
            operator_count: self.root.count(),
        });

        let result = match self.apply_settings() {
            Ok(()) => self.root.run(input, ctx).await,
            Err(err) => Err(err),
        };
        let elapsed = started.elapsed();

        match &result {
            Ok(output) => {
                ctx.control().finish(crate::control::ProcessState::Completed);
                tracing::info!(process = %process, duration_ms = elapsed.as_millis() as u64, "Process finished");
                ctx.emit(ProcessEvent::ProcessCompleted {
                    process: process.clone(),
                    duration_ms: elapsed.as_millis() as u64,
                    artifacts: output.summary(),
                });
            }
            Err(err) if err.is_stop() => {
                ctx.control().finish(crate::control::ProcessState::Stopped);
                tracing::warn!(process = %process, error = %err, "Process stopped");
                ctx.emit(ProcessEvent::ProcessStopped {
                    process: process.clone(),
                    operator: err.operator().unwrap_or_default().to_string(),
                });
            }
            Err(err) => {
                ctx.control().finish(crate::control::ProcessState::Stopped);
                tracing::error!(process = %process, error = %err, "Process failed");
                ctx.emit(ProcessEvent::ProcessFailed {
                    process: process.clone(),
                    operator: err.operator().map(String::from),
                    error: err.to_string(),
                });
            }
        }

        self.notify(&result, elapsed);
        result
    }

    /// Apply the root's process-wide settings to the context.
    fn apply_settings(&self) -> Result<()> {
        if self.root.description().parameter_type("random_seed").is_some() {
            let seed = ParameterResolver::new(&self.root, &self.context).get_int("random_seed")?;
            self.context.set_random_seed(seed);
            tracing::debug!(seed, "Random seed set");
        }
        Ok(())
    }

    fn notify(&self, result: &Result<IoContainer>, elapsed: Duration) {
        if self.root.description().parameter_type("send_mail").is_none() {
            return;
        }
        let params = ParameterResolver::new(&self.root, &self.context);
        let send = match params.get_category("send_mail").as_deref() {
            Ok("always") => true,
            Ok("for_long_processes") => {
                let minutes = params.get_int("process_duration_for_mail").unwrap_or(30);
                elapsed >= Duration::from_secs((minutes.max(0) as u64).saturating_mul(60))
            }
            Ok(_) => false,
            Err(err) => {
                tracing::warn!(error = %err, "Ignoring notification settings");
                false
            }
        };
        if !send {
            return;
        }
        let recipient = params.get_optional_string("notification_email").ok().flatten();
        let process = self.root.name();
        let (subject, body) = match result {
            Ok(output) => (
                format!("Process '{process}' finished"),
                format!(
                    "Finished after {} s with {} result artifact(s).",
                    elapsed.as_secs(),
                    output.len()
                ),
            ),
            Err(err) => (format!("Process '{process}' did not finish"), err.to_string()),
        };
        self.context
            .notifier()
            .notify(recipient.as_deref(), &subject, &body);
    }
}

impl Default for Process {
    fn default() -> Self {
        let root = Operator::new(
            "Root",
            Arc::new(ProcessRoot::description()),
            Box::new(ProcessRoot),
        );
        Self::new(root)
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("root", &self.root)
            .field("context", &self.context)
            .finish()
    }
}

/// Load with the built-in operator types.
impl std::str::FromStr for Process {
    type Err = EngineError;

    fn from_str(text: &str) -> Result<Self> {
        let registry = default_registry();
        if text.trim_start().starts_with('{') {
            Self::from_json(text, &registry)
        } else {
            Self::from_xml(text, &registry)
        }
    }
}

fn unknown(name: &str) -> EngineError {
    EngineError::UnknownOperator {
        name: name.to_string(),
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn next_free(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let stem = strip_counter(base);
    (2..)
        .map(|i| format!("{stem} ({i})"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// `Learner (3)` → `Learner`.
fn strip_counter(name: &str) -> &str {
    if let Some(open) = name.rfind(" (") {
        let tail = &name[open + 2..];
        if let Some(digits) = tail.strip_suffix(')') {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return &name[..open];
            }
        }
    }
    name
}

/// Rename operators in `operator`'s subtree whose names are already in `taken`.
fn make_unique(operator: &mut Operator, taken: &mut HashSet<String>) {
    let name = next_free(operator.name(), taken);
    if name != operator.name() {
        tracing::warn!(operator = %operator.name(), renamed = %name, "Duplicate operator name");
        operator.set_name(name.clone());
    }
    taken.insert(name);
    for child in operator.children_mut() {
        make_unique(child, taken);
    }
}
