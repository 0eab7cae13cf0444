//! The per-process environment shared by every operator of a run.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use opflow_types::{MessageTable, Result};

use crate::config::EngineConfig;
use crate::control::{ProcessControl, ProcessController};
use crate::events::{EventEmitter, ProcessEvent};
use crate::macros::MacroTable;
use crate::values::ValueRegistry;

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Delivers end-of-process notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, recipient: Option<&str>, subject: &str, body: &str);
}

/// Writes notifications to the log instead of sending them anywhere.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, recipient: Option<&str>, subject: &str, body: &str) {
        tracing::info!(
            recipient = recipient.unwrap_or("<unset>"),
            subject = %subject,
            "{body}"
        );
    }
}

// ---------------------------------------------------------------------------
// ProcessContext
// ---------------------------------------------------------------------------

/// Everything an operator may reach while it runs: control flags, macros,
/// live values, events, messages, and configuration.
pub struct ProcessContext {
    control: Arc<ProcessControl>,
    macros: MacroTable,
    values: ValueRegistry,
    events: EventEmitter,
    messages: MessageTable,
    config: EngineConfig,
    random_seed: AtomicI64,
    run_id: Mutex<String>,
    notifier: Arc<dyn Notifier>,
}

impl ProcessContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            control: Arc::new(ProcessControl::new()),
            macros: MacroTable::new(),
            values: ValueRegistry::new(),
            events: EventEmitter::new(config.event_capacity),
            messages: MessageTable::builtin().clone(),
            random_seed: AtomicI64::new(2001),
            run_id: Mutex::new(String::new()),
            notifier: Arc::new(LogNotifier),
            config,
        }
    }

    /// Build a context whose message table includes the configured overlay.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let messages = config.message_table()?;
        Ok(Self::new(config).with_messages(messages))
    }

    pub fn with_messages(mut self, messages: MessageTable) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn control(&self) -> &ProcessControl {
        &self.control
    }

    pub fn controller(&self) -> ProcessController {
        ProcessController::new(self.control.clone())
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    pub fn values(&self) -> &ValueRegistry {
        &self.values
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn emit(&self, event: ProcessEvent) {
        self.events.emit(event);
    }

    pub fn messages(&self) -> &MessageTable {
        &self.messages
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    pub fn random_seed(&self) -> i64 {
        self.random_seed.load(Ordering::Relaxed)
    }

    pub fn set_random_seed(&self, seed: i64) {
        self.random_seed.store(seed, Ordering::Relaxed);
    }

    pub fn run_id(&self) -> String {
        self.run_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn start_run(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        *self.run_id.lock().unwrap_or_else(PoisonError::into_inner) = id.clone();
        id
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("state", &self.control.state())
            .field("run_id", &self.run_id())
            .field("config", &self.config)
            .finish()
    }
}
