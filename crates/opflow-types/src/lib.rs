//! Shared types and errors for the opflow operator engine.
//!
//! This crate provides the foundational types used across all other opflow crates:
//! - `EngineError`: unified error taxonomy
//! - `UserError`: coded, user-facing failures rendered through a [`MessageTable`]
//! - `IoClass`, `IoObject`, `Artifact`: typed artifacts flowing between operators
//! - `IoContainer`: the ordered, value-like hand-off between operators

pub mod container;
pub mod io;
pub mod messages;
pub mod model;

pub use container::{ArtifactSummary, IoContainer};
pub use io::{Artifact, IoClass, IoObject};
pub use messages::{format_message, ErrorMessage, MessageTable};
pub use model::ContainerModel;

use std::fmt;

/// Unified error type for all opflow subsystems.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // === Artifact Errors ===
    #[error("{}", missing_input_message(.class, .occurrence, .operator))]
    MissingInput {
        class: String,
        occurrence: usize,
        operator: Option<String>,
    },

    // === Parameter Errors ===
    #[error("Operator '{operator}': parameter '{key}' is not set and has no default")]
    UndefinedParameter { operator: String, key: String },

    #[error("Operator '{operator}': illegal value '{value}' for parameter '{key}': {message}")]
    InvalidParameter {
        operator: String,
        key: String,
        value: String,
        message: String,
    },

    // === Operational Errors ===
    #[error(transparent)]
    User(#[from] UserError),

    #[error("Process stopped at operator '{operator}'")]
    Stopped { operator: String },

    #[error("Operator '{operator}' failed: {message}")]
    OperatorFailed { operator: String, message: String },

    #[error("Operator '{operator}' failed: {source}")]
    InOperator {
        operator: String,
        #[source]
        source: Box<EngineError>,
    },

    // === Tree Errors ===
    #[error("Unknown operator type '{type_name}'")]
    UnknownOperatorType { type_name: String },

    #[error("Operator '{operator}' is not an operator chain and cannot hold inner operators")]
    NotAChain { operator: String },

    #[error("No operator named '{name}' in this process")]
    UnknownOperator { name: String },

    #[error("XML parse error at line {line}, col {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
        source_snippet: Option<String>,
    },

    #[error("Process validation failed: {0}")]
    ValidationError(String),

    // === Performance Errors ===
    #[error("Cannot merge criterion '{found}' into '{expected}'")]
    IncompatibleCriteria { expected: String, found: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

fn missing_input_message(class: &str, occurrence: &usize, operator: &Option<String>) -> String {
    let which = if *occurrence == 0 {
        String::new()
    } else {
        format!(" (occurrence {})", occurrence + 1)
    };
    match operator.as_deref() {
        Some(op) => format!("Operator '{op}' is missing input of class {class}{which}"),
        None => format!("Missing input of class {class}{which}"),
    }
}

impl EngineError {
    /// The operator this error is attributed to, if any.
    pub fn operator(&self) -> Option<&str> {
        match self {
            EngineError::MissingInput { operator, .. } => operator.as_deref(),
            EngineError::UndefinedParameter { operator, .. }
            | EngineError::InvalidParameter { operator, .. }
            | EngineError::Stopped { operator }
            | EngineError::OperatorFailed { operator, .. }
            | EngineError::InOperator { operator, .. }
            | EngineError::NotAChain { operator } => Some(operator),
            EngineError::User(err) => err.operator.as_deref(),
            _ => None,
        }
    }

    /// Attach `operator` to this error unless it already names one.
    ///
    /// `Other` becomes `OperatorFailed`; any other error without an operator
    /// slot is wrapped into `InOperator`, keeping it as the source.
    pub fn with_operator(self, operator: &str) -> Self {
        match self {
            EngineError::MissingInput {
                class,
                occurrence,
                operator: None,
            } => EngineError::MissingInput {
                class,
                occurrence,
                operator: Some(operator.to_string()),
            },
            EngineError::User(err) => EngineError::User(err.with_operator(operator)),
            EngineError::Other(message) => EngineError::OperatorFailed {
                operator: operator.to_string(),
                message,
            },
            err if err.operator().is_none() => EngineError::InOperator {
                operator: operator.to_string(),
                source: Box::new(err),
            },
            other => other,
        }
    }

    /// Returns `true` for a cooperative stop; such errors are never reported as failures.
    pub fn is_stop(&self) -> bool {
        matches!(self, EngineError::Stopped { .. })
    }

    /// Returns `true` if the error comes from the shape of the operator tree
    /// rather than from running it.
    pub fn is_structural(&self) -> bool {
        match self {
            EngineError::InOperator { source, .. } => source.is_structural(),
            other => matches!(
                other,
                EngineError::UnknownOperatorType { .. }
                    | EngineError::NotAChain { .. }
                    | EngineError::ParseError { .. }
                    | EngineError::ValidationError(_)
            ),
        }
    }

    /// Maps the error to a process exit code for the command line runner.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Stopped { .. } => 130,
            EngineError::ValidationError(_) => 2,
            e if e.is_structural() => 3,
            _ => 1,
        }
    }
}

/// A convenience alias for `Result<T, EngineError>`.
pub type Result<T> = std::result::Result<T, EngineError>;

// ---------------------------------------------------------------------------
// UserError: coded operational failure surfaced to the end user
// ---------------------------------------------------------------------------

/// An operational failure identified by a numeric code from a [`MessageTable`].
///
/// The originating operator may be unknown when the error is built; the
/// engine fills it in at the first operator boundary it crosses.
#[derive(Debug)]
pub struct UserError {
    pub code: u32,
    pub args: Vec<String>,
    pub operator: Option<String>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl UserError {
    pub fn new(code: u32) -> Self {
        Self {
            code,
            args: Vec::new(),
            operator: None,
            cause: None,
        }
    }

    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn caused_by(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Set the originating operator if it is not known yet.
    pub fn with_operator(mut self, operator: &str) -> Self {
        if self.operator.is_none() {
            self.operator = Some(operator.to_string());
        }
        self
    }

    /// Short, templated message from `table`.
    pub fn short_message(&self, table: &MessageTable) -> String {
        match table.lookup(self.code) {
            Some(msg) => format_message(&msg.short, &self.args),
            None => format!("Unknown error code {}", self.code),
        }
    }

    /// Long description from `table`, with the cause appended when present.
    pub fn long_message(&self, table: &MessageTable) -> String {
        let mut text = match table.lookup(self.code) {
            Some(msg) => format_message(&msg.long, &self.args),
            None => String::new(),
        };
        if let Some(cause) = &self.cause {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&format!("Caused by: {cause}"));
        }
        text
    }

    /// Symbolic name of the error code, if the table knows it.
    pub fn name<'t>(&self, table: &'t MessageTable) -> Option<&'t str> {
        table.lookup(self.code).map(|m| m.name.as_str())
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.short_message(MessageTable::builtin());
        match &self.operator {
            Some(op) => write!(f, "Error {} in operator '{}': {}", self.code, op, short),
            None => write!(f, "Error {}: {}", self.code, short),
        }
    }
}

impl std::error::Error for UserError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
