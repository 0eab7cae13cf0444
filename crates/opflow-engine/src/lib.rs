//! Operator tree execution engine.
//!
//! This crate runs trees of operators over typed artifact containers:
//! parameter and macro resolution, the operator apply/merge algorithm,
//! operator chains, breakpoints and cooperative stop, static validation,
//! tree serialization, and the built-in operator types.

pub mod apply;
pub mod chain;
pub mod config;
pub mod context;
pub mod control;
pub mod description;
pub mod events;
pub mod macros;
pub mod operator;
pub mod operators;
pub mod parameters;
pub mod process;
pub mod registry;
pub mod tree;
pub mod validation;
pub mod values;

pub use apply::{ApplyContext, ParameterResolver};
pub use chain::{run_children, SimpleChain};
pub use config::EngineConfig;
pub use context::{LogNotifier, Notifier, ProcessContext};
pub use control::{
    BreakpointPosition, Breakpoints, PausePoint, ProcessControl, ProcessController, ProcessState,
};
pub use description::{
    ChainDescription, ConsumePolicy, InnerOperatorCondition, InputPort, MergePolicy,
    OperatorDescription,
};
pub use events::{EventEmitter, ProcessEvent};
pub use macros::{substitute_system, MacroScope, MacroTable};
pub use operator::{BoxFuture, Operator, OperatorBehavior, OperatorStats};
pub use operators::{IoConsumer, IteratingChain, MacroDefinition, PerformanceAverager};
pub use parameters::{ParameterKind, ParameterType, ParameterValue, Parameters};
pub use process::{Process, ProcessRoot};
pub use registry::{default_registry, OperatorFactory, OperatorRegistry};
pub use tree::OperatorRecord;
pub use validation::{
    validate, validate_or_raise, validate_with, Diagnostic, LintRule, Severity, ValidationReport,
};
pub use values::{OperatorValue, ValueCell, ValueRegistry};

pub use opflow_types::{
    Artifact, ArtifactSummary, ContainerModel, EngineError, IoClass, IoContainer, IoObject, Result,
    UserError,
};
