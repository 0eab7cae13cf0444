//! Built-in operator types.

pub mod io_consumer;
pub mod iterating_chain;
pub mod macro_definition;
pub mod performance_averager;

pub use io_consumer::IoConsumer;
pub use iterating_chain::IteratingChain;
pub use macro_definition::MacroDefinition;
pub use performance_averager::{merge_performance, PerformanceAverager};
