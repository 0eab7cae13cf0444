//! Operator registry: type name → description and behaviour factory.

use std::collections::BTreeMap;
use std::sync::Arc;

use opflow_types::{EngineError, Result};

use crate::chain::SimpleChain;
use crate::description::OperatorDescription;
use crate::operator::{Operator, OperatorBehavior};
use crate::operators::{
    IoConsumer, IteratingChain, MacroDefinition, PerformanceAverager,
};
use crate::process::ProcessRoot;

pub type OperatorFactory = Arc<dyn Fn() -> Box<dyn OperatorBehavior> + Send + Sync>;

struct RegistryEntry {
    description: Arc<OperatorDescription>,
    factory: OperatorFactory,
}

// ---------------------------------------------------------------------------
// OperatorRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct OperatorRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operator type. A later registration under the same type
    /// name replaces the earlier one.
    pub fn register(
        &mut self,
        description: OperatorDescription,
        factory: impl Fn() -> Box<dyn OperatorBehavior> + Send + Sync + 'static,
    ) {
        let type_name = description.type_name.clone();
        if self.entries.contains_key(&type_name) {
            tracing::warn!(type_name = %type_name, "Replacing registered operator type");
        }
        self.entries.insert(
            type_name,
            RegistryEntry {
                description: Arc::new(description),
                factory: Arc::new(factory),
            },
        );
    }

    pub fn has(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn description(&self, type_name: &str) -> Option<&OperatorDescription> {
        self.entries.get(type_name).map(|e| e.description.as_ref())
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn descriptions(&self) -> impl Iterator<Item = &OperatorDescription> {
        self.entries.values().map(|e| e.description.as_ref())
    }

    /// A fresh operator of `type_name` called `name`.
    pub fn create(&self, type_name: &str, name: &str) -> Result<Operator> {
        let entry = self
            .entries
            .get(type_name)
            .ok_or_else(|| EngineError::UnknownOperatorType {
                type_name: type_name.to_string(),
            })?;
        Ok(Operator::new(name, entry.description.clone(), (entry.factory)()))
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

// ---------------------------------------------------------------------------
// Default registry factory
// ---------------------------------------------------------------------------

/// A registry holding the built-in operator types.
pub fn default_registry() -> OperatorRegistry {
    let mut reg = OperatorRegistry::new();
    reg.register(ProcessRoot::description(), || Box::new(ProcessRoot));
    reg.register(SimpleChain::description(), || Box::new(SimpleChain));
    reg.register(IteratingChain::description(), || Box::new(IteratingChain::new()));
    reg.register(MacroDefinition::description(), || Box::new(MacroDefinition));
    reg.register(IoConsumer::description(), || Box::new(IoConsumer));
    reg.register(PerformanceAverager::description(), || Box::new(PerformanceAverager));
    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_builtins() {
        let reg = default_registry();
        for name in [
            "Process",
            "OperatorChain",
            "IteratingOperatorChain",
            "MacroDefinition",
            "IOConsumer",
            "PerformanceAverager",
        ] {
            assert!(reg.has(name), "missing {name}");
        }
        assert!(reg.description("Process").unwrap().is_chain());
    }

    #[test]
    fn create_uses_description() {
        let reg = default_registry();
        let op = reg.create("OperatorChain", "Outer").unwrap();
        assert_eq!(op.name(), "Outer");
        assert_eq!(op.type_name(), "OperatorChain");
        assert!(op.is_chain());
    }

    #[test]
    fn unknown_type() {
        let reg = OperatorRegistry::new();
        assert!(matches!(
            reg.create("Nope", "x"),
            Err(EngineError::UnknownOperatorType { .. })
        ));
    }
}
