//! Live numeric values exposed by operators.
//!
//! Every operator publishes named values (apply count, elapsed times, and
//! whatever its behaviour adds). Other operators read them through the
//! `%{v[Operator.value]}` macro.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

pub type ValueGetter = Arc<dyn Fn() -> f64 + Send + Sync>;

/// A named value with a live getter.
#[derive(Clone)]
pub struct OperatorValue {
    pub key: String,
    pub description: String,
    pub documented: bool,
    getter: ValueGetter,
}

impl OperatorValue {
    pub fn new(
        key: impl Into<String>,
        description: impl Into<String>,
        getter: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            documented: true,
            getter: Arc::new(getter),
        }
    }

    /// Hide the value from generated documentation.
    pub fn undocumented(mut self) -> Self {
        self.documented = false;
        self
    }

    pub fn get(&self) -> f64 {
        (self.getter)()
    }
}

impl fmt::Debug for OperatorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorValue")
            .field("key", &self.key)
            .field("documented", &self.documented)
            .field("current", &self.get())
            .finish()
    }
}

/// A lock-free `f64` slot shared between an operator behaviour and the
/// getters it publishes.
#[derive(Debug, Clone, Default)]
pub struct ValueCell(Arc<AtomicU64>);

impl ValueCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// A getter reading this cell.
    pub fn getter(&self) -> impl Fn() -> f64 + Send + Sync + 'static {
        let cell = self.clone();
        move || cell.get()
    }
}

/// Process-wide index from operator name to its published values.
#[derive(Debug, Default)]
pub struct ValueRegistry {
    values: RwLock<HashMap<String, Vec<OperatorValue>>>,
}

impl ValueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, operator: &str, values: Vec<OperatorValue>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operator.to_string(), values);
    }

    pub fn unregister(&self, operator: &str) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(operator);
    }

    pub fn clear(&self) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Current value of `key` on `operator`.
    pub fn get(&self, operator: &str, key: &str) -> Option<f64> {
        let guard = self.values.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .get(operator)?
            .iter()
            .find(|v| v.key == key)
            .map(OperatorValue::get)
    }

    /// Names of the values `operator` publishes.
    pub fn keys(&self, operator: &str) -> Vec<String> {
        let guard = self.values.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .get(operator)
            .map(|vals| vals.iter().map(|v| v.key.clone()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, operator: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(operator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getters_are_live() {
        let cell = ValueCell::new();
        let registry = ValueRegistry::new();
        registry.register("Loop", vec![OperatorValue::new("iteration", "", cell.getter())]);
        assert_eq!(registry.get("Loop", "iteration"), Some(0.0));
        cell.set(4.0);
        assert_eq!(registry.get("Loop", "iteration"), Some(4.0));
    }

    #[test]
    fn unknown_operator_or_key() {
        let registry = ValueRegistry::new();
        registry.register("A", vec![OperatorValue::new("x", "", || 1.0)]);
        assert_eq!(registry.get("B", "x"), None);
        assert_eq!(registry.get("A", "y"), None);
        assert_eq!(registry.keys("A"), vec!["x".to_string()]);
        registry.unregister("A");
        assert!(!registry.contains("A"));
    }
}
