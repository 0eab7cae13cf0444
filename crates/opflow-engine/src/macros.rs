//! Macro substitution for string parameters.
//!
//! Two passes run in order over every string parameter value:
//! 1. user macros `%{name}` from the process-wide [`MacroTable`];
//! 2. system placeholders describing the operator reading the parameter.
//!
//! Tokens neither pass recognises are left as written.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::{LazyLock, PoisonError, RwLock};

use regex::{Captures, Regex};

use crate::values::ValueRegistry;

static MACRO_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\{([^}]*)\}").unwrap());

/// The operator a string is resolved for.
pub struct MacroScope<'a> {
    pub name: &'a str,
    pub type_name: &'a str,
    pub apply_count: u64,
    pub values: &'a ValueRegistry,
    pub timestamp_format: &'a str,
}

/// Process-wide user macros, cleared at the start of every run.
#[derive(Debug, Default)]
pub struct MacroTable {
    macros: RwLock<HashMap<String, String>>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, name: impl Into<String>, value: impl Into<String>) {
        self.macros
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.macros
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.macros
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn clear(&self) {
        self.macros
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.macros
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Run both substitution passes over `text`.
    pub fn resolve(&self, text: &str, scope: &MacroScope<'_>) -> String {
        let user = self.substitute_user(text);
        substitute_system(&user, scope)
    }

    /// Replace `%{name}` with the value of user macro `name`.
    pub fn substitute_user(&self, text: &str) -> String {
        if !text.contains("%{") {
            return text.to_string();
        }
        let macros = self.macros.read().unwrap_or_else(PoisonError::into_inner);
        MACRO_TOKEN
            .replace_all(text, |caps: &Captures| match macros.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// Replace the system placeholders:
///
/// | token | value |
/// |---|---|
/// | `%{n}` | operator name |
/// | `%{c}` | operator type name |
/// | `%{a}` | apply count |
/// | `%{b}` | apply count + 1 |
/// | `%{p[N]}` | apply count + N |
/// | `%{t}` | current local time |
/// | `%{v[Op.value]}` | live value `value` of operator `Op` |
/// | `%{%}` | `%` |
pub fn substitute_system(text: &str, scope: &MacroScope<'_>) -> String {
    if !text.contains("%{") {
        return text.to_string();
    }
    MACRO_TOKEN
        .replace_all(text, |caps: &Captures| {
            system_value(&caps[1], scope).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn system_value(token: &str, scope: &MacroScope<'_>) -> Option<String> {
    match token {
        "n" => Some(scope.name.to_string()),
        "c" => Some(scope.type_name.to_string()),
        "a" => Some(scope.apply_count.to_string()),
        "b" => scope.apply_count.checked_add(1).map(|n| n.to_string()),
        "t" => {
            let mut out = String::new();
            write!(out, "{}", chrono::Local::now().format(scope.timestamp_format)).ok()?;
            Some(out)
        }
        "%" => Some("%".to_string()),
        _ => {
            if let Some(offset) = bracketed(token, "p") {
                let offset: i64 = offset.trim().parse().ok()?;
                i64::try_from(scope.apply_count)
                    .ok()?
                    .checked_add(offset)
                    .map(|n| n.to_string())
            } else if let Some(reference) = bracketed(token, "v") {
                let (operator, key) = reference.rsplit_once('.')?;
                scope.values.get(operator, key).map(format_number)
            } else {
                None
            }
        }
    }
}

/// `X[inner]` → `inner`.
fn bracketed<'t>(token: &'t str, prefix: &str) -> Option<&'t str> {
    token.strip_prefix(prefix)?.strip_prefix('[')?.strip_suffix(']')
}

/// Integral values print without a fractional part.
pub(crate) fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::OperatorValue;

    fn scope<'a>(values: &'a ValueRegistry) -> MacroScope<'a> {
        MacroScope {
            name: "Foo",
            type_name: "IOConsumer",
            apply_count: 3,
            values,
            timestamp_format: "%Y",
        }
    }

    #[test]
    fn system_forms() {
        let values = ValueRegistry::new();
        let s = scope(&values);
        assert_eq!(substitute_system("%{n}", &s), "Foo");
        assert_eq!(substitute_system("%{c}", &s), "IOConsumer");
        assert_eq!(substitute_system("%{a}", &s), "3");
        assert_eq!(substitute_system("%{b}", &s), "4");
        assert_eq!(substitute_system("%{p[5]}", &s), "8");
        assert_eq!(substitute_system("%{p[-1]}", &s), "2");
        assert_eq!(
            substitute_system("%{p[9223372036854775807]}", &s),
            "%{p[9223372036854775807]}"
        );
        assert_eq!(substitute_system("%{%}", &s), "%");
        assert_eq!(substitute_system("run_%{n}_%{a}.log", &s), "run_Foo_3.log");
    }

    #[test]
    fn timestamp_uses_configured_format() {
        let values = ValueRegistry::new();
        let year = substitute_system("%{t}", &scope(&values));
        assert_eq!(year.len(), 4);
        assert!(year.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn value_lookup_across_operators() {
        let values = ValueRegistry::new();
        values.register("Loop.Outer", vec![OperatorValue::new("iteration", "", || 7.0)]);
        values.register("Eval", vec![OperatorValue::new("fitness", "", || 0.25)]);
        let s = scope(&values);
        assert_eq!(substitute_system("%{v[Loop.Outer.iteration]}", &s), "7");
        assert_eq!(substitute_system("%{v[Eval.fitness]}", &s), "0.25");
        assert_eq!(substitute_system("%{v[Missing.x]}", &s), "%{v[Missing.x]}");
    }

    #[test]
    fn unknown_forms_are_left_alone() {
        let values = ValueRegistry::new();
        let s = scope(&values);
        assert_eq!(substitute_system("%{zzz} %{p[x]} %{", &s), "%{zzz} %{p[x]} %{");
    }

    #[test]
    fn token_free_strings_are_untouched() {
        let table = MacroTable::new();
        table.define("n", "shadow");
        let values = ValueRegistry::new();
        for text in ["", "plain", "100% sure", "{n}", "%n"] {
            assert_eq!(table.resolve(text, &scope(&values)), text);
        }
    }

    #[test]
    fn user_macros_then_system() {
        let table = MacroTable::new();
        table.define("dir", "/tmp/%{n}");
        let values = ValueRegistry::new();
        assert_eq!(
            table.resolve("%{dir}/out_%{b}.csv", &scope(&values)),
            "/tmp/Foo/out_4.csv"
        );
        assert_eq!(table.resolve("%{undefined}", &scope(&values)), "%{undefined}");
    }

    #[test]
    fn table_snapshot_and_clear() {
        let table = MacroTable::new();
        table.define("a", "1");
        table.define("b", "2");
        assert_eq!(table.snapshot().len(), 2);
        assert_eq!(table.remove("a").as_deref(), Some("1"));
        table.clear();
        assert!(table.get("b").is_none());
    }
}
