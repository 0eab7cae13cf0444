//! Numeric error codes and their user-facing message templates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

/// One entry of the error-message table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub name: String,
    pub short: String,
    #[serde(default)]
    pub long: String,
}

/// Lookup table from error code to message templates.
///
/// Templates use positional placeholders: `{0}`, `{1}`, ...
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTable {
    entries: HashMap<u32, ErrorMessage>,
}

static BUILTIN: LazyLock<MessageTable> = LazyLock::new(|| {
    let mut table = MessageTable::default();
    for (code, name, short, long) in [
        (
            100,
            "operator_failed",
            "{0}",
            "The operator could not complete its work.",
        ),
        (
            111,
            "missing_input",
            "Operator '{0}' needs an input of class {1}",
            "No artifact of class {1} was available when '{0}' asked for it. \
             Check that a preceding operator produces it and does not consume it.",
        ),
        (
            116,
            "illegal_parameter_value",
            "Illegal value for parameter '{0}': '{1}'",
            "The value '{1}' is not allowed for parameter '{0}'.",
        ),
        (
            205,
            "missing_parameter",
            "Parameter '{0}' must be set",
            "The parameter '{0}' has no default value and must be set before running.",
        ),
        (
            207,
            "incompatible_criteria",
            "Cannot combine performance criterion '{0}' with '{1}'",
            "Only performance criteria of the same kind can be averaged.",
        ),
        (
            301,
            "file_not_found",
            "Cannot read file '{0}'",
            "The file '{0}' does not exist or is not readable.",
        ),
        (
            303,
            "file_write_error",
            "Cannot write file '{0}': {1}",
            "Writing the file '{0}' failed.",
        ),
        (
            320,
            "no_performance",
            "No performance vector produced by the inner operators of '{0}'",
            "The inner operators must deliver a PerformanceVector in every iteration.",
        ),
        (
            926,
            "too_few_inner_operators",
            "Operator chain '{0}' needs at least {1} inner operators",
            "Add inner operators to '{0}'.",
        ),
    ] {
        table.insert(
            code,
            ErrorMessage {
                name: name.to_string(),
                short: short.to_string(),
                long: long.to_string(),
            },
        );
    }
    table
});

impl MessageTable {
    /// The table shipped with the engine.
    pub fn builtin() -> &'static MessageTable {
        &BUILTIN
    }

    /// Parse a table from JSON of the form `{"116": {"name": .., "short": .., "long": ..}}`.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON table from disk.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn lookup(&self, code: u32) -> Option<&ErrorMessage> {
        self.entries.get(&code)
    }

    pub fn insert(&mut self, code: u32, message: ErrorMessage) {
        self.entries.insert(code, message);
    }

    /// Overlay `other` on top of this table; entries in `other` win.
    pub fn extend(&mut self, other: MessageTable) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Substitute positional `{N}` placeholders in `template` with `args[N]`.
///
/// Placeholders whose index is out of range, or that are not numeric, are
/// left as written.
pub fn format_message(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let index: usize = after[..close].parse().ok()?;
            let arg = args.get(index)?;
            Some((arg, close))
        });
        match replaced {
            Some((arg, close)) => {
                out.push_str(arg);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn format_positional_placeholders() {
        assert_eq!(
            format_message("{1} before {0}", &args(&["a", "b"])),
            "b before a"
        );
    }

    #[test]
    fn format_leaves_unknown_placeholders() {
        assert_eq!(
            format_message("{0} {3} {x} {", &args(&["only"])),
            "only {3} {x} {"
        );
    }

    #[test]
    fn format_without_placeholders_is_identity() {
        assert_eq!(format_message("plain text", &[]), "plain text");
    }

    #[test]
    fn builtin_table_has_entries() {
        let table = MessageTable::builtin();
        assert!(!table.is_empty());
        assert_eq!(table.lookup(111).unwrap().name, "missing_input");
        assert!(table.lookup(1).is_none());
    }

    #[test]
    fn load_table_from_json() {
        let json = r#"{"42": {"name": "answer", "short": "The answer is {0}"}}"#;
        let table = MessageTable::from_json(json).unwrap();
        let msg = table.lookup(42).unwrap();
        assert_eq!(msg.name, "answer");
        assert_eq!(msg.long, "");
        assert_eq!(format_message(&msg.short, &args(&["42"])), "The answer is 42");
    }

    #[test]
    fn extend_overrides_entries() {
        let mut table = MessageTable::builtin().clone();
        let custom = MessageTable::from_json(r#"{"116": {"name": "x", "short": "custom"}}"#).unwrap();
        table.extend(custom);
        assert_eq!(table.lookup(116).unwrap().short, "custom");
        assert!(table.lookup(111).is_some());
    }
}
