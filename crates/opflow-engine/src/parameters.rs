//! Typed operator parameters.
//!
//! A [`ParameterType`] declares a key, its kind, whether it is optional and
//! its default. [`Parameters`] holds the values actually set on an operator.
//! Values are stored as text (or nested key/value lists) exactly as they
//! appear in a process file; typing happens at retrieval time so that macros
//! can be substituted first.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ParameterValue
// ---------------------------------------------------------------------------

/// A raw parameter value: text, or an ordered list of key/value pairs whose
/// values may themselves be lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Text(String),
    List(Vec<(String, ParameterValue)>),
}

impl ParameterValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParameterValue::Text(s) => Some(s),
            ParameterValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[(String, ParameterValue)]> {
        match self {
            ParameterValue::List(items) => Some(items),
            ParameterValue::Text(_) => None,
        }
    }

    /// Apply `f` to every text value, descending into lists.
    pub fn map_text(&self, f: &impl Fn(&str) -> String) -> ParameterValue {
        match self {
            ParameterValue::Text(s) => ParameterValue::Text(f(s)),
            ParameterValue::List(items) => ParameterValue::List(
                items
                    .iter()
                    .map(|(k, v)| (k.clone(), v.map_text(f)))
                    .collect(),
            ),
        }
    }

    /// Compact textual rendering used in diagnostics.
    pub fn display(&self) -> String {
        match self {
            ParameterValue::Text(s) => s.clone(),
            ParameterValue::List(items) => {
                let inner: Vec<String> = items
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v.display()))
                    .collect();
                format!("[{}]", inner.join(", "))
            }
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(s: &str) -> Self {
        ParameterValue::Text(s.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(s: String) -> Self {
        ParameterValue::Text(s)
    }
}

impl From<Vec<(String, ParameterValue)>> for ParameterValue {
    fn from(items: Vec<(String, ParameterValue)>) -> Self {
        ParameterValue::List(items)
    }
}

// ---------------------------------------------------------------------------
// ParameterKind / ParameterType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterKind {
    Boolean,
    Integer { min: i64, max: i64 },
    Real { min: f64, max: f64 },
    String,
    Category(Vec<String>),
    File,
    /// List of key/value pairs; the kind describes the values.
    List(Box<ParameterKind>),
}

impl ParameterKind {
    pub fn name(&self) -> &'static str {
        match self {
            ParameterKind::Boolean => "boolean",
            ParameterKind::Integer { .. } => "integer",
            ParameterKind::Real { .. } => "real",
            ParameterKind::String => "string",
            ParameterKind::Category(_) => "category",
            ParameterKind::File => "file",
            ParameterKind::List(_) => "list",
        }
    }

    /// Check a raw value against this kind.
    pub fn check(&self, value: &ParameterValue) -> Result<(), String> {
        match (self, value) {
            (ParameterKind::List(inner), ParameterValue::List(items)) => {
                for (k, v) in items {
                    inner.check(v).map_err(|e| format!("entry '{k}': {e}"))?;
                }
                Ok(())
            }
            (ParameterKind::List(_), ParameterValue::Text(_)) => {
                Err("expected a list of key/value pairs".into())
            }
            (_, ParameterValue::List(_)) => Err(format!("expected a {} value, found a list", self.name())),
            (kind, ParameterValue::Text(text)) => kind.check_text(text),
        }
    }

    fn check_text(&self, text: &str) -> Result<(), String> {
        match self {
            ParameterKind::Boolean => parse_bool(text).map(|_| ()),
            ParameterKind::Integer { min, max } => {
                let v: i64 = text
                    .trim()
                    .parse()
                    .map_err(|_| "expected an integer".to_string())?;
                if v < *min || v > *max {
                    return Err(format!("must be between {min} and {max}"));
                }
                Ok(())
            }
            ParameterKind::Real { min, max } => {
                let v: f64 = text
                    .trim()
                    .parse()
                    .map_err(|_| "expected a real number".to_string())?;
                if v < *min || v > *max {
                    return Err(format!("must be between {min} and {max}"));
                }
                Ok(())
            }
            ParameterKind::Category(values) => {
                if values.iter().any(|v| v == text) {
                    Ok(())
                } else {
                    Err(format!("must be one of {}", values.join(", ")))
                }
            }
            ParameterKind::String | ParameterKind::File | ParameterKind::List(_) => Ok(()),
        }
    }
}

pub(crate) fn parse_bool(text: &str) -> Result<bool, String> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err("expected true or false".into()),
    }
}

/// Declaration of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterType {
    pub key: String,
    pub description: String,
    pub kind: ParameterKind,
    pub optional: bool,
    pub default: Option<ParameterValue>,
}

impl ParameterType {
    pub fn new(key: impl Into<String>, description: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            kind,
            optional: false,
            default: None,
        }
    }

    pub fn boolean(key: impl Into<String>, description: impl Into<String>, default: bool) -> Self {
        Self::new(key, description, ParameterKind::Boolean).with_default(default.to_string())
    }

    pub fn integer(
        key: impl Into<String>,
        description: impl Into<String>,
        min: i64,
        max: i64,
        default: Option<i64>,
    ) -> Self {
        let ty = Self::new(key, description, ParameterKind::Integer { min, max });
        match default {
            Some(d) => ty.with_default(d.to_string()),
            None => ty,
        }
    }

    pub fn real(
        key: impl Into<String>,
        description: impl Into<String>,
        min: f64,
        max: f64,
        default: Option<f64>,
    ) -> Self {
        let ty = Self::new(key, description, ParameterKind::Real { min, max });
        match default {
            Some(d) => ty.with_default(d.to_string()),
            None => ty,
        }
    }

    pub fn string(key: impl Into<String>, description: impl Into<String>, default: Option<&str>) -> Self {
        let ty = Self::new(key, description, ParameterKind::String);
        match default {
            Some(d) => ty.with_default(d),
            None => ty,
        }
    }

    /// A category parameter; `default` indexes into `values`.
    pub fn category(
        key: impl Into<String>,
        description: impl Into<String>,
        values: &[&str],
        default: usize,
    ) -> Self {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        let default_value = values.get(default).cloned();
        let ty = Self::new(key, description, ParameterKind::Category(values));
        match default_value {
            Some(d) => ty.with_default(d),
            None => ty,
        }
    }

    pub fn file(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(key, description, ParameterKind::File)
    }

    pub fn list(key: impl Into<String>, description: impl Into<String>, values: ParameterKind) -> Self {
        Self::new(key, description, ParameterKind::List(Box::new(values)))
            .with_default(ParameterValue::List(Vec::new()))
    }

    pub fn with_default(mut self, default: impl Into<ParameterValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Parameters: values set on one operator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    values: BTreeMap<String, ParameterValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParameterValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ParameterValue> {
        self.values.remove(key)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<String, ParameterValue> {
        self.values.clone()
    }
}

impl From<BTreeMap<String, ParameterValue>> for Parameters {
    fn from(values: BTreeMap<String, ParameterValue>) -> Self {
        Self { values }
    }
}
