//! Operator tree records and their XML and JSON encodings.
//!
//! XML shape:
//!
//! ```xml
//! <process version="0.5.0">
//!   <operator name="Root" class="Process" expanded="yes">
//!     <description>text</description>
//!     <parameter key="random_seed" value="42"/>
//!     <list key="macros">
//!       <parameter key="run" value="3"/>
//!     </list>
//!     <operator name="Inner" class="OperatorChain" activated="no" breakpoints="before,after"/>
//!   </operator>
//! </process>
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use opflow_types::{EngineError, Result};
use opflow_xml::XmlElement;

use crate::control::{BreakpointPosition, Breakpoints};
use crate::operator::Operator;
use crate::parameters::ParameterValue;
use crate::registry::OperatorRegistry;

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// Serialisable form of one operator and its subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorRecord {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breakpoints: Vec<BreakpointPosition>,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub expanded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<OperatorRecord>>,
}

impl OperatorRecord {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
            breakpoints: Vec::new(),
            enabled: true,
            expanded: true,
            description: None,
            parameters: BTreeMap::new(),
            children: None,
        }
    }

    pub fn from_operator(operator: &Operator) -> Self {
        Self {
            type_name: operator.type_name().to_string(),
            name: operator.name().to_string(),
            breakpoints: operator.breakpoints().positions(),
            enabled: operator.is_enabled(),
            expanded: operator.is_expanded(),
            description: operator.user_description().map(String::from),
            parameters: operator.parameters().to_map(),
            children: operator
                .is_chain()
                .then(|| operator.children().iter().map(Self::from_operator).collect()),
        }
    }

    /// Instantiate the subtree from `registry`.
    pub fn build(&self, registry: &OperatorRegistry) -> Result<Operator> {
        let mut operator = registry.create(&self.type_name, &self.name)?;
        operator.set_enabled(self.enabled);
        operator.set_expanded(self.expanded);
        operator.set_user_description(self.description.clone());
        operator.set_breakpoints(self.breakpoints.iter().copied().collect::<Breakpoints>());
        for (key, value) in &self.parameters {
            operator.set_parameter(key.clone(), value.clone());
        }
        let children = self.children.as_deref().unwrap_or_default();
        if !children.is_empty() && !operator.is_chain() {
            return Err(EngineError::NotAChain {
                operator: self.name.clone(),
            });
        }
        for child in children {
            operator.add_child(child.build(registry)?)?;
        }
        Ok(operator)
    }

    // -- XML ----------------------------------------------------------------

    pub fn to_xml_element(&self) -> XmlElement {
        let mut element = XmlElement::new("operator")
            .with_attr("name", &self.name)
            .with_attr("class", &self.type_name);
        if !self.breakpoints.is_empty() {
            let list: Vec<&str> = self.breakpoints.iter().map(|b| b.as_str()).collect();
            element.set_attr("breakpoints", list.join(","));
        }
        if !self.enabled {
            element.set_attr("activated", "no");
        }
        element.set_attr("expanded", if self.expanded { "yes" } else { "no" });
        if let Some(text) = &self.description {
            element = element.with_child(XmlElement::new("description").with_text(text));
        }
        for (key, value) in &self.parameters {
            element = element.with_child(parameter_element(key, value));
        }
        for child in self.children.iter().flatten() {
            element = element.with_child(child.to_xml_element());
        }
        element
    }

    pub fn from_xml_element(element: &XmlElement) -> Result<Self> {
        if element.name != "operator" {
            return Err(malformed(format!(
                "expected <operator>, found <{}>",
                element.name
            )));
        }
        let name = required_attr(element, "name")?;
        let type_name = required_attr(element, "class")?;
        let mut record = OperatorRecord::new(type_name, name);

        record.enabled = element.attr("activated").map_or(Ok(true), |v| yes_no(v, "activated"))?;
        record.expanded = element.attr("expanded").map_or(Ok(true), |v| yes_no(v, "expanded"))?;
        if let Some(list) = element.attr("breakpoints") {
            for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let position = BreakpointPosition::parse(item)
                    .ok_or_else(|| malformed(format!("unknown breakpoint position '{item}'")))?;
                if !record.breakpoints.contains(&position) {
                    record.breakpoints.push(position);
                }
            }
        }

        let mut children = Vec::new();
        for child in &element.children {
            match child.name.as_str() {
                "description" => record.description = Some(child.text.clone()),
                "parameter" | "list" => {
                    let (key, value) = parameter_from_element(child)?;
                    record.parameters.insert(key, value);
                }
                "operator" => children.push(OperatorRecord::from_xml_element(child)?),
                other => {
                    tracing::warn!(operator = %record.name, element = %other, "Ignoring unknown element");
                }
            }
        }
        if !children.is_empty() {
            record.children = Some(children);
        }
        Ok(record)
    }
}

fn parameter_element(key: &str, value: &ParameterValue) -> XmlElement {
    match value {
        ParameterValue::Text(text) => XmlElement::new("parameter")
            .with_attr("key", key)
            .with_attr("value", text),
        ParameterValue::List(items) => items.iter().fold(
            XmlElement::new("list").with_attr("key", key),
            |list, (k, v)| list.with_child(parameter_element(k, v)),
        ),
    }
}

fn parameter_from_element(element: &XmlElement) -> Result<(String, ParameterValue)> {
    let key = required_attr(element, "key")?;
    if element.name == "list" {
        let items = element
            .children
            .iter()
            .filter(|c| c.name == "parameter" || c.name == "list")
            .map(parameter_from_element)
            .collect::<Result<Vec<_>>>()?;
        Ok((key, ParameterValue::List(items)))
    } else {
        let value = required_attr(element, "value")?;
        Ok((key, ParameterValue::Text(value)))
    }
}

fn required_attr(element: &XmlElement, key: &str) -> Result<String> {
    element
        .attr(key)
        .map(String::from)
        .ok_or_else(|| malformed(format!("<{}> without '{}' attribute", element.name, key)))
}

fn yes_no(value: &str, attr: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        _ => Err(malformed(format!("attribute '{attr}' must be yes or no, got '{value}'"))),
    }
}

fn malformed(message: String) -> EngineError {
    EngineError::Other(format!("Malformed process file: {message}"))
}

// ---------------------------------------------------------------------------
// Whole documents
// ---------------------------------------------------------------------------

pub fn process_to_xml(root: &OperatorRecord) -> String {
    let document = XmlElement::new("process")
        .with_attr("version", env!("CARGO_PKG_VERSION"))
        .with_child(root.to_xml_element());
    opflow_xml::to_string(&document)
}

/// Parse a process document. A bare `<operator>` root is accepted as well.
pub fn process_from_xml(text: &str) -> Result<OperatorRecord> {
    let document = opflow_xml::parse(text)?;
    let root = match document.name.as_str() {
        "process" => document
            .child("operator")
            .ok_or_else(|| malformed("<process> has no root <operator>".into()))?,
        "operator" => &document,
        other => return Err(malformed(format!("unexpected root element <{other}>"))),
    };
    OperatorRecord::from_xml_element(root)
}

pub fn process_to_json(root: &OperatorRecord) -> Result<String> {
    Ok(serde_json::to_string_pretty(root)?)
}

pub fn process_from_json(text: &str) -> Result<OperatorRecord> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_registry;

    fn sample() -> OperatorRecord {
        let mut macros = OperatorRecord::new("MacroDefinition", "Macros");
        macros.parameters.insert(
            "macros".into(),
            ParameterValue::List(vec![
                ("run".into(), "3".into()),
                (
                    "nested".into(),
                    ParameterValue::List(vec![("a".into(), "1 & 2".into())]),
                ),
            ]),
        );
        let mut disabled = OperatorRecord::new("IOConsumer", "Drop");
        disabled.enabled = false;
        disabled.breakpoints = vec![BreakpointPosition::Before, BreakpointPosition::After];
        disabled.parameters.insert("io_object".into(), "Model".into());

        let mut inner = OperatorRecord::new("OperatorChain", "Inner");
        inner.expanded = false;
        inner.children = Some(vec![disabled]);

        let mut root = OperatorRecord::new("Process", "Root");
        root.description = Some("A <small> test".into());
        root.parameters.insert("random_seed".into(), "42".into());
        root.children = Some(vec![macros, inner]);
        root
    }

    #[test]
    fn xml_round_trip() {
        let record = sample();
        let xml = process_to_xml(&record);
        assert!(xml.contains(r#"breakpoints="before,after""#));
        assert!(xml.contains(r#"activated="no""#));
        let back = process_from_xml(&xml).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn json_round_trip() {
        let record = sample();
        let json = process_to_json(&record).unwrap();
        assert!(json.contains("\"type\": \"Process\""));
        let back = process_from_json(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn build_restores_operator_state() {
        let registry = default_registry();
        let root = sample().build(&registry).unwrap();
        let drop = root.find("Drop").unwrap();
        assert!(!drop.is_enabled());
        assert!(drop.breakpoints().is_set(BreakpointPosition::Before));
        assert!(!drop.breakpoints().is_set(BreakpointPosition::Within));
        assert_eq!(OperatorRecord::from_operator(&root), sample());
    }

    #[test]
    fn unknown_type_is_reported() {
        let registry = default_registry();
        let err = OperatorRecord::new("NoSuchLearner", "X").build(&registry).unwrap_err();
        match err {
            EngineError::UnknownOperatorType { type_name } => assert_eq!(type_name, "NoSuchLearner"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn leaf_with_children_is_rejected() {
        let registry = default_registry();
        let mut leaf = OperatorRecord::new("IOConsumer", "Drop");
        leaf.children = Some(vec![OperatorRecord::new("OperatorChain", "Inner")]);
        let err = leaf.build(&registry).unwrap_err();
        assert!(matches!(err, EngineError::NotAChain { operator } if operator == "Drop"));
    }

    #[test]
    fn malformed_document() {
        assert!(process_from_xml("<process><operator class=\"Process\"/></process>").is_err());
        assert!(process_from_xml("<graph/>").is_err());
    }
}
