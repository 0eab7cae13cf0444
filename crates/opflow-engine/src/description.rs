//! Static description of an operator type: its I/O contract, its parameters,
//! and for chains the shape its children must have.

use opflow_types::IoClass;

use crate::parameters::ParameterType;

/// What happens to an input artifact once the operator has read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumePolicy {
    /// The artifact stays in the container.
    Keep,
    /// The artifact is removed from the container.
    Consume,
    /// Decided per operator by the boolean parameter `keep_<class>`.
    Parameter { default_keep: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputPort {
    pub class: IoClass,
    pub policy: ConsumePolicy,
}

impl InputPort {
    /// `keep_performance_vector` for class `PerformanceVector`.
    pub fn keep_parameter_key(&self) -> String {
        keep_parameter_key(&self.class)
    }
}

pub fn keep_parameter_key(class: &IoClass) -> String {
    let mut key = String::from("keep_");
    for (i, c) in class.name().chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                key.push('_');
            }
            key.push(c.to_ascii_lowercase());
        } else {
            key.push(c);
        }
    }
    key
}

/// How produced artifacts are combined with what is left of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Produced artifacts are prepended to the remaining input.
    #[default]
    Prepend,
    /// Only the produced artifacts are returned.
    OnlyNew,
}

/// Class contract the children of a chain must jointly satisfy.
#[derive(Debug, Clone, PartialEq)]
pub enum InnerOperatorCondition {
    /// Children run in sequence from the chain's input and must deliver `required`.
    Chain { required: Vec<IoClass> },
    /// Every child receives `input` on its own and must deliver `required`.
    Each {
        input: Vec<IoClass>,
        required: Vec<IoClass>,
    },
    Unconstrained,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainDescription {
    pub min_children: usize,
    pub max_children: Option<usize>,
    pub condition: InnerOperatorCondition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorDescription {
    pub type_name: String,
    pub group: String,
    pub summary: String,
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<IoClass>,
    pub parameters: Vec<ParameterType>,
    pub chain: Option<ChainDescription>,
    pub merge_policy: MergePolicy,
}

impl OperatorDescription {
    /// A leaf operator.
    pub fn operator(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            group: String::new(),
            summary: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
            chain: None,
            merge_policy: MergePolicy::Prepend,
        }
    }

    /// A chain accepting between `min` and `max` children.
    pub fn chain(
        type_name: impl Into<String>,
        min: usize,
        max: Option<usize>,
        condition: InnerOperatorCondition,
    ) -> Self {
        Self {
            chain: Some(ChainDescription {
                min_children: min,
                max_children: max,
                condition,
            }),
            merge_policy: MergePolicy::OnlyNew,
            ..Self::operator(type_name)
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Declare an input that is consumed when read.
    pub fn input(mut self, class: IoClass) -> Self {
        self.inputs.push(InputPort {
            class,
            policy: ConsumePolicy::Consume,
        });
        self
    }

    /// Declare an input that stays in the container when read.
    pub fn keep_input(mut self, class: IoClass) -> Self {
        self.inputs.push(InputPort {
            class,
            policy: ConsumePolicy::Keep,
        });
        self
    }

    /// Declare an input whose consumption the user decides; adds the
    /// corresponding `keep_<class>` boolean parameter.
    pub fn optional_keep_input(mut self, class: IoClass, default_keep: bool) -> Self {
        let port = InputPort {
            class,
            policy: ConsumePolicy::Parameter { default_keep },
        };
        self.parameters.push(ParameterType::boolean(
            port.keep_parameter_key(),
            format!("Keep the {} input in the container.", class.name()),
            default_keep,
        ));
        self.inputs.push(port);
        self
    }

    pub fn output(mut self, class: IoClass) -> Self {
        self.outputs.push(class);
        self
    }

    pub fn parameter(mut self, parameter: ParameterType) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    pub fn is_chain(&self) -> bool {
        self.chain.is_some()
    }

    pub fn parameter_type(&self, key: &str) -> Option<&ParameterType> {
        self.parameters.iter().find(|p| p.key == key)
    }

    /// The declared port for `class`, matching by assignability.
    pub fn input_port(&self, class: &IoClass) -> Option<&InputPort> {
        self.inputs
            .iter()
            .find(|p| p.class == *class)
            .or_else(|| self.inputs.iter().find(|p| class.is_assignable_to(&p.class)))
    }
}
