use std::any::Any;

use crate::io::{Artifact, IoClass, IoObject};

/// A model artifact that groups other models in production order.
///
/// Operators never emit bare sibling models: the merge step folds every
/// produced model into the nearest `ContainerModel`.
#[derive(Debug, Clone, Default)]
pub struct ContainerModel {
    models: Vec<Artifact>,
}

impl ContainerModel {
    pub fn new(models: Vec<Artifact>) -> Self {
        Self { models }
    }

    pub fn models(&self) -> &[Artifact] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// A new container holding this container's models followed by `more`.
    pub fn with_appended(&self, more: impl IntoIterator<Item = Artifact>) -> Self {
        let mut models = self.models.clone();
        models.extend(more);
        Self { models }
    }
}

impl IoObject for ContainerModel {
    fn io_class(&self) -> IoClass {
        IoClass::CONTAINER_MODEL
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn contained_models(&self) -> Option<&[Artifact]> {
        Some(&self.models)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.models
                .iter()
                .map(|m| {
                    serde_json::json!({
                        "class": m.io_class().name(),
                        "source": m.source(),
                    })
                })
                .collect(),
        )
    }
}
