//! The artifact container handed from operator to operator.

use serde::{Deserialize, Serialize};

use crate::io::{Artifact, IoClass};
use crate::{EngineError, Result};

/// Serializable view of one artifact, used by events and result printing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub class: String,
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

/// Ordered sequence of artifacts.
///
/// The container is value-like: [`remove`](Self::remove) and
/// [`append`](Self::append) return new containers and leave `self` alone.
/// The in-place helpers (`take`, `push_front`, ...) operate on a container
/// the caller owns exclusively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IoContainer {
    artifacts: Vec<Artifact>,
}

impl IoContainer {
    pub fn new(artifacts: Vec<Artifact>) -> Self {
        Self { artifacts }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn as_slice(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn into_vec(self) -> Vec<Artifact> {
        self.artifacts
    }

    /// Index of the `occurrence`-th artifact assignable to `class`.
    pub fn position(&self, class: &IoClass, occurrence: usize) -> Option<usize> {
        self.artifacts
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_a(class))
            .nth(occurrence)
            .map(|(i, _)| i)
    }

    /// Peek at the `occurrence`-th artifact assignable to `class`.
    pub fn get(&self, class: &IoClass, occurrence: usize) -> Result<Artifact> {
        self.position(class, occurrence)
            .map(|i| self.artifacts[i].clone())
            .ok_or_else(|| missing(class, occurrence))
    }

    /// Remove the `occurrence`-th artifact assignable to `class`, returning it
    /// together with a new container that no longer holds it.
    pub fn remove(&self, class: &IoClass, occurrence: usize) -> Result<(Artifact, IoContainer)> {
        let mut rest = self.clone();
        let artifact = rest.take(class, occurrence)?;
        Ok((artifact, rest))
    }

    /// In-place variant of [`remove`](Self::remove).
    pub fn take(&mut self, class: &IoClass, occurrence: usize) -> Result<Artifact> {
        match self.position(class, occurrence) {
            Some(i) => Ok(self.artifacts.remove(i)),
            None => Err(missing(class, occurrence)),
        }
    }

    pub fn contains(&self, class: &IoClass) -> bool {
        self.artifacts.iter().any(|a| a.is_a(class))
    }

    pub fn count(&self, class: &IoClass) -> usize {
        self.artifacts.iter().filter(|a| a.is_a(class)).count()
    }

    /// A new container with `artifacts` in front of the current content.
    pub fn append(&self, artifacts: impl IntoIterator<Item = Artifact>) -> IoContainer {
        let mut out: Vec<Artifact> = artifacts.into_iter().collect();
        out.extend(self.artifacts.iter().cloned());
        IoContainer { artifacts: out }
    }

    /// In-place variant of [`append`](Self::append).
    pub fn push_front(&mut self, artifacts: impl IntoIterator<Item = Artifact>) {
        let tail = std::mem::take(&mut self.artifacts);
        self.artifacts = artifacts.into_iter().collect();
        self.artifacts.extend(tail);
    }

    /// All artifacts assignable to `class`, in container order.
    pub fn get_all(&self, class: &IoClass) -> Vec<Artifact> {
        self.artifacts
            .iter()
            .filter(|a| a.is_a(class))
            .cloned()
            .collect()
    }

    /// Remove and return all artifacts assignable to `class`.
    pub fn remove_all(&mut self, class: &IoClass) -> Vec<Artifact> {
        self.remove_where(|a| a.is_a(class))
    }

    /// Remove and return all artifacts matching `pred`, keeping the order of the rest.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&Artifact) -> bool) -> Vec<Artifact> {
        let (taken, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.artifacts).into_iter().partition(|a| pred(a));
        self.artifacts = kept;
        taken
    }

    /// Replace the artifact at `index`; out-of-range indices are ignored.
    pub fn replace_at(&mut self, index: usize, artifact: Artifact) {
        if let Some(slot) = self.artifacts.get_mut(index) {
            *slot = artifact;
        }
    }

    /// Insert at `index`, clamped to the end of the container.
    pub fn insert(&mut self, index: usize, artifact: Artifact) {
        let index = index.min(self.artifacts.len());
        self.artifacts.insert(index, artifact);
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Artifact> {
        (index < self.artifacts.len()).then(|| self.artifacts.remove(index))
    }

    pub fn summary(&self) -> Vec<ArtifactSummary> {
        self.artifacts
            .iter()
            .map(|a| ArtifactSummary {
                class: a.io_class().name().to_string(),
                source: a.source().map(String::from),
                detail: a.object().to_json(),
            })
            .collect()
    }
}

impl From<Vec<Artifact>> for IoContainer {
    fn from(artifacts: Vec<Artifact>) -> Self {
        Self::new(artifacts)
    }
}

impl FromIterator<Artifact> for IoContainer {
    fn from_iter<I: IntoIterator<Item = Artifact>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

fn missing(class: &IoClass, occurrence: usize) -> EngineError {
    EngineError::MissingInput {
        class: class.name().to_string(),
        occurrence,
        operator: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::IoObject;
    use std::any::Any;

    const DATA: IoClass = IoClass::new("ExampleSet", &IoClass::ANY);
    const TREE: IoClass = IoClass::new("TreeModel", &IoClass::MODEL);

    #[derive(Debug)]
    struct Data(&'static str);

    impl IoObject for Data {
        fn io_class(&self) -> IoClass {
            DATA
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct Tree;

    impl IoObject for Tree {
        fn io_class(&self) -> IoClass {
            TREE
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn label(a: &Artifact) -> &'static str {
        a.downcast_ref::<Data>().map(|d| d.0).unwrap_or("?")
    }

    #[test]
    fn append_then_get_returns_artifact_without_mutating() {
        let c = IoContainer::new(vec![Artifact::new(Tree)]);
        let a = Artifact::new(Data("a"));
        let d = c.append([a.clone()]);
        assert_eq!(d.get(&DATA, 0).unwrap(), a);
        assert_eq!(c.len(), 1);
        assert!(!c.contains(&DATA));
    }

    #[test]
    fn append_prepends_in_order() {
        let c = IoContainer::new(vec![Artifact::new(Data("old"))]);
        let d = c.append([Artifact::new(Data("x")), Artifact::new(Data("y"))]);
        let labels: Vec<_> = d.iter().map(label).collect();
        assert_eq!(labels, vec!["x", "y", "old"]);
    }

    #[test]
    fn remove_same_occurrence_twice_yields_next() {
        let c = IoContainer::new(vec![
            Artifact::new(Data("d0")),
            Artifact::new(Tree),
            Artifact::new(Data("d1")),
            Artifact::new(Data("d2")),
        ]);
        let (first, c1) = c.remove(&DATA, 1).unwrap();
        assert_eq!(label(&first), "d1");
        let (second, c2) = c1.remove(&DATA, 1).unwrap();
        assert_eq!(label(&second), "d2");
        assert_eq!(c2.len(), 2);
        // Original container is untouched.
        assert_eq!(c.count(&DATA), 3);
    }

    #[test]
    fn get_missing_occurrence_fails_with_class() {
        let c = IoContainer::new(vec![Artifact::new(Data("only"))]);
        match c.get(&DATA, 1) {
            Err(EngineError::MissingInput {
                class, occurrence, ..
            }) => {
                assert_eq!(class, "ExampleSet");
                assert_eq!(occurrence, 1);
            }
            other => panic!("expected MissingInput, got {other:?}"),
        }
        assert!(c.get(&IoClass::MODEL, 0).is_err());
    }

    #[test]
    fn parent_class_matches_subclasses() {
        let c = IoContainer::new(vec![Artifact::new(Data("d")), Artifact::new(Tree)]);
        assert!(c.contains(&IoClass::MODEL));
        assert_eq!(c.get(&IoClass::ANY, 1).unwrap().io_class(), TREE);
        assert_eq!(c.count(&IoClass::ANY), 2);
    }

    #[test]
    fn remove_all_keeps_other_order() {
        let mut c = IoContainer::new(vec![
            Artifact::new(Data("a")),
            Artifact::new(Tree),
            Artifact::new(Data("b")),
            Artifact::new(Tree),
        ]);
        let trees = c.remove_all(&TREE);
        assert_eq!(trees.len(), 2);
        let labels: Vec<_> = c.iter().map(label).collect();
        assert_eq!(labels, vec!["a", "b"]);
    }

    #[test]
    fn summary_lists_class_and_source() {
        let a = Artifact::new(Data("a"));
        a.set_source_if_unset("Reader");
        let c = IoContainer::new(vec![a]);
        let summary = c.summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].class, "ExampleSet");
        assert_eq!(summary[0].source.as_deref(), Some("Reader"));
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("detail"));
    }
}
