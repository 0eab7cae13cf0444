//! Typed artifacts: the units of data operators consume and produce.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, RwLock};

// ---------------------------------------------------------------------------
// IoClass: static type descriptor with single inheritance
// ---------------------------------------------------------------------------

/// Static descriptor of an artifact type.
///
/// Classes form a single-inheritance hierarchy rooted at [`IoClass::ANY`].
/// A request for a class is satisfied by any artifact whose class is the
/// same or a descendant.
#[derive(Clone, Copy)]
pub struct IoClass {
    name: &'static str,
    parent: Option<&'static IoClass>,
}

impl IoClass {
    pub const ANY: IoClass = IoClass::root("IOObject");
    pub const MODEL: IoClass = IoClass::new("Model", &IoClass::ANY);
    pub const CONTAINER_MODEL: IoClass = IoClass::new("ContainerModel", &IoClass::MODEL);
    pub const PERFORMANCE_VECTOR: IoClass = IoClass::new("PerformanceVector", &IoClass::ANY);

    pub const fn new(name: &'static str, parent: &'static IoClass) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static IoClass> {
        self.parent
    }

    /// Iterate over this class and all its ancestors, nearest first.
    pub fn lineage(&self) -> impl Iterator<Item = IoClass> {
        let mut next = Some(*self);
        std::iter::from_fn(move || {
            let current = next?;
            next = current.parent.copied();
            Some(current)
        })
    }

    /// `true` if an artifact of this class can be handed to a request for `other`.
    pub fn is_assignable_to(&self, other: &IoClass) -> bool {
        self.lineage().any(|c| c == *other)
    }

    /// Name-based variant of [`is_assignable_to`](Self::is_assignable_to),
    /// for classes named in parameters.
    pub fn is_assignable_to_name(&self, name: &str) -> bool {
        self.lineage().any(|c| c.name == name)
    }
}

impl PartialEq for IoClass {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for IoClass {}

impl Hash for IoClass {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for IoClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for IoClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// IoObject: the payload behind an artifact
// ---------------------------------------------------------------------------

/// Behaviour every artifact payload provides.
pub trait IoObject: fmt::Debug + Send + Sync + 'static {
    fn io_class(&self) -> IoClass;

    fn as_any(&self) -> &dyn Any;

    /// Models held inside this object, for container-like models.
    fn contained_models(&self) -> Option<&[Artifact]> {
        None
    }

    /// JSON rendering used when results are printed or inspected.
    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

// ---------------------------------------------------------------------------
// Artifact: shared handle to an IoObject plus provenance
// ---------------------------------------------------------------------------

struct ArtifactInner {
    object: Box<dyn IoObject>,
    source: OnceLock<String>,
    working_operator: RwLock<Option<String>>,
}

/// A shared, typed data unit.
///
/// Cloning yields another handle to the same artifact. The source label is
/// write-once; the working operator is a plain name used for diagnostics.
#[derive(Clone)]
pub struct Artifact {
    inner: Arc<ArtifactInner>,
}

impl Artifact {
    pub fn new(object: impl IoObject) -> Self {
        Self::from_boxed(Box::new(object))
    }

    pub fn from_boxed(object: Box<dyn IoObject>) -> Self {
        Self {
            inner: Arc::new(ArtifactInner {
                object,
                source: OnceLock::new(),
                working_operator: RwLock::new(None),
            }),
        }
    }

    pub fn io_class(&self) -> IoClass {
        self.inner.object.io_class()
    }

    pub fn is_a(&self, class: &IoClass) -> bool {
        self.io_class().is_assignable_to(class)
    }

    /// A plain model: model-kind, but not itself a model container.
    pub fn is_model(&self) -> bool {
        let class = self.io_class();
        class.is_assignable_to(&IoClass::MODEL) && !class.is_assignable_to(&IoClass::CONTAINER_MODEL)
    }

    pub fn is_container_model(&self) -> bool {
        self.is_a(&IoClass::CONTAINER_MODEL)
    }

    pub fn object(&self) -> &dyn IoObject {
        self.inner.object.as_ref()
    }

    pub fn downcast_ref<T: IoObject>(&self) -> Option<&T> {
        self.inner.object.as_any().downcast_ref::<T>()
    }

    pub fn source(&self) -> Option<&str> {
        self.inner.source.get().map(String::as_str)
    }

    /// Record the producing operator. Returns `false` if a source was already set.
    pub fn set_source_if_unset(&self, operator: &str) -> bool {
        self.inner.source.set(operator.to_string()).is_ok()
    }

    pub fn working_operator(&self) -> Option<String> {
        self.inner
            .working_operator
            .read()
            .ok()
            .and_then(|guard| guard.clone())
    }

    pub fn set_working_operator(&self, operator: &str) {
        if let Ok(mut guard) = self.inner.working_operator.write() {
            *guard = Some(operator.to_string());
        }
    }

    pub fn ptr_eq(&self, other: &Artifact) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Artifact {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("class", &self.io_class())
            .field("source", &self.source())
            .field("object", &self.inner.object)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: IoClass = IoClass::new("ExampleSet", &IoClass::ANY);
    const TREE: IoClass = IoClass::new("TreeModel", &IoClass::MODEL);

    #[derive(Debug)]
    struct Tree(u32);

    impl IoObject for Tree {
        fn io_class(&self) -> IoClass {
            TREE
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn assignability_walks_parents() {
        assert!(TREE.is_assignable_to(&IoClass::MODEL));
        assert!(TREE.is_assignable_to(&IoClass::ANY));
        assert!(!IoClass::MODEL.is_assignable_to(&TREE));
        assert!(!DATA.is_assignable_to(&IoClass::MODEL));
        assert!(IoClass::CONTAINER_MODEL.is_assignable_to_name("Model"));
    }

    #[test]
    fn lineage_is_nearest_first() {
        let names: Vec<_> = IoClass::CONTAINER_MODEL.lineage().map(|c| c.name()).collect();
        assert_eq!(names, vec!["ContainerModel", "Model", "IOObject"]);
    }

    #[test]
    fn source_is_write_once() {
        let a = Artifact::new(Tree(1));
        assert!(a.source().is_none());
        assert!(a.set_source_if_unset("Learner"));
        assert!(!a.set_source_if_unset("Other"));
        assert_eq!(a.source(), Some("Learner"));
    }

    #[test]
    fn clones_share_identity() {
        let a = Artifact::new(Tree(7));
        let b = a.clone();
        assert_eq!(a, b);
        b.set_working_operator("Op");
        assert_eq!(a.working_operator().as_deref(), Some("Op"));
        assert_ne!(a, Artifact::new(Tree(7)));
    }

    #[test]
    fn downcast_and_model_kind() {
        let a = Artifact::new(Tree(3));
        assert_eq!(a.downcast_ref::<Tree>().map(|t| t.0), Some(3));
        assert!(a.is_model());
        assert!(!a.is_container_model());
    }
}
