// Per-session registry of game objects.
//
// A flat arena + index: every game object is registered here under a stable
// id, and everything else (graph attributes, order arguments, other objects'
// attributes) refers to it by that id only. The serializer resolves wire ids
// through this map, which is what lets the property graph stay a tree even
// when entities reference each other.
//
// Ids are decimal strings from a monotonic counter and are never reused
// within a session, not even when a faulted dispatch is rolled back: the
// rollback forgets the objects it created (`release_since`) but leaves the
// counter where it was, and remembers their ids so neither the counter nor
// an explicit `create_with_id` can hand them out again.

use std::collections::{BTreeMap, BTreeSet};

use arena_protocol::types::ObjectId;

use crate::error::SchemaError;
use crate::schema::GameSchema;

/// A registered game object: its id and class chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameObject {
    id: ObjectId,
    /// The object's class followed by its ancestors.
    lineage: Vec<String>,
}

impl GameObject {
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn class(&self) -> &str {
        &self.lineage[0]
    }

    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    /// True if the object's class is `class` or inherits from it.
    pub fn is_a(&self, class: &str) -> bool {
        self.lineage.iter().any(|c| c == class)
    }
}

/// Position in the creation log, taken before a dispatch so its objects can
/// be forgotten if the dispatch faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryMark(usize);

#[derive(Clone, Debug, Default)]
pub struct Registry {
    objects: BTreeMap<ObjectId, GameObject>,
    next_id: u64,
    /// Objects created since the last `settle`, oldest first.
    created: Vec<ObjectId>,
    /// Ids of released objects.
    burned: BTreeSet<ObjectId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new object of `class` under the next free id.
    pub fn create(&mut self, schema: &GameSchema, class: &str) -> Result<ObjectId, SchemaError> {
        let lineage = schema.lineage(class)?;
        let id = loop {
            let candidate = ObjectId(self.next_id.to_string());
            self.next_id += 1;
            if !self.is_taken(&candidate) {
                break candidate;
            }
        };
        self.insert(id.clone(), lineage);
        Ok(id)
    }

    /// Register a new object under a caller-chosen id.
    pub fn create_with_id(
        &mut self,
        schema: &GameSchema,
        id: ObjectId,
        class: &str,
    ) -> Result<ObjectId, SchemaError> {
        if self.is_taken(&id) {
            return Err(SchemaError::DuplicateObjectId(id));
        }
        let lineage = schema.lineage(class)?;
        self.insert(id.clone(), lineage);
        Ok(id)
    }

    fn is_taken(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id) || self.burned.contains(id)
    }

    fn insert(&mut self, id: ObjectId, lineage: Vec<String>) {
        tracing::debug!("registered game object {id} ({})", lineage[0]);
        self.created.push(id.clone());
        self.objects.insert(id.clone(), GameObject { id, lineage });
    }

    pub fn get(&self, id: &ObjectId) -> Option<&GameObject> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = &GameObject> {
        self.objects.values()
    }

    pub fn mark(&self) -> RegistryMark {
        RegistryMark(self.created.len())
    }

    /// Forget every object created after `mark`. Their ids stay burned.
    pub fn release_since(&mut self, mark: RegistryMark) {
        let start = mark.0.min(self.created.len());
        for id in self.created.drain(start..) {
            self.objects.remove(&id);
            self.burned.insert(id);
        }
    }

    /// Accept everything created so far; earlier marks become meaningless.
    pub fn settle(&mut self) {
        self.created.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ClassSchema;

    fn schema() -> GameSchema {
        GameSchema::new("Test")
            .class("GameObject", ClassSchema::new())
            .class("Unit", ClassSchema::new().extends("GameObject"))
    }

    #[test]
    fn ids_are_sequential_and_stable() {
        let schema = schema();
        let mut registry = Registry::new();
        let a = registry.create(&schema, "Unit").unwrap();
        let b = registry.create(&schema, "GameObject").unwrap();
        assert_eq!(a, ObjectId::from("0"));
        assert_eq!(b, ObjectId::from("1"));
        assert!(registry.get(&a).unwrap().is_a("GameObject"));
        assert!(!registry.get(&b).unwrap().is_a("Unit"));
        assert_eq!(registry.get(&a).unwrap().class(), "Unit");
    }

    #[test]
    fn unknown_class_is_an_error() {
        let mut registry = Registry::new();
        assert_eq!(
            registry.create(&schema(), "Dragon"),
            Err(SchemaError::UnknownClass("Dragon".into()))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn explicit_ids_cannot_collide() {
        let schema = schema();
        let mut registry = Registry::new();
        registry
            .create_with_id(&schema, ObjectId::from("G-3"), "Unit")
            .unwrap();
        assert_eq!(
            registry.create_with_id(&schema, ObjectId::from("G-3"), "Unit"),
            Err(SchemaError::DuplicateObjectId(ObjectId::from("G-3")))
        );
    }

    #[test]
    fn release_forgets_objects_but_never_reuses_ids() {
        let schema = schema();
        let mut registry = Registry::new();
        let kept = registry.create(&schema, "Unit").unwrap();
        registry.settle();

        let mark = registry.mark();
        let dropped = registry.create(&schema, "Unit").unwrap();
        registry.release_since(mark);

        assert!(registry.contains(&kept));
        assert!(!registry.contains(&dropped));
        let next = registry.create(&schema, "Unit").unwrap();
        assert_ne!(next, dropped);
        assert_eq!(next, ObjectId::from("2"));
    }

    #[test]
    fn released_explicit_ids_stay_burned() {
        let schema = schema();
        let mut registry = Registry::new();
        let mark = registry.mark();
        let id = ObjectId::from("G-7");
        registry.create_with_id(&schema, id.clone(), "Unit").unwrap();
        registry.release_since(mark);

        assert!(!registry.contains(&id));
        assert_eq!(
            registry.create_with_id(&schema, id.clone(), "Unit"),
            Err(SchemaError::DuplicateObjectId(id))
        );
    }

    #[test]
    fn counter_skips_released_explicit_ids() {
        let schema = schema();
        let mut registry = Registry::new();
        let mark = registry.mark();
        registry
            .create_with_id(&schema, ObjectId::from("0"), "Unit")
            .unwrap();
        registry.release_since(mark);
        assert_eq!(registry.create(&schema, "Unit").unwrap(), ObjectId::from("1"));
    }

    #[test]
    fn counter_skips_explicitly_taken_ids() {
        let schema = schema();
        let mut registry = Registry::new();
        registry
            .create_with_id(&schema, ObjectId::from("0"), "Unit")
            .unwrap();
        assert_eq!(registry.create(&schema, "Unit").unwrap(), ObjectId::from("1"));
    }
}
