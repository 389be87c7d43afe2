//! Owner registries: objects stored by id plus a reverse tag index.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use tracing::trace;

use crate::id::ObjectId;
use crate::object::WrappedValue;

/// Addressable store that owns registered values.
///
/// Wrapped values keep only a weak back-reference to their owner, so a
/// registry never keeps itself alive through the objects it holds.
pub trait Registry: Send + Sync {
    /// Store `value` under its id, replacing any previous entry.
    fn register_obj(&self, value: WrappedValue);

    fn contains(&self, id: ObjectId) -> bool;

    /// Add `id` to the tag index under `tag`.
    fn add_tag(&self, tag: &str, id: ObjectId);

    fn ids_for_tag(&self, tag: &str) -> BTreeSet<ObjectId>;

    fn get_obj(&self, id: ObjectId) -> Option<WrappedValue>;

    /// Remove the entry for `id` and drop it from every tag set.
    fn remove_obj(&self, id: ObjectId) -> Option<WrappedValue>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered values carrying `tag`, in id order.
    fn find_by_tag(&self, tag: &str) -> Vec<WrappedValue> {
        self.ids_for_tag(tag)
            .into_iter()
            .filter_map(|id| self.get_obj(id))
            .collect()
    }
}

/// In-memory registry guarded by a single lock.
#[derive(Debug, Default)]
pub struct LocalRegistry {
    state: RwLock<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    objects: BTreeMap<ObjectId, WrappedValue>,
    tag_to_object_ids: BTreeMap<String, BTreeSet<ObjectId>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        let guard = self.state.read().expect("registry poisoned");
        guard.objects.keys().copied().collect()
    }

    /// Copy of the whole tag index.
    pub fn tag_index(&self) -> BTreeMap<String, BTreeSet<ObjectId>> {
        let guard = self.state.read().expect("registry poisoned");
        guard.tag_to_object_ids.clone()
    }
}

impl Registry for LocalRegistry {
    fn register_obj(&self, value: WrappedValue) {
        trace!(id = %value.id(), trace = %value, "register object");
        let mut guard = self.state.write().expect("registry poisoned");
        guard.objects.insert(value.id(), value);
    }

    fn contains(&self, id: ObjectId) -> bool {
        let guard = self.state.read().expect("registry poisoned");
        guard.objects.contains_key(&id)
    }

    fn add_tag(&self, tag: &str, id: ObjectId) {
        let mut guard = self.state.write().expect("registry poisoned");
        guard
            .tag_to_object_ids
            .entry(tag.to_string())
            .or_default()
            .insert(id);
    }

    fn ids_for_tag(&self, tag: &str) -> BTreeSet<ObjectId> {
        let guard = self.state.read().expect("registry poisoned");
        guard
            .tag_to_object_ids
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    fn get_obj(&self, id: ObjectId) -> Option<WrappedValue> {
        let guard = self.state.read().expect("registry poisoned");
        guard.objects.get(&id).cloned()
    }

    fn remove_obj(&self, id: ObjectId) -> Option<WrappedValue> {
        let mut guard = self.state.write().expect("registry poisoned");
        let removed = guard.objects.remove(&id);
        guard.tag_to_object_ids.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
        removed
    }

    fn len(&self) -> usize {
        let guard = self.state.read().expect("registry poisoned");
        guard.objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::layers::Passthrough;
    use crate::object::Make;

    #[test]
    fn register_and_lookup() {
        let ctx = Context::new();
        let value = Make::new(Passthrough::layer()).id(ObjectId(9)).build(&ctx);
        let registry = LocalRegistry::new();
        assert!(!registry.contains(ObjectId(9)));
        registry.register_obj(value.clone());
        assert!(registry.contains(ObjectId(9)));
        assert_eq!(registry.get_obj(ObjectId(9)), Some(value));
        assert_eq!(registry.ids(), vec![ObjectId(9)]);
    }

    #[test]
    fn remove_scrubs_tag_index() {
        let ctx = Context::new();
        let registry = LocalRegistry::new();
        for raw in [1, 2] {
            registry.register_obj(Make::new(Passthrough::layer()).id(ObjectId(raw)).build(&ctx));
            registry.add_tag("shared", ObjectId(raw));
        }
        registry.add_tag("solo", ObjectId(1));

        assert!(registry.remove_obj(ObjectId(1)).is_some());
        assert_eq!(registry.ids_for_tag("shared"), BTreeSet::from([ObjectId(2)]));
        assert!(!registry.tag_index().contains_key("solo"));
        assert_eq!(registry.find_by_tag("shared").len(), 1);
        assert_eq!(registry.len(), 1);
    }
}
