//! The wrapped value entity: one layer of a chain around a native leaf.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::codec;
use crate::command::Command;
use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::id::ObjectId;
use crate::native::Native;
use crate::overrides::Namespace;
use crate::registry::Registry;
use crate::value::{Attributes, TypeKey, Value};

static NO_OVERRIDES: Lazy<Namespace> = Lazy::new(Namespace::new);

/// Concrete variant of a wrapped value: its behaviour and class attributes.
///
/// Every `WrappedValue` holds one layer. Layers with no state are usually a
/// unit struct; layers with state (a label, a precision) expose it through
/// `class_attributes` so `get()` and the codec can rebuild them.
pub trait Layer: Send + Sync + fmt::Debug {
    fn type_key(&self) -> TypeKey;

    /// Extra construction parameters. Empty by default.
    fn class_attributes(&self) -> Attributes {
        Attributes::new()
    }

    /// Construct a new instance of this variant from class attributes.
    fn rebuild(&self, attributes: &Attributes) -> Result<Arc<dyn Layer>>;

    /// Operations this variant answers itself instead of forwarding.
    fn overrides(&self) -> &Namespace {
        &NO_OVERRIDES
    }

    /// Hook run for every forwarded command; the result is ignored.
    fn on_function_call(&self, _command: &Command) {}
}

/// What a wrapped value delegates to.
#[derive(Clone, Debug, PartialEq)]
pub enum Child {
    Wrapped(Box<WrappedValue>),
    Native(Box<dyn Native>),
}

impl Child {
    pub fn type_key(&self) -> TypeKey {
        match self {
            Child::Wrapped(w) => w.type_key(),
            Child::Native(n) => n.type_key(),
        }
    }

    /// Dispatcher for the child's concrete type.
    pub fn dispatcher(&self) -> Dispatcher {
        match self {
            Child::Wrapped(w) => w.dispatcher(),
            Child::Native(n) => Dispatcher::Engine(n.engine()),
        }
    }

    pub fn get(&self) -> Result<Child> {
        Ok(match self {
            Child::Wrapped(w) => Child::Wrapped(Box::new(w.get()?)),
            Child::Native(n) => Child::Native(n.get()?),
        })
    }

    pub fn into_value(self) -> Value {
        match self {
            Child::Wrapped(w) => Value::Wrapped(w),
            Child::Native(n) => Value::Native(n),
        }
    }

    /// Inverse of `into_value` for values that can sit in a child slot.
    pub fn from_value(value: Value) -> Option<Child> {
        match value {
            Value::Wrapped(w) => Some(Child::Wrapped(w)),
            Value::Native(n) => Some(Child::Native(n)),
            _ => None,
        }
    }
}

impl From<WrappedValue> for Child {
    fn from(value: WrappedValue) -> Self {
        Child::Wrapped(Box::new(value))
    }
}

impl<N: Native> From<N> for Child {
    fn from(native: N) -> Self {
        Child::Native(Box::new(native))
    }
}

impl fmt::Display for Child {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Child::Wrapped(w) => write!(f, "{w}"),
            Child::Native(n) => f.write_str(n.type_key().name()),
        }
    }
}

/// One layer of a chain.
#[derive(Clone)]
pub struct WrappedValue {
    id: ObjectId,
    owner: Option<Weak<dyn Registry>>,
    tags: BTreeSet<String>,
    description: Option<String>,
    child: Option<Child>,
    layer: Arc<dyn Layer>,
}

/// Builder behind `make(id?, owner?, tags?, description?, child?)`.
#[derive(Debug)]
pub struct Make {
    layer: Arc<dyn Layer>,
    id: Option<ObjectId>,
    owner: OwnerChoice,
    tags: BTreeSet<String>,
    description: Option<String>,
    child: Option<Child>,
}

#[derive(Debug)]
enum OwnerChoice {
    Default,
    Given(Weak<dyn Registry>),
    Detached,
}

impl Make {
    pub fn new(layer: Arc<dyn Layer>) -> Self {
        Self {
            layer,
            id: None,
            owner: OwnerChoice::Default,
            tags: BTreeSet::new(),
            description: None,
            child: None,
        }
    }

    pub fn id(mut self, id: ObjectId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn owner(mut self, owner: &Arc<dyn Registry>) -> Self {
        self.owner = OwnerChoice::Given(Arc::downgrade(owner));
        self
    }

    /// Build without any owner; tagging such a value fails.
    pub fn detached(mut self) -> Self {
        self.owner = OwnerChoice::Detached;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn child(mut self, child: impl Into<Child>) -> Self {
        self.child = Some(child.into());
        self
    }

    /// Fill absent fields from `ctx`: a fresh id and the default registry.
    pub fn build(self, ctx: &Context) -> WrappedValue {
        let owner = match self.owner {
            OwnerChoice::Default => Some(ctx.default_owner()),
            OwnerChoice::Given(owner) => Some(owner),
            OwnerChoice::Detached => None,
        };
        WrappedValue {
            id: self.id.unwrap_or_else(|| ctx.pop_id()),
            owner,
            tags: self.tags,
            description: self.description,
            child: self.child,
            layer: self.layer,
        }
    }
}

impl WrappedValue {
    pub fn make(layer: Arc<dyn Layer>) -> Make {
        Make::new(layer)
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Live owner registry, if one was set and still exists.
    pub fn owner(&self) -> Option<Arc<dyn Registry>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn child(&self) -> Option<&Child> {
        self.child.as_ref()
    }

    pub fn layer(&self) -> &Arc<dyn Layer> {
        &self.layer
    }

    pub fn type_key(&self) -> TypeKey {
        self.layer.type_key()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::Layer(self.layer.clone())
    }

    /// Give up this layer and hand out what it wraps.
    pub fn unwrap_one_level(self) -> Result<Value> {
        let layer = self.type_key().name();
        let id = self.id;
        self.child
            .map(Child::into_value)
            .ok_or(Error::MissingChild { layer, id })
    }

    /// Set the description. A copy already held by the owner is refreshed.
    pub fn describe(&mut self, text: impl Into<String>) -> &mut Self {
        self.description = Some(text.into());
        if let Some(owner) = self.owner() {
            if owner.contains(self.id) {
                owner.register_obj(self.clone());
            }
        }
        self
    }

    /// Add tags locally and index them in the owner.
    ///
    /// The owner's copy is replaced with the updated value, registering it
    /// first if the owner does not know this id yet, so the tag index never
    /// points at a missing or stale object.
    pub fn tag<I, S>(&mut self, tags: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        if tags.is_empty() {
            return Ok(self);
        }
        let Some(owner) = self.owner() else {
            return Err(Error::NoOwner { id: self.id });
        };
        self.tags.extend(tags.iter().cloned());
        if !owner.contains(self.id) {
            debug!(id = %self.id, trace = %self, "registering untracked object while tagging");
        }
        owner.register_obj(self.clone());
        for tag in &tags {
            owner.add_tag(tag, self.id);
        }
        Ok(self)
    }

    /// Unwrap one layer below, keeping this layer's id and metadata.
    pub fn get(&self) -> Result<WrappedValue> {
        let child = self.child.as_ref().ok_or(Error::MissingChild {
            layer: self.type_key().name(),
            id: self.id,
        })?;
        let layer = self.layer.rebuild(&self.layer.class_attributes())?;
        Ok(WrappedValue {
            id: self.id,
            owner: self.owner.clone(),
            tags: self.tags.clone(),
            description: self.description.clone(),
            child: Some(child.get()?),
            layer,
        })
    }

    /// `get()` and put the result in the owner under this value's id.
    pub fn mid_get(&self) -> Result<()> {
        let owner = self.owner().ok_or(Error::NoOwner { id: self.id })?;
        let id = self.id;
        let mut retrieved = self.get()?;
        retrieved.id = id;
        owner.register_obj(retrieved);
        Ok(())
    }

    /// Simplify, serialize and compress with the context's codec settings.
    pub fn serialize(&self, ctx: &Context) -> Result<Vec<u8>> {
        codec::serialize(self, ctx.codec())
    }

    pub fn ser(&self, ctx: &Context) -> Result<Vec<u8>> {
        self.serialize(ctx)
    }
}

impl fmt::Display for WrappedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_key().name())?;
        match &self.child {
            Some(child) => write!(f, ">{child}"),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for WrappedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedValue")
            .field("layer", &self.layer)
            .field("id", &self.id)
            .field("tags", &self.tags)
            .field("description", &self.description)
            .field("child", &self.child)
            .finish()
    }
}

impl PartialEq for WrappedValue {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.type_key() == other.type_key()
            && self.layer.class_attributes() == other.layer.class_attributes()
            && self.tags == other.tags
            && self.description == other.description
            && self.child == other.child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Audit, Passthrough};
    use crate::native::Blob;
    use crate::registry::LocalRegistry;

    fn chain(ctx: &Context) -> WrappedValue {
        let inner = Make::new(Audit::layer("inner")).child(Blob::new("x")).build(ctx);
        Make::new(Passthrough::layer())
            .tags(["a"])
            .description("outer")
            .child(inner)
            .build(ctx)
    }

    #[test]
    fn make_fills_defaults_from_context() {
        let ctx = Context::new();
        let v = Make::new(Passthrough::layer()).build(&ctx);
        assert!(v.tags().is_empty());
        assert_eq!(v.description(), None);
        let owner = v.owner().expect("default owner");
        assert!(Arc::ptr_eq(&owner, ctx.registry()));
    }

    #[test]
    fn generated_ids_are_distinct() -> Result<()> {
        let ctx = Context::new();
        let mut seen = BTreeSet::new();
        for _ in 0..200 {
            let mut v = Make::new(Passthrough::layer()).build(&ctx);
            v.tag(["bulk"])?;
            assert!(seen.insert(v.id()));
        }
        assert_eq!(ctx.registry().len(), 200);
        assert_eq!(ctx.registry().ids_for_tag("bulk").len(), 200);
        Ok(())
    }

    #[test]
    fn trace_lists_every_layer() {
        let ctx = Context::new();
        let c = Make::new(Passthrough::layer()).build(&ctx);
        let b = Make::new(Audit::layer("b")).child(c).build(&ctx);
        let a = Make::new(Passthrough::layer()).child(b).build(&ctx);
        assert_eq!(a.to_string(), "Passthrough>Audit>Passthrough");
        assert_eq!(chain(&ctx).to_string(), "Passthrough>Audit>Blob");
    }

    #[test]
    fn describe_keeps_id() {
        let ctx = Context::new();
        let mut v = chain(&ctx);
        let id = v.id();
        v.describe("renamed").tag(["b"]).unwrap();
        assert_eq!(v.description(), Some("renamed"));
        assert_eq!(v.id(), id);
    }

    #[test]
    fn tag_registers_missing_object() -> Result<()> {
        let ctx = Context::new();
        let mut v = Make::new(Passthrough::layer()).id(ObjectId(5)).build(&ctx);
        assert!(ctx.registry().is_empty());

        v.tag(["private"])?;

        let registry = ctx.registry();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_obj(ObjectId(5)).map(|o| o.id()), Some(ObjectId(5)));
        assert_eq!(registry.ids_for_tag("private"), BTreeSet::from([ObjectId(5)]));
        Ok(())
    }

    #[test]
    fn tag_twice_is_idempotent() -> Result<()> {
        let ctx = Context::new();
        let mut v = Make::new(Passthrough::layer()).build(&ctx);
        v.tag(["x", "y"])?;
        v.tag(["x"])?;
        assert_eq!(v.tags().len(), 2);
        assert_eq!(ctx.registry().ids_for_tag("x"), BTreeSet::from([v.id()]));
        Ok(())
    }

    #[test]
    fn tag_without_owner_fails_cleanly() {
        let ctx = Context::new();
        let mut v = Make::new(Passthrough::layer()).detached().build(&ctx);
        let err = v.tag(["t"]).unwrap_err();
        assert!(matches!(err, Error::NoOwner { .. }));
        assert!(v.tags().is_empty());

        let registry: Arc<dyn Registry> = Arc::new(LocalRegistry::new());
        let mut orphan = Make::new(Passthrough::layer()).owner(&registry).build(&ctx);
        drop(registry);
        assert!(matches!(orphan.tag(["t"]), Err(Error::NoOwner { .. })));
    }

    #[test]
    fn get_preserves_identity_and_metadata() -> Result<()> {
        let ctx = Context::new();
        let v = chain(&ctx);
        let got = v.get()?;
        assert_eq!(got.id(), v.id());
        assert_eq!(got.tags(), v.tags());
        assert_eq!(got.description(), Some("outer"));
        let expected_child = v.child().expect("child").get()?;
        assert_eq!(got.child(), Some(&expected_child));
        assert_eq!(got.layer().class_attributes(), v.layer().class_attributes());
        Ok(())
    }

    #[test]
    fn get_without_child_fails() {
        let ctx = Context::new();
        let v = Make::new(Passthrough::layer()).build(&ctx);
        assert!(matches!(v.get(), Err(Error::MissingChild { .. })));
    }

    #[test]
    fn mid_get_registers_under_original_id() -> Result<()> {
        let ctx = Context::new();
        let v = chain(&ctx);
        v.mid_get()?;
        let stored = ctx.registry().get_obj(v.id()).expect("registered");
        assert_eq!(stored, v.get()?);
        Ok(())
    }

    #[test]
    fn owner_copy_tracks_later_tags_and_description() -> Result<()> {
        let ctx = Context::new();
        let mut v = Make::new(Passthrough::layer()).build(&ctx);
        v.tag(["a"])?;
        v.describe("later");
        v.tag(["b"])?;

        let registry = ctx.registry();
        let stored = registry.get_obj(v.id()).expect("registered");
        assert_eq!(stored.tags(), &BTreeSet::from(["a".to_string(), "b".to_string()]));
        assert_eq!(stored.description(), Some("later"));
        let found = registry.find_by_tag("b");
        assert_eq!(found.len(), 1);
        assert!(found[0].tags().contains("b"));
        Ok(())
    }

    #[test]
    fn empty_tag_list_is_a_no_op_without_owner() -> Result<()> {
        let ctx = Context::new();
        let mut v = Make::new(Passthrough::layer()).detached().build(&ctx);
        v.tag(Vec::<String>::new())?;
        assert!(v.tags().is_empty());
        Ok(())
    }

    #[test]
    fn mid_get_without_owner_fails() {
        let ctx = Context::new();
        let v = Make::new(Passthrough::layer())
            .detached()
            .child(Blob::new("x"))
            .build(&ctx);
        assert!(matches!(v.mid_get(), Err(Error::NoOwner { .. })));

        let registry: Arc<dyn Registry> = Arc::new(LocalRegistry::new());
        let orphan = Make::new(Passthrough::layer())
            .owner(&registry)
            .child(Blob::new("x"))
            .build(&ctx);
        drop(registry);
        assert!(matches!(orphan.mid_get(), Err(Error::NoOwner { .. })));
    }

    #[test]
    fn mid_get_replaces_existing_entry() -> Result<()> {
        let ctx = Context::new();
        let mut v = chain(&ctx);
        v.tag(["kept"])?;
        let before = ctx.registry().len();

        v.describe("retrieved");
        ctx.registry().register_obj(Make::new(Passthrough::layer()).id(v.id()).build(&ctx));
        v.mid_get()?;

        let registry = ctx.registry();
        assert_eq!(registry.len(), before);
        let stored = registry.get_obj(v.id()).expect("registered");
        assert_eq!(stored.description(), Some("retrieved"));
        assert_eq!(stored.to_string(), "Passthrough>Audit>Blob");
        assert_eq!(registry.ids_for_tag("kept"), BTreeSet::from([v.id()]));
        Ok(())
    }

    #[test]
    fn unwrap_one_level_yields_child() -> Result<()> {
        let ctx = Context::new();
        let v = chain(&ctx);
        let inner = v.unwrap_one_level()?;
        assert_eq!(inner.to_string(), "Audit>Blob");
        Ok(())
    }
}
