//! Lifecycle initializer: bring a raw value under management.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::id::ObjectId;
use crate::registry::Registry;
use crate::value::{Kwargs, Value};

/// A raw value's own construction routine, re-run on request.
pub trait NativeInit {
    fn native_init(&mut self, args: &[Value], kwargs: &Kwargs) -> anyhow::Result<()>;
}

/// Options for `initialize`. Re-initialization is on by default.
#[derive(Default)]
pub struct InitOptions {
    owner: Option<Arc<dyn Registry>>,
    id: Option<ObjectId>,
    skip_reinit: bool,
    args: Vec<Value>,
    kwargs: Kwargs,
}

impl InitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, owner: &Arc<dyn Registry>) -> Self {
        self.owner = Some(owner.clone());
        self
    }

    pub fn id(mut self, id: ObjectId) -> Self {
        self.id = Some(id);
        self
    }

    /// Keep the value as-is instead of re-running its construction routine.
    pub fn no_reinit(mut self) -> Self {
        self.skip_reinit = true;
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: Kwargs) -> Self {
        self.kwargs = kwargs;
        self
    }
}

/// A raw value carrying an id and owner, not itself a wrapper.
#[derive(Debug)]
pub struct Managed<T> {
    id: ObjectId,
    owner: Weak<dyn Registry>,
    value: T,
}

impl<T> Managed<T> {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn owner(&self) -> Option<Arc<dyn Registry>> {
        self.owner.upgrade()
    }

    pub fn is_wrapper(&self) -> bool {
        false
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Managed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Managed<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// Optionally re-run `value`'s construction routine, then assign owner
/// (default: the context's registry) and id (default: fresh).
pub fn initialize<T: NativeInit>(ctx: &Context, mut value: T, options: InitOptions) -> Result<Managed<T>> {
    if !options.skip_reinit {
        value
            .native_init(&options.args, &options.kwargs)
            .map_err(|source| Error::Engine {
                op: "native_init".to_string(),
                source,
            })?;
    }
    let owner = match &options.owner {
        Some(owner) => Arc::downgrade(owner),
        None => ctx.default_owner(),
    };
    let id = options.id.unwrap_or_else(|| ctx.pop_id());
    debug!(%id, "initialized native value");
    Ok(Managed { id, owner, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::Blob;
    use crate::registry::LocalRegistry;

    #[test]
    fn initialize_runs_native_init_and_assigns_defaults() -> Result<()> {
        let ctx = Context::new();
        let managed = initialize(&ctx, Blob::default(), InitOptions::new().args(vec!["abc".into()]))?;
        assert_eq!(managed.bytes(), b"abc");
        assert!(!managed.is_wrapper());
        let owner = managed.owner().expect("owner");
        assert!(Arc::ptr_eq(&owner, ctx.registry()));
        Ok(())
    }

    #[test]
    fn initialize_respects_explicit_id_owner_and_skip() -> Result<()> {
        let ctx = Context::new();
        let registry: Arc<dyn Registry> = Arc::new(LocalRegistry::new());
        let options = InitOptions::new()
            .owner(&registry)
            .id(ObjectId(42))
            .no_reinit()
            .args(vec![Value::I64(1)]);
        let managed = initialize(&ctx, Blob::new("keep"), options)?;
        assert_eq!(managed.id(), ObjectId(42));
        assert_eq!(managed.bytes(), b"keep");
        assert!(Arc::ptr_eq(&managed.owner().expect("owner"), &registry));
        Ok(())
    }

    #[test]
    fn failed_native_init_surfaces_as_engine_error() {
        let ctx = Context::new();
        let err = initialize(&ctx, Blob::default(), InitOptions::new().args(vec![Value::Unit]))
            .unwrap_err();
        assert!(matches!(err, Error::Engine { ref op, .. } if op == "native_init"));
    }
}
