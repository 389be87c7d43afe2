//! Command dispatch through a chain: override probe, unwrap, hook,
//! forward, rewrap.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::command::Command;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::native::Engine;
use crate::object::{Child, Layer, Make};
use crate::overrides::Attr;
use crate::value::{Kwargs, TypeKey, Value};

/// Class-level entry point for one concrete type in a chain.
#[derive(Clone)]
pub enum Dispatcher {
    /// A wrapper variant; runs the full probe/unwrap/forward/rewrap protocol.
    Layer(Arc<dyn Layer>),
    /// A native leaf type; executes the command.
    Engine(Arc<dyn Engine>),
}

impl Dispatcher {
    /// Dispatcher of a wrapped or native value.
    pub fn for_value(value: &Value) -> Option<Dispatcher> {
        match value {
            Value::Wrapped(w) => Some(w.dispatcher()),
            Value::Native(n) => Some(Dispatcher::Engine(n.engine())),
            _ => None,
        }
    }

    pub fn type_key(&self) -> TypeKey {
        match self {
            Dispatcher::Layer(layer) => layer.type_key(),
            Dispatcher::Engine(engine) => engine.type_key(),
        }
    }

    pub fn dispatch(&self, ctx: &Context, command: Command) -> Result<Value> {
        match self {
            Dispatcher::Layer(layer) => dispatch(ctx, layer, command),
            Dispatcher::Engine(engine) => engine.handle_command(ctx, command),
        }
    }
}

/// Run `command` on behalf of `layer`'s variant.
///
/// An override registered under the command's dotted name answers directly.
/// Otherwise every wrapped argument is replaced by its child, the hook sees
/// the forwarded command, the child type's dispatcher produces a response,
/// and each response value of the child type is wrapped back into `layer`.
pub fn dispatch(ctx: &Context, layer: &Arc<dyn Layer>, command: Command) -> Result<Value> {
    let probed = layer.overrides().resolve_path(&command.path());
    match probed {
        Ok(attr) => {
            debug!(op = command.name(), layer = %layer.type_key(), "override");
            return invoke(ctx, command, attr);
        }
        Err(Error::AttributeMiss { .. }) => {}
        Err(other) => return Err(other),
    }

    let (name, _, args, kwargs) = command.into_parts();
    let mut unwrap = Unwrap::new(&name);
    let new_args = args
        .into_iter()
        .map(|arg| unwrap.value(arg))
        .collect::<Result<Vec<_>>>()?;
    let new_kwargs = kwargs
        .into_iter()
        .map(|(key, arg)| Ok((key, unwrap.value(arg)?)))
        .collect::<Result<Kwargs>>()?;
    let Some(target) = unwrap.target else {
        return Err(Error::NothingToUnwrap {
            op: name,
            layer: layer.type_key().name(),
        });
    };

    let forwarded = Command::new(name, new_args).with_kwargs(new_kwargs);
    layer.on_function_call(&forwarded);

    let new_type = target.type_key();
    debug!(op = forwarded.name(), layer = %layer.type_key(), to = %new_type, "forward");
    let response = target.dispatch(ctx, forwarded)?;
    Ok(rewrap(ctx, layer, new_type, response))
}

fn invoke(ctx: &Context, command: Command, attr: &Attr) -> Result<Value> {
    match attr {
        Attr::Handler(handler) => {
            let (_, _, args, kwargs) = command.into_parts();
            handler(ctx, args, kwargs)
        }
        Attr::Constant(value) => Ok(value.clone()),
        Attr::Namespace(_) => Err(Error::NotCallable {
            path: command.name().to_string(),
        }),
    }
}

/// Walks arguments, peeling one layer off every wrapped value.
struct Unwrap<'a> {
    op: &'a str,
    target: Option<Dispatcher>,
}

impl<'a> Unwrap<'a> {
    fn new(op: &'a str) -> Self {
        Self { op, target: None }
    }

    fn value(&mut self, value: Value) -> Result<Value> {
        match value {
            Value::Wrapped(wrapped) => {
                let child = wrapped.unwrap_one_level()?;
                if let Some(found) = Dispatcher::for_value(&child) {
                    self.record(found)?;
                }
                Ok(child)
            }
            Value::List(items) => Ok(Value::List(
                items
                    .into_iter()
                    .map(|item| self.value(item))
                    .collect::<Result<_>>()?,
            )),
            Value::Map(entries) => Ok(Value::Map(
                entries
                    .into_iter()
                    .map(|(key, item)| Ok((key, self.value(item)?)))
                    .collect::<Result<_>>()?,
            )),
            other => Ok(other),
        }
    }

    /// Every wrapped argument must unwrap to the same concrete type.
    fn record(&mut self, found: Dispatcher) -> Result<()> {
        let found_type = found.type_key();
        match self.target.as_ref().map(Dispatcher::type_key) {
            None => {
                trace!(op = self.op, child = %found_type, "unwrap");
                self.target = Some(found);
                Ok(())
            }
            Some(expected) if expected == found_type => Ok(()),
            Some(expected) => Err(Error::TypeMismatch {
                op: self.op.to_string(),
                expected,
                found: found_type,
            }),
        }
    }
}

fn rewrap(ctx: &Context, layer: &Arc<dyn Layer>, new_type: TypeKey, response: Value) -> Value {
    match response {
        Value::List(items) => Value::List(
            items
                .into_iter()
                .map(|item| rewrap(ctx, layer, new_type, item))
                .collect(),
        ),
        Value::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(key, item)| (key, rewrap(ctx, layer, new_type, item)))
                .collect(),
        ),
        Value::Wrapped(w) if w.type_key() == new_type => wrap_into(ctx, layer, Child::Wrapped(w)),
        Value::Native(n) if n.type_key() == new_type => wrap_into(ctx, layer, Child::Native(n)),
        other => other,
    }
}

fn wrap_into(ctx: &Context, layer: &Arc<dyn Layer>, child: Child) -> Value {
    trace!(layer = %layer.type_key(), child = %child, "rewrap");
    Make::new(layer.clone()).child(child).build(ctx).into()
}
