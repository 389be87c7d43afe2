//! Dynamic values carried by commands and responses.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;

use crate::native::Native;
use crate::object::WrappedValue;

/// Named arguments of a command.
pub type Kwargs = BTreeMap<String, Value>;

/// Extra construction parameters a variant needs to rebuild itself.
pub type Attributes = BTreeMap<String, Value>;

/// Identity of a concrete layer variant or native leaf type.
#[derive(Clone, Copy, Debug)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: 'static>(name: &'static str) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Argument or response value flowing through a dispatch chain.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Wrapped(Box<WrappedValue>),
    Native(Box<dyn Native>),
}

impl Value {
    /// Concrete type of a wrapped or native value; `None` for plain data.
    pub fn type_key(&self) -> Option<TypeKey> {
        match self {
            Value::Wrapped(w) => Some(w.type_key()),
            Value::Native(n) => Some(n.type_key()),
            _ => None,
        }
    }

    pub fn as_wrapped(&self) -> Option<&WrappedValue> {
        match self {
            Value::Wrapped(w) => Some(w),
            _ => None,
        }
    }

    pub fn into_wrapped(self) -> Option<WrappedValue> {
        match self {
            Value::Wrapped(w) => Some(*w),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&dyn Native> {
        match self {
            Value::Native(n) => Some(n.as_ref()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<WrappedValue> for Value {
    fn from(value: WrappedValue) -> Self {
        Value::Wrapped(Box::new(value))
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::I64(n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::I64(n) => write!(f, "{n}"),
            Value::F64(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (idx, (key, item)) in entries.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                f.write_str("}")
            }
            Value::Wrapped(w) => write!(f, "{w}"),
            Value::Native(n) => f.write_str(n.type_key().name()),
        }
    }
}
