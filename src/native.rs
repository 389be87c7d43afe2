//! Raw leaf values at the bottom of a chain and the engines that execute them.
//!
//! The crate is agnostic to what a leaf computes; `Blob` is a byte-string
//! leaf with a handful of operations so chains can be exercised end to end.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use once_cell::sync::Lazy;

use crate::command::Command;
use crate::context::Context;
use crate::error::{CodecError, Error, Result};
use crate::init::NativeInit;
use crate::value::{Kwargs, TypeKey, Value};

/// A raw value that terminates a chain.
pub trait Native: Any + Send + Sync + fmt::Debug {
    fn type_key(&self) -> TypeKey;

    /// Dispatcher for every value of this leaf type.
    fn engine(&self) -> Arc<dyn Engine>;

    fn clone_native(&self) -> Box<dyn Native>;

    fn eq_native(&self, other: &dyn Native) -> bool;

    fn as_any(&self) -> &dyn Any;

    /// Retrieval step at the bottom of `WrappedValue::get`.
    fn get(&self) -> Result<Box<dyn Native>> {
        Ok(self.clone_native())
    }

    /// Opaque payload used by the codec's simplify stage.
    fn payload(&self) -> std::result::Result<Vec<u8>, CodecError>;
}

impl<'a> dyn Native + 'a {
    pub fn downcast_ref<T: Native>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl Clone for Box<dyn Native> {
    fn clone(&self) -> Self {
        self.clone_native()
    }
}

impl PartialEq for Box<dyn Native> {
    fn eq(&self, other: &Self) -> bool {
        self.eq_native(other.as_ref())
    }
}

/// Executes commands for one native leaf type.
pub trait Engine: Send + Sync {
    fn type_key(&self) -> TypeKey;

    fn handle_command(&self, ctx: &Context, command: Command) -> Result<Value>;
}

/// Byte-string leaf.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blob {
    bytes: Vec<u8>,
}

impl Blob {
    pub const KIND: &'static str = "Blob";

    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn key() -> TypeKey {
        TypeKey::of::<Blob>(Self::KIND)
    }

    /// Inverse of `Native::payload`, used by the codec catalog.
    pub fn from_payload(payload: &[u8]) -> Result<Box<dyn Native>> {
        Ok(Box::new(Blob::new(payload)))
    }
}

impl Native for Blob {
    fn type_key(&self) -> TypeKey {
        Blob::key()
    }

    fn engine(&self) -> Arc<dyn Engine> {
        BLOB_ENGINE.clone()
    }

    fn clone_native(&self) -> Box<dyn Native> {
        Box::new(self.clone())
    }

    fn eq_native(&self, other: &dyn Native) -> bool {
        other.downcast_ref::<Blob>() == Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn payload(&self) -> std::result::Result<Vec<u8>, CodecError> {
        Ok(self.bytes.clone())
    }
}

impl NativeInit for Blob {
    fn native_init(&mut self, args: &[Value], kwargs: &Kwargs) -> anyhow::Result<()> {
        let source = args.first().or_else(|| kwargs.get("data"));
        self.bytes = match source {
            None => Vec::new(),
            Some(Value::Text(text)) => text.as_bytes().to_vec(),
            Some(Value::Bytes(bytes)) => bytes.clone(),
            Some(other) => return Err(anyhow!("Blob cannot be built from {other}")),
        };
        Ok(())
    }
}

static BLOB_ENGINE: Lazy<Arc<dyn Engine>> = Lazy::new(|| Arc::new(BlobEngine));

/// Engine behind `Blob`: `concat`, `len`, `upper`, `eq`.
#[derive(Debug)]
pub struct BlobEngine;

impl BlobEngine {
    fn blobs<'a>(op: &str, args: &'a [Value]) -> Result<Vec<&'a Blob>> {
        args.iter()
            .map(|arg| {
                arg.as_native()
                    .and_then(|n| n.downcast_ref::<Blob>())
                    .ok_or_else(|| Error::Engine {
                        op: op.to_string(),
                        source: anyhow!("expected Blob argument, found {arg}"),
                    })
            })
            .collect()
    }

    fn single<'a>(op: &str, args: &'a [Value]) -> Result<&'a Blob> {
        match Self::blobs(op, args)?.as_slice() {
            [blob] => Ok(*blob),
            other => Err(Error::Engine {
                op: op.to_string(),
                source: anyhow!("expected one Blob argument, found {}", other.len()),
            }),
        }
    }
}

impl Engine for BlobEngine {
    fn type_key(&self) -> TypeKey {
        Blob::key()
    }

    fn handle_command(&self, _ctx: &Context, command: Command) -> Result<Value> {
        let op = command.name();
        match op {
            "concat" => {
                let mut bytes = Vec::new();
                for blob in Self::blobs(op, &command.args)? {
                    bytes.extend_from_slice(blob.bytes());
                }
                Ok(Value::Native(Box::new(Blob::new(bytes))))
            }
            "len" => {
                let blob = Self::single(op, &command.args)?;
                Ok(Value::I64(blob.bytes().len() as i64))
            }
            "upper" => {
                let blob = Self::single(op, &command.args)?;
                Ok(Value::Native(Box::new(Blob::new(
                    blob.bytes().to_ascii_uppercase(),
                ))))
            }
            "eq" => {
                let blobs = Self::blobs(op, &command.args)?;
                Ok(Value::Bool(blobs.windows(2).all(|pair| pair[0] == pair[1])))
            }
            other => Err(Error::Engine {
                op: other.to_string(),
                source: anyhow!("Blob does not support `{other}`"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(text: &str) -> Value {
        Value::Native(Box::new(Blob::new(text)))
    }

    #[test]
    fn concat_joins_payloads() -> Result<()> {
        let ctx = Context::new();
        let out = BlobEngine.handle_command(&ctx, Command::new("concat", vec![blob("ab"), blob("cd")]))?;
        let joined = out.as_native().and_then(|n| n.downcast_ref::<Blob>()).cloned();
        assert_eq!(joined, Some(Blob::new("abcd")));
        Ok(())
    }

    #[test]
    fn unknown_op_reports_engine_error() {
        let ctx = Context::new();
        let err = BlobEngine
            .handle_command(&ctx, Command::new("sqrt", vec![blob("x")]))
            .unwrap_err();
        assert!(matches!(err, Error::Engine { ref op, .. } if op == "sqrt"));
    }

    #[test]
    fn native_init_reads_text_or_bytes() -> anyhow::Result<()> {
        let mut b = Blob::default();
        b.native_init(&[Value::from("hi")], &Kwargs::new())?;
        assert_eq!(b.bytes(), b"hi");
        let mut kw = Kwargs::new();
        kw.insert("data".into(), Value::Bytes(vec![1, 2]));
        b.native_init(&[], &kw)?;
        assert_eq!(b.bytes(), &[1, 2]);
        assert!(b.native_init(&[Value::I64(3)], &Kwargs::new()).is_err());
        Ok(())
    }
}
