//! Serialization pipeline for chains: simplify → serialize → compress.
//!
//! A frame is `[scheme byte][sha256 of body][body]`, where the body is the
//! CBOR encoding of the simplified chain, compressed with the scheme named
//! by the first byte. Brotli is the default scheme.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::Context;
use crate::digest;
use crate::error::{CodecError, Error, Result};
use crate::id::ObjectId;
use crate::layers::{Audit, Passthrough};
use crate::native::{Blob, Native};
use crate::object::{Child, Layer, Make, WrappedValue};
use crate::value::{Attributes, Value};

const BROTLI_BUFFER: usize = 4096;

/// Compression applied to the serialized body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    None,
    #[default]
    Brotli,
}

impl Compression {
    pub fn scheme_byte(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Brotli => 1,
        }
    }

    pub fn from_scheme_byte(byte: u8) -> std::result::Result<Self, CodecError> {
        match byte {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Brotli),
            other => Err(CodecError::UnknownScheme(other)),
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "brotli" => Ok(Compression::Brotli),
            other => Err(format!("unknown compression `{other}` (expected none or brotli)")),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => f.write_str("none"),
            Compression::Brotli => f.write_str("brotli"),
        }
    }
}

/// Codec settings carried by the context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodecConfig {
    pub compression: Compression,
    /// Brotli quality, 0..=11.
    pub brotli_quality: u32,
    /// Brotli window size exponent, 10..=24.
    pub brotli_window: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression: Compression::Brotli,
            brotli_quality: 5,
            brotli_window: 22,
        }
    }
}

/// Serializable form of a chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Simplified {
    Wrapped {
        kind: String,
        id: ObjectId,
        tags: Vec<String>,
        description: Option<String>,
        attributes: BTreeMap<String, SimpleValue>,
        child: Option<Box<Simplified>>,
    },
    Native {
        kind: String,
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },
}

/// Plain data allowed in class attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SimpleValue {
    Unit,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    List(Vec<SimpleValue>),
    Map(BTreeMap<String, SimpleValue>),
}

impl TryFrom<&Value> for SimpleValue {
    type Error = CodecError;

    fn try_from(value: &Value) -> std::result::Result<Self, CodecError> {
        Ok(match value {
            Value::Unit => SimpleValue::Unit,
            Value::Bool(b) => SimpleValue::Bool(*b),
            Value::I64(n) => SimpleValue::I64(*n),
            Value::F64(x) => SimpleValue::F64(*x),
            Value::Text(s) => SimpleValue::Text(s.clone()),
            Value::Bytes(bytes) => SimpleValue::Bytes(bytes.clone()),
            Value::List(items) => SimpleValue::List(
                items
                    .iter()
                    .map(SimpleValue::try_from)
                    .collect::<std::result::Result<_, _>>()?,
            ),
            Value::Map(entries) => SimpleValue::Map(
                entries
                    .iter()
                    .map(|(key, item)| Ok((key.clone(), SimpleValue::try_from(item)?)))
                    .collect::<std::result::Result<_, CodecError>>()?,
            ),
            Value::Wrapped(_) | Value::Native(_) => {
                return Err(CodecError::Unsupported(value.to_string()));
            }
        })
    }
}

impl From<&SimpleValue> for Value {
    fn from(value: &SimpleValue) -> Self {
        match value {
            SimpleValue::Unit => Value::Unit,
            SimpleValue::Bool(b) => Value::Bool(*b),
            SimpleValue::I64(n) => Value::I64(*n),
            SimpleValue::F64(x) => Value::F64(*x),
            SimpleValue::Text(s) => Value::Text(s.clone()),
            SimpleValue::Bytes(bytes) => Value::Bytes(bytes.clone()),
            SimpleValue::List(items) => Value::List(items.iter().map(Value::from).collect()),
            SimpleValue::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(key, item)| (key.clone(), Value::from(item)))
                    .collect(),
            ),
        }
    }
}

/// Reduce a chain to plain data.
pub fn simplify(value: &WrappedValue) -> std::result::Result<Simplified, CodecError> {
    let attributes = value
        .layer()
        .class_attributes()
        .iter()
        .map(|(key, item)| Ok((key.clone(), SimpleValue::try_from(item)?)))
        .collect::<std::result::Result<_, CodecError>>()?;
    let child = match value.child() {
        None => None,
        Some(Child::Wrapped(inner)) => Some(Box::new(simplify(inner)?)),
        Some(Child::Native(native)) => Some(Box::new(Simplified::Native {
            kind: native.type_key().name().to_string(),
            payload: native.payload()?,
        })),
    };
    Ok(Simplified::Wrapped {
        kind: value.type_key().name().to_string(),
        id: value.id(),
        tags: value.tags().iter().cloned().collect(),
        description: value.description().map(str::to_string),
        attributes,
        child,
    })
}

/// Simplify, CBOR-encode and compress `value` into a frame.
pub fn serialize(value: &WrappedValue, config: &CodecConfig) -> Result<Vec<u8>> {
    let simplified = simplify(value)?;
    let body = serde_cbor::to_vec(&simplified).map_err(CodecError::from)?;
    let compressed = compress(&body, config)?;
    let mut frame = Vec::with_capacity(1 + digest::LEN + compressed.len());
    frame.push(config.compression.scheme_byte());
    frame.extend_from_slice(&digest::compute(&compressed));
    frame.extend_from_slice(&compressed);
    debug!(
        trace = %value,
        compression = %config.compression,
        raw = body.len(),
        framed = frame.len(),
        "serialized chain"
    );
    Ok(frame)
}

/// Verify, decompress and decode a frame produced by `serialize`.
pub fn deserialize(frame: &[u8]) -> Result<Simplified> {
    let (&scheme, rest) = frame.split_first().ok_or(CodecError::Empty)?;
    let compression = Compression::from_scheme_byte(scheme)?;
    if rest.len() < digest::LEN {
        return Err(CodecError::Empty.into());
    }
    let (expected, body) = rest.split_at(digest::LEN);
    let computed = digest::compute(body);
    if expected != computed.as_slice() {
        return Err(CodecError::Digest {
            expected: digest::to_hex(expected),
            computed: digest::to_hex(&computed),
        }
        .into());
    }
    let raw = decompress(body, compression)?;
    let simplified = serde_cbor::from_slice(&raw).map_err(CodecError::from)?;
    Ok(simplified)
}

fn compress(body: &[u8], config: &CodecConfig) -> std::result::Result<Vec<u8>, CodecError> {
    match config.compression {
        Compression::None => Ok(body.to_vec()),
        Compression::Brotli => {
            let mut out = Vec::new();
            {
                let mut writer = brotli::CompressorWriter::new(
                    &mut out,
                    BROTLI_BUFFER,
                    config.brotli_quality,
                    config.brotli_window,
                );
                writer.write_all(body)?;
                writer.flush()?;
            }
            Ok(out)
        }
    }
}

fn decompress(body: &[u8], compression: Compression) -> std::result::Result<Vec<u8>, CodecError> {
    match compression {
        Compression::None => Ok(body.to_vec()),
        Compression::Brotli => {
            let mut out = Vec::new();
            brotli::Decompressor::new(body, BROTLI_BUFFER).read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

pub type LayerCtor = fn(&Attributes) -> Result<Arc<dyn Layer>>;
pub type NativeCtor = fn(&[u8]) -> Result<Box<dyn Native>>;

/// Constructors for rebuilding simplified chains, keyed by variant name.
#[derive(Clone, Default)]
pub struct Catalog {
    layers: HashMap<String, LayerCtor>,
    natives: HashMap<String, NativeCtor>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog knowing the variants shipped with this crate.
    pub fn with_builtins() -> Self {
        Self::new()
            .layer(Passthrough::KIND, Passthrough::from_attributes)
            .layer(Audit::KIND, Audit::from_attributes)
            .native(Blob::KIND, Blob::from_payload)
    }

    pub fn layer(mut self, kind: &str, ctor: LayerCtor) -> Self {
        self.layers.insert(kind.to_string(), ctor);
        self
    }

    pub fn native(mut self, kind: &str, ctor: NativeCtor) -> Self {
        self.natives.insert(kind.to_string(), ctor);
        self
    }

    /// Rebuild a wrapped value owned by the context's default registry.
    pub fn detail(&self, ctx: &Context, simplified: &Simplified) -> Result<WrappedValue> {
        match self.detail_child(ctx, simplified)? {
            Child::Wrapped(value) => Ok(*value),
            Child::Native(native) => Err(CodecError::Unsupported(format!(
                "bare {} leaf at top level",
                native.type_key()
            ))
            .into()),
        }
    }

    fn detail_child(&self, ctx: &Context, simplified: &Simplified) -> Result<Child> {
        match simplified {
            Simplified::Native { kind, payload } => {
                let ctor = self.natives.get(kind).ok_or_else(|| Error::UnknownVariant {
                    what: "native",
                    kind: kind.clone(),
                })?;
                Ok(Child::Native(ctor(payload)?))
            }
            Simplified::Wrapped {
                kind,
                id,
                tags,
                description,
                attributes,
                child,
            } => {
                let ctor = self.layers.get(kind).ok_or_else(|| Error::UnknownVariant {
                    what: "layer",
                    kind: kind.clone(),
                })?;
                let attributes: Attributes = attributes
                    .iter()
                    .map(|(key, item)| (key.clone(), Value::from(item)))
                    .collect();
                let mut make = Make::new(ctor(&attributes)?).id(*id).tags(tags.iter().cloned());
                if let Some(text) = description {
                    make = make.description(text.clone());
                }
                if let Some(inner) = child {
                    make = make.child(self.detail_child(ctx, inner)?);
                }
                Ok(Child::Wrapped(Box::new(make.build(ctx))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ctx: &Context) -> WrappedValue {
        let inner = Make::new(Audit::layer("inner"))
            .tags(["t1"])
            .child(Blob::new("payload payload payload payload"))
            .build(ctx);
        Make::new(Passthrough::layer())
            .id(ObjectId(77))
            .description("outer layer")
            .child(inner)
            .build(ctx)
    }

    #[test]
    fn simplify_captures_metadata_and_attributes() -> Result<()> {
        let ctx = Context::new();
        let value = sample(&ctx);
        let Simplified::Wrapped { kind, id, child, .. } = simplify(&value)? else {
            panic!("expected wrapped");
        };
        assert_eq!(kind, "Passthrough");
        assert_eq!(id, ObjectId(77));
        let Some(inner) = child else {
            panic!("expected child");
        };
        let Simplified::Wrapped { attributes, tags, .. } = *inner else {
            panic!("expected wrapped child");
        };
        assert_eq!(attributes.get("label"), Some(&SimpleValue::Text("inner".into())));
        assert_eq!(tags, vec!["t1".to_string()]);
        Ok(())
    }

    #[test]
    fn frames_rebuild_the_same_chain() -> Result<()> {
        let ctx = Context::new();
        let value = sample(&ctx);
        for compression in [Compression::None, Compression::Brotli] {
            let config = CodecConfig {
                compression,
                ..CodecConfig::default()
            };
            let frame = serialize(&value, &config)?;
            assert_eq!(frame[0], compression.scheme_byte());
            let rebuilt = Catalog::with_builtins().detail(&ctx, &deserialize(&frame)?)?;
            assert_eq!(rebuilt, value);
            assert_eq!(rebuilt.to_string(), "Passthrough>Audit>Blob");
        }
        Ok(())
    }

    #[test]
    fn ser_uses_context_config() -> Result<()> {
        let ctx = Context::new().with_codec(CodecConfig {
            compression: Compression::None,
            ..CodecConfig::default()
        });
        let frame = sample(&ctx).ser(&ctx)?;
        assert_eq!(frame[0], 0);
        Ok(())
    }

    #[test]
    fn corrupted_frame_is_rejected() -> Result<()> {
        let ctx = Context::new();
        let mut frame = sample(&ctx).serialize(&ctx)?;
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(matches!(
            deserialize(&frame),
            Err(Error::Codec(CodecError::Digest { .. }))
        ));
        assert!(matches!(
            deserialize(&[]),
            Err(Error::Codec(CodecError::Empty))
        ));
        assert!(matches!(
            deserialize(&[9; 40]),
            Err(Error::Codec(CodecError::UnknownScheme(9)))
        ));
        Ok(())
    }

    #[test]
    fn unknown_variant_is_reported() -> Result<()> {
        let ctx = Context::new();
        let frame = sample(&ctx).serialize(&ctx)?;
        let catalog = Catalog::new().layer(Passthrough::KIND, Passthrough::from_attributes);
        assert!(matches!(
            catalog.detail(&ctx, &deserialize(&frame)?),
            Err(Error::UnknownVariant { what: "layer", .. })
        ));
        Ok(())
    }

    #[test]
    fn compression_parses_from_flags() {
        assert_eq!("Brotli".parse::<Compression>(), Ok(Compression::Brotli));
        assert_eq!("none".parse::<Compression>(), Ok(Compression::None));
        assert!("lz4".parse::<Compression>().is_err());
    }
}
