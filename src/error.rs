//! Error kinds surfaced by the wrapper chain.

use thiserror::Error;

use crate::id::ObjectId;
use crate::value::TypeKey;

/// Failures raised while building, tagging, dispatching or encoding chains.
#[derive(Debug, Error)]
pub enum Error {
    /// Tagging or re-registration was attempted on a value without a live owner.
    #[error("can't tag or register object {id}: it has no owner")]
    NoOwner { id: ObjectId },

    /// A dotted operation path did not resolve on the variant's overrides.
    ///
    /// Only the dispatcher's override probe treats this as routing information.
    #[error("`{path}` has no attribute `{segment}`")]
    AttributeMiss { path: String, segment: String },

    /// An override path resolved to a namespace rather than a handler.
    #[error("`{path}` resolves to a namespace and is not callable")]
    NotCallable { path: String },

    /// Wrapped arguments of one command unwrap to different concrete types.
    #[error("command `{op}` mixes child types {expected} and {found}")]
    TypeMismatch {
        op: String,
        expected: TypeKey,
        found: TypeKey,
    },

    /// A command reached generic dispatch without any wrapped argument.
    #[error("command `{op}` has no wrapped argument to unwrap on {layer}")]
    NothingToUnwrap { op: String, layer: &'static str },

    /// The operation needed the next layer but the value has none.
    #[error("{layer} object {id} has no child")]
    MissingChild { layer: &'static str, id: ObjectId },

    /// A class attribute needed to rebuild a variant is missing or mistyped.
    #[error("{layer} cannot be rebuilt: bad class attribute `{name}`")]
    BadAttribute { layer: &'static str, name: String },

    /// A leaf engine or native construction routine failed.
    #[error("native operation `{op}` failed")]
    Engine {
        op: String,
        #[source]
        source: anyhow::Error,
    },

    /// The codec catalog has no constructor for a serialized variant name.
    #[error("unknown {what} `{kind}` in serialized payload")]
    UnknownVariant { what: &'static str, kind: String },

    /// Simplify, serialize or compress stage failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Failures of the simplify → serialize → compress pipeline and its inverse.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cbor encoding failed")]
    Cbor(#[from] serde_cbor::Error),

    #[error("compression stream failed")]
    Io(#[from] std::io::Error),

    #[error("payload is empty")]
    Empty,

    #[error("unknown compression scheme byte {0}")]
    UnknownScheme(u8),

    #[error("payload digest mismatch: expected {expected}, computed {computed}")]
    Digest { expected: String, computed: String },

    #[error("value `{0}` cannot be simplified")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;
