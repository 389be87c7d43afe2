//! Composable wrapper chains: layers that intercept, forward and rewrap
//! operations applied to a native value.

pub mod codec;
pub mod command;
pub mod context;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod id;
pub mod init;
pub mod layers;
pub mod logging;
pub mod native;
pub mod object;
pub mod overrides;
pub mod registry;
pub mod value;

pub use codec::{Catalog, CodecConfig, Compression, Simplified, deserialize, serialize, simplify};
pub use command::Command;
pub use context::Context;
pub use dispatch::{Dispatcher, dispatch};
pub use error::{CodecError, Error, Result};
pub use id::{IdProvider, ObjectId, SequentialIds};
pub use init::{InitOptions, Managed, NativeInit, initialize};
pub use layers::{Audit, Passthrough};
pub use native::{Blob, Engine, Native};
pub use object::{Child, Layer, Make, WrappedValue};
pub use overrides::{Attr, Namespace};
pub use registry::{LocalRegistry, Registry};
pub use value::{Attributes, Kwargs, TypeKey, Value};
