//! Per-variant override tables addressed by dotted operation paths.
//!
//! A layer that wants to special-case an operation registers a handler (or
//! a constant attribute) under the operation's path. The dispatcher probes
//! this table before any unwrapping happens.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::command::OpPath;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::value::{Kwargs, Value};

/// Callable bound to an override path.
pub type Handler = Arc<dyn Fn(&Context, Vec<Value>, Kwargs) -> Result<Value> + Send + Sync>;

/// One entry of a namespace.
#[derive(Clone)]
pub enum Attr {
    Namespace(Namespace),
    Handler(Handler),
    Constant(Value),
}

impl fmt::Debug for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attr::Namespace(ns) => f.debug_tuple("Namespace").field(ns).finish(),
            Attr::Handler(_) => f.write_str("Handler(..)"),
            Attr::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
        }
    }
}

/// Tree of named attributes resolved segment by segment.
#[derive(Clone, Debug, Default)]
pub struct Namespace {
    entries: HashMap<String, Attr>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bind a handler at `path`, creating intermediate namespaces.
    pub fn handler<F>(self, path: &str, f: F) -> Self
    where
        F: Fn(&Context, Vec<Value>, Kwargs) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(path, Attr::Handler(Arc::new(f)))
    }

    /// Bind a plain attribute value at `path`.
    pub fn constant(self, path: &str, value: Value) -> Self {
        self.insert(path, Attr::Constant(value))
    }

    pub fn insert(mut self, path: &str, attr: Attr) -> Self {
        let mut segments = path.split('.').collect::<Vec<_>>();
        let leaf = segments.pop().unwrap_or_default();
        let mut ns = &mut self;
        for segment in segments {
            let slot = ns
                .entries
                .entry(segment.to_string())
                .or_insert_with(|| Attr::Namespace(Namespace::new()));
            if !matches!(slot, Attr::Namespace(_)) {
                *slot = Attr::Namespace(Namespace::new());
            }
            let Attr::Namespace(inner) = slot else {
                unreachable!("slot was just set to a namespace")
            };
            ns = inner;
        }
        ns.entries.insert(leaf.to_string(), attr);
        self
    }

    /// Resolve `a.b.c` left to right.
    ///
    /// Fails with `Error::AttributeMiss` naming the first segment that is
    /// absent, including a segment looked up on a handler or constant.
    pub fn resolve(&self, path: &str) -> Result<&Attr> {
        self.resolve_path(&path.split('.').collect::<OpPath>())
    }

    /// Resolve pre-split segments, e.g. from `Command::path`.
    pub fn resolve_path(&self, segments: &[&str]) -> Result<&Attr> {
        let Some((first, rest)) = segments.split_first() else {
            return Err(miss("", ""));
        };
        let path = segments.join(".");
        let mut current = self.lookup(&path, first)?;
        for segment in rest {
            current = match current {
                Attr::Namespace(ns) => ns.lookup(&path, segment)?,
                _ => return Err(miss(&path, segment)),
            };
        }
        Ok(current)
    }

    fn lookup(&self, path: &str, segment: &str) -> Result<&Attr> {
        self.entries.get(segment).ok_or_else(|| miss(path, segment))
    }
}

fn miss(path: &str, segment: &str) -> Error {
    Error::AttributeMiss {
        path: path.to_string(),
        segment: segment.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    fn table() -> Namespace {
        Namespace::new()
            .constant("shape", Value::I64(3))
            .handler("linalg.solve", |_, args, _| Ok(Value::I64(args.len() as i64)))
    }

    #[test]
    fn resolves_nested_paths() -> Result<()> {
        let ns = table();
        assert!(matches!(ns.resolve("linalg.solve")?, Attr::Handler(_)));
        assert!(matches!(ns.resolve("linalg")?, Attr::Namespace(_)));
        assert!(matches!(ns.resolve("shape")?, Attr::Constant(Value::I64(3))));
        Ok(())
    }

    #[test]
    fn reports_first_missing_segment() {
        let ns = table();
        match ns.resolve("linalg.inv") {
            Err(Error::AttributeMiss { segment, .. }) => assert_eq!(segment, "inv"),
            other => panic!("expected miss, got {other:?}"),
        }
        assert!(matches!(
            ns.resolve("shape.size"),
            Err(Error::AttributeMiss { .. })
        ));
        assert!(matches!(ns.resolve("add"), Err(Error::AttributeMiss { .. })));
    }

    #[test]
    fn resolves_command_paths() -> Result<()> {
        let ns = table();
        let cmd = Command::new("linalg.solve", Vec::new());
        assert!(matches!(ns.resolve_path(&cmd.path())?, Attr::Handler(_)));
        match ns.resolve_path(&["linalg", "inv"]) {
            Err(Error::AttributeMiss { path, segment }) => {
                assert_eq!(path, "linalg.inv");
                assert_eq!(segment, "inv");
            }
            other => panic!("expected miss, got {other:?}"),
        }
        Ok(())
    }
}
