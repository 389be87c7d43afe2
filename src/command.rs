//! The unit of dispatch: an operation name plus its arguments.

use smallvec::SmallVec;

use crate::value::{Kwargs, Value};

/// Segments of a dotted operation path such as `linalg.solve`.
pub type OpPath<'a> = SmallVec<[&'a str; 4]>;

/// `(operation name, unused target slot, positional args, named args)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    name: String,
    /// Receiver slot; always `None` once a command has been forwarded.
    pub target: Option<Box<Value>>,
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            target: None,
            args,
            kwargs: Kwargs::new(),
        }
    }

    pub fn with_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> OpPath<'_> {
        self.name.split('.').collect()
    }

    pub fn into_parts(self) -> (String, Option<Box<Value>>, Vec<Value>, Kwargs) {
        (self.name, self.target, self.args, self.kwargs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_splits_on_dots() {
        let cmd = Command::new("linalg.solve", Vec::new());
        assert_eq!(cmd.path().as_slice(), &["linalg", "solve"]);
        assert_eq!(Command::new("shape", Vec::new()).path().len(), 1);
    }
}
