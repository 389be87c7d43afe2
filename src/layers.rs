//! Built-in layer variants.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::object::Layer;
use crate::overrides::Namespace;
use crate::value::{Attributes, TypeKey, Value};

/// Forwards every command unchanged.
#[derive(Debug, Default)]
pub struct Passthrough;

impl Passthrough {
    pub const KIND: &'static str = "Passthrough";

    pub fn layer() -> Arc<dyn Layer> {
        Arc::new(Passthrough)
    }

    pub fn from_attributes(_attributes: &Attributes) -> Result<Arc<dyn Layer>> {
        Ok(Passthrough::layer())
    }
}

impl Layer for Passthrough {
    fn type_key(&self) -> TypeKey {
        TypeKey::of::<Passthrough>(Self::KIND)
    }

    fn rebuild(&self, attributes: &Attributes) -> Result<Arc<dyn Layer>> {
        Passthrough::from_attributes(attributes)
    }
}

/// Records every command forwarded through it.
///
/// Entries read `op/argc`. They can be fetched through the chain itself
/// with the `audit.entries` operation, which this layer answers directly;
/// `audit.label` returns the layer's label.
#[derive(Debug)]
pub struct Audit {
    label: String,
    log: Arc<Mutex<Vec<String>>>,
    overrides: Namespace,
}

impl Audit {
    pub const KIND: &'static str = "Audit";

    pub fn new(label: impl Into<String>) -> Self {
        Self::with_log(label.into(), Arc::default())
    }

    fn with_log(label: String, log: Arc<Mutex<Vec<String>>>) -> Self {
        let entries = log.clone();
        let overrides = Namespace::new()
            .constant("audit.label", Value::Text(label.clone()))
            .handler("audit.entries", move |_, _, _| {
                let entries = entries.lock().expect("audit log poisoned");
                Ok(Value::List(entries.iter().cloned().map(Value::Text).collect()))
            });
        Self {
            label,
            log,
            overrides,
        }
    }

    pub fn layer(label: impl Into<String>) -> Arc<dyn Layer> {
        Arc::new(Audit::new(label))
    }

    /// Fresh `Audit` with an empty log.
    pub fn from_attributes(attributes: &Attributes) -> Result<Arc<dyn Layer>> {
        Ok(Audit::layer(Self::label_from(attributes)?))
    }

    fn label_from(attributes: &Attributes) -> Result<&str> {
        attributes
            .get("label")
            .and_then(Value::as_text)
            .ok_or_else(|| Error::BadAttribute {
                layer: Self::KIND,
                name: "label".to_string(),
            })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().expect("audit log poisoned").clone()
    }
}

impl Layer for Audit {
    fn type_key(&self) -> TypeKey {
        TypeKey::of::<Audit>(Self::KIND)
    }

    fn class_attributes(&self) -> Attributes {
        Attributes::from([("label".to_string(), Value::Text(self.label.clone()))])
    }

    /// Keeps writing to the same log, so history survives `get()`.
    fn rebuild(&self, attributes: &Attributes) -> Result<Arc<dyn Layer>> {
        let label = Self::label_from(attributes)?;
        Ok(Arc::new(Audit::with_log(label.to_string(), self.log.clone())))
    }

    fn overrides(&self) -> &Namespace {
        &self.overrides
    }

    fn on_function_call(&self, command: &Command) {
        let entry = format!("{}/{}", command.name(), command.args.len());
        info!(label = %self.label, op = command.name(), args = command.args.len(), "audit");
        self.log.lock().expect("audit log poisoned").push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_rebuilds_from_label() -> Result<()> {
        let audit = Audit::new("ledger");
        let rebuilt = audit.rebuild(&audit.class_attributes())?;
        assert_eq!(rebuilt.class_attributes(), audit.class_attributes());
        assert!(matches!(
            audit.rebuild(&Attributes::new()),
            Err(Error::BadAttribute { .. })
        ));
        Ok(())
    }

    #[test]
    fn audit_hook_appends_entries() {
        let audit = Audit::new("ledger");
        audit.on_function_call(&Command::new("concat", vec![Value::Unit, Value::Unit]));
        audit.on_function_call(&Command::new("len", vec![Value::Unit]));
        assert_eq!(audit.entries(), vec!["concat/2", "len/1"]);
    }

    #[test]
    fn rebuilt_audit_keeps_history() -> Result<()> {
        let audit = Audit::new("ledger");
        audit.on_function_call(&Command::new("upper", vec![Value::Unit]));
        let rebuilt = audit.rebuild(&audit.class_attributes())?;
        rebuilt.on_function_call(&Command::new("len", vec![Value::Unit]));
        assert_eq!(audit.entries(), vec!["upper/1", "len/1"]);

        let fresh = Audit::from_attributes(&audit.class_attributes())?;
        fresh.on_function_call(&Command::new("eq", Vec::new()));
        assert_eq!(audit.entries().len(), 2);
        Ok(())
    }

    #[test]
    fn passthrough_has_no_overrides() {
        assert!(Passthrough.overrides().is_empty());
        assert!(Passthrough.class_attributes().is_empty());
    }
}
