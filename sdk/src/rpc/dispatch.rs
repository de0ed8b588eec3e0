//! # Dispatch Table
//!
//! Explicit mapping from procedure name to handler, built once per server
//! and frozen. A missing key is the "unknown method" case; the dispatch
//! layer reports it as a typed error and leaves the decision about what to
//! do with it (log and carry on) to the listener.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::error::Result;
use crate::rpc::codec::RpcRequest;

/// Routing failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler is registered under this procedure name.
    #[error("unrecognized rpc procedure: {0}")]
    UnknownMethod(String),

    /// The wire method has no `Namespace.` prefix to strip.
    #[error("method {0:?} is not namespace-qualified")]
    MalformedMethod(String),
}

/// A registered procedure. Receives the first request parameter, if any.
pub type Handler = Arc<dyn Fn(Option<Value>) -> Result<()> + Send + Sync>;

/// Immutable procedure-name → handler map.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<String, Handler>,
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("DispatchTable")
            .field("procedures", &names)
            .finish()
    }
}

impl DispatchTable {
    /// Starts an empty table.
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    /// Routes `request` to its handler and runs it.
    pub fn dispatch(&self, request: &RpcRequest) -> Result<()> {
        let procedure = request.procedure()?;
        let handler = self
            .handlers
            .get(procedure)
            .ok_or_else(|| DispatchError::UnknownMethod(procedure.to_string()))?;
        handler(request.first_param().cloned())
    }

    /// `true` if `procedure` has a handler.
    pub fn contains(&self, procedure: &str) -> bool {
        self.handlers.contains_key(procedure)
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Collects handlers before freezing them into a [`DispatchTable`].
#[derive(Default)]
pub struct DispatchTableBuilder {
    handlers: HashMap<String, Handler>,
}

impl DispatchTableBuilder {
    /// Registers `handler` under `procedure`. A later registration for the
    /// same name replaces the earlier one.
    pub fn register<F>(self, procedure: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Value>) -> Result<()> + Send + Sync + 'static,
    {
        self.register_handler(procedure, Arc::new(handler))
    }

    /// Registers an already-boxed [`Handler`].
    pub fn register_handler(mut self, procedure: impl Into<String>, handler: Handler) -> Self {
        self.handlers.insert(procedure.into(), handler);
        self
    }

    /// Freezes the table.
    pub fn build(self) -> DispatchTable {
        DispatchTable {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recording_table() -> (DispatchTable, Arc<Mutex<Vec<Option<Value>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let table = DispatchTable::builder()
            .register("CommitBlock", move |param| {
                sink.lock().push(param);
                Ok(())
            })
            .build();
        (table, seen)
    }

    #[test]
    fn routes_by_suffix_with_first_param_only() {
        let (table, seen) = recording_table();
        let req = RpcRequest::new("Babble.CommitBlock", vec![json!({"a": 1}), json!(2)], 5);

        table.dispatch(&req).unwrap();

        assert_eq!(seen.lock().as_slice(), &[Some(json!({"a": 1}))]);
    }

    #[test]
    fn namespace_is_ignored() {
        let (table, seen) = recording_table();
        table
            .dispatch(&RpcRequest::new("State.CommitBlock", vec![], 1))
            .unwrap();
        assert_eq!(seen.lock().as_slice(), &[None]);
    }

    #[test]
    fn unknown_procedure_is_typed_error() {
        let (table, seen) = recording_table();
        let err = table
            .dispatch(&RpcRequest::new("Babble.Explode", vec![], 1))
            .unwrap_err();

        assert!(matches!(
            err,
            ProxyError::Dispatch(DispatchError::UnknownMethod(ref p)) if p == "Explode"
        ));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn unqualified_method_is_typed_error() {
        let (table, _) = recording_table();
        let err = table
            .dispatch(&RpcRequest::new("CommitBlock", vec![], 1))
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Dispatch(DispatchError::MalformedMethod(_))
        ));
    }

    #[test]
    fn handler_errors_propagate() {
        let table = DispatchTable::builder()
            .register("Fail", |_| Err(ProxyError::Config("nope".into())))
            .build();
        let err = table
            .dispatch(&RpcRequest::new("X.Fail", vec![], 1))
            .unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn debug_lists_procedures() {
        let (table, _) = recording_table();
        assert_eq!(table.len(), 1);
        assert!(table.contains("CommitBlock"));
        assert!(format!("{:?}", table).contains("CommitBlock"));
    }
}
