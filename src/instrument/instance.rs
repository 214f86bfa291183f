//! Instrumentation of whole objects.
//!
//! A type opts in by implementing `Instrumentable`, which lists its invocable
//! operations as named handlers over JSON arguments. `Instance` owns the
//! object together with that table and can wrap each entry with the tracing
//! policy from `decorator`.
//!
//! # Design Decisions
//! - Operations are enumerated from an explicit table, never discovered
//! - Names that start and end with `__` are reserved and never traced
//! - Every entry carries a traced marker, so instrumenting twice is a no-op

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use super::decorator::TracedOperation;
use super::filter::OperationFilter;
use crate::tracer::Tracer;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OperationError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("invalid arguments for {operation}: {message}")]
    InvalidArguments { operation: String, message: String },

    #[error("{0}")]
    Failed(String),
}

pub type OperationResult = Result<Value, OperationError>;

type Handler<T> = Arc<dyn Fn(&T, Value) -> OperationResult + Send + Sync>;

/// The operation table of an instrumentable type.
pub struct Operations<T> {
    entries: Vec<Entry<T>>,
}

struct Entry<T> {
    name: &'static str,
    handler: Handler<T>,
    traced: bool,
}

impl<T> Operations<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `handler` under `name`, replacing an earlier entry of the same name.
    pub fn with<F>(mut self, name: &'static str, handler: F) -> Self
    where
        F: Fn(&T, Value) -> OperationResult + Send + Sync + 'static,
    {
        self.entries.retain(|e| e.name != name);
        self.entries.push(Entry {
            name,
            handler: Arc::new(handler),
            traced: false,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for Operations<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A type whose operations can be traced.
pub trait Instrumentable: Send + Sync + Sized + 'static {
    /// The operation table.
    fn operations() -> Operations<Self>;

    /// Owner part of span names; defaults to the bare type name.
    fn owner_name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }
}

/// Whether `name` is reserved and excluded from instrumentation.
pub fn is_reserved(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// An object bundled with its (possibly traced) operation table.
pub struct Instance<T> {
    target: T,
    owner: String,
    operations: Operations<T>,
}

impl<T: Instrumentable> Instance<T> {
    pub fn new(target: T) -> Self {
        let owner = target.owner_name().to_string();
        Self {
            target,
            owner,
            operations: T::operations(),
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn into_inner(self) -> T {
        self.target
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn operation_names(&self) -> Vec<&'static str> {
        self.operations.entries.iter().map(|e| e.name).collect()
    }

    pub fn is_traced(&self, name: &str) -> bool {
        self.operations
            .entries
            .iter()
            .any(|e| e.name == name && e.traced)
    }

    /// Invoke the operation called `name`.
    pub fn invoke(&self, name: &str, args: Value) -> OperationResult {
        let entry = self
            .operations
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| OperationError::UnknownOperation(name.to_string()))?;
        (entry.handler)(&self.target, args)
    }

    /// Wrap every operation not in `omissions` with the tracing policy.
    ///
    /// Returns how many operations were newly wrapped.
    pub fn instrument(&mut self, tracer: Arc<Tracer>, omissions: &[&str]) -> usize {
        self.instrument_filtered(tracer, omissions, &OperationFilter::allow_all())
    }

    /// Like `instrument`, additionally skipping names rejected by `filter`.
    pub fn instrument_filtered(
        &mut self,
        tracer: Arc<Tracer>,
        omissions: &[&str],
        filter: &OperationFilter,
    ) -> usize {
        let omitted: HashSet<&str> = omissions.iter().copied().collect();
        let mut wrapped = 0;

        for entry in &mut self.operations.entries {
            if entry.traced
                || is_reserved(entry.name)
                || omitted.contains(entry.name)
                || !filter.allows(entry.name)
            {
                continue;
            }

            let op = TracedOperation::new(tracer.clone(), &self.owner, entry.name);
            let inner = entry.handler.clone();
            entry.handler = Arc::new(move |target: &T, args: Value| {
                op.call(|| inner(target, args))
            });
            entry.traced = true;
            wrapped += 1;
        }

        tracing::debug!(owner = %self.owner, wrapped, "Instance instrumented");
        wrapped
    }
}

impl<T> std::fmt::Debug for Instance<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.operations.entries.iter().map(|e| e.name).collect();
        f.debug_struct("Instance")
            .field("owner", &self.owner)
            .field("operations", &names)
            .finish()
    }
}

/// Wrap `target` and trace every operation not in `omissions`.
pub fn instrument<T: Instrumentable>(
    target: T,
    tracer: Arc<Tracer>,
    omissions: &[&str],
) -> Instance<T> {
    let mut instance = Instance::new(target);
    instance.instrument(tracer, omissions);
    instance
}
