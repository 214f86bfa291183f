//! Method-level instrumentation.
//!
//! # Data Flow
//! ```text
//! Instrumentable::operations()      (explicit operation table)
//!     → filter.rs (inclusion / exclusion patterns, omissions)
//!     → decorator.rs (wrap each entry with the tracing policy)
//!     → Instance::invoke (runs inside "{Owner} - {operation}" span)
//! ```

pub mod decorator;
pub mod filter;
pub mod instance;

pub use decorator::{operation_name, TracedOperation};
pub use filter::OperationFilter;
pub use instance::{
    instrument, Instance, Instrumentable, OperationError, OperationResult, Operations,
};
