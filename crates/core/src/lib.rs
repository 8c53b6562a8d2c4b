//! Shared primitives used across the capability router: ids and timestamps,
//! a swappable clock, the tool/registry data model, and embedded JSON Schema
//! validation for on-disk documents.

#![deny(unsafe_code)]

/// Version of the core library, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod clock;
pub mod ids;
pub mod model;
pub mod schema;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use model::{
    validate_tool, Capability, Endpoint, Preconditions, RegistryDocument, Sla, Tool,
    ToolValidationError,
};
pub use schema::SchemaError;
