//! Tool metadata: manifest registry and parameter coercion.

pub mod params;
pub mod registry;

pub use params::{ParamKind, ParamSchema, PropertySchema};
pub use registry::{ToolDescriptor, ToolRegistry};
