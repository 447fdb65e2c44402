//! Entity bindings: schema-checked access to one entity kind on one tenant
//! connection.

pub mod binding;
pub mod registry;

pub use binding::EntityBinding;
pub use registry::ModelRegistry;
