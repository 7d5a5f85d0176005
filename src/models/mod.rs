//! Declarative data-model registry surface.

pub mod definition;

pub use definition::{ConversionTarget, ModelDefinition};
