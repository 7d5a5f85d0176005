//! Typed method registry and dispatcher.
//!
//! Methods are declared with a builder (`registry.new_method(...).model()
//! .groups(...).register()`) against one of two typed handler shapes, and
//! dispatched through the JSON entry point or the URL-addressable variants.

pub mod call;
pub mod method;
pub mod registry;

pub use call::{ApiCall, ApiResponse};
pub use method::{
    model_handler, record_handler, ApiMethod, CallContext, Handler, MethodBuilder, MethodKind,
    MethodResult, ModelHandlerFn, RecordHandlerFn,
};
pub use registry::{registry_summary, ApiRegistry};
