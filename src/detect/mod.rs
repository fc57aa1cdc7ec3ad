//! Pluggable detector backends for object-detection pipelines.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{ColorBlobBackend, ColorClass, StubBackend};
pub use registry::BackendRegistry;
pub use result::Detection;
