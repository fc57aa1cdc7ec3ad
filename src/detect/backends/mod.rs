pub mod color_blob;
pub mod stub;

pub use color_blob::{ColorBlobBackend, ColorClass};
pub use stub::StubBackend;
