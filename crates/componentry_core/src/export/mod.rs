//! Export handles: erased and typed.

pub mod handle;
pub mod typed;

pub use handle::{ExportHandle, Factory, Instance};
pub use typed::Export;
