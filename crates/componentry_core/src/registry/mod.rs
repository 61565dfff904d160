//! Module registry and the export manager built on top of it.

pub mod manager;
pub mod modules;

pub use manager::{ExportManager, ExportManagerBuilder};
pub use modules::{ModuleEntry, ModuleRegistry};
