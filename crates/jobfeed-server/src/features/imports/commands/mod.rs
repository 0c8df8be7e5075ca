//! Import commands

pub mod trigger_import;

pub use trigger_import::{TriggerImportCommand, TriggerImportError, TriggerImportResponse};
