//! Configuration loading, merging, validation, and canonical serialization

pub mod canonical;
pub mod document;
pub mod loader;
pub mod validate;

pub use canonical::to_canonical_yaml;
pub use document::{Document, DocumentMetadata, DocumentType, ExternalSourceRef};
pub use loader::{LoadOutcome, Loader};
pub use validate::{ValidationMessage, ValidationReport, ValidationSeverity};
