//! CSV + ZIP personnel import: schema check, row checks, archive checks,
//! staging and commit.

pub mod archive;
pub mod error;
pub mod importer;
pub mod pipeline;
pub mod rows;
pub mod schema;
pub mod staging;

#[cfg(test)]
pub(crate) mod test_support;

pub use archive::{validate_archive, ArchiveLimits, ProfileArchive};
pub use error::{ArchiveError, ImportError, RowImportError, RowValidationError, SchemaError};
pub use importer::Importer;
pub use pipeline::{ImportCaller, ImportPipeline};
pub use staging::StagingArea;
