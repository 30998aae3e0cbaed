//! medialib: a metadata catalogue for media collections.
//!
//! A collection is a set of root folders. Reindexing walks the roots, runs
//! every media file through the metadata extractor and writes the results
//! into a new immutable *generation*. Readers pin a generation and keep
//! seeing it until they let go, while the next one is built alongside.
//!
//! - `manager`: collection lifecycle, the entry point
//! - `engine`: index builder, filter language and query service
//! - `storage`: catalog, generation files, process-wide registry
//! - `extract`: metadata extractor boundary and content fingerprints

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod extract;
pub mod logging;
pub mod manager;
pub mod model;
pub mod state;
pub mod storage;

pub use config::EngineConfig;
pub use engine::{BuildOutcome, BuildWarning, Field, Filter, Query, QueryOutput, ResultSet, WarningKind};
pub use error::{EngineError, Result};
pub use extract::{ExtractError, ExtractedMetadata, ExtractorCapabilities, MetadataExtractor};
pub use manager::{CollectionHandle, CollectionManager};
pub use model::{CollectionId, CollectionInfo, Fingerprint, GenerationId, MediaRecord, TagValue};
pub use state::CollectionState;
pub use storage::GenerationRef;
