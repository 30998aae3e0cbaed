//! Metadata extraction boundary.
//!
//! The engine never talks to an extraction tool directly; it goes through
//! `MetadataExtractor`. `ExifTool` is the production adapter, tests plug in
//! their own implementations.

pub mod exiftool;
pub mod fingerprint;

pub use exiftool::ExifTool;
pub use fingerprint::FingerprintService;

use crate::error::Result;
use crate::model::TagValue;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Tag groups that describe the file on disk or the tool itself rather than the media.
const NON_MEDIA_GROUPS: &[&str] = &["System", "ExifTool", "SourceFile"];

#[derive(Error, Debug)]
pub enum ExtractError {
    /// The tool could not be started at all; fatal for a build.
    #[error("extractor unavailable: {0}")]
    Unavailable(String),

    /// The tool ran but rejected the file.
    #[error("extraction failed: {0}")]
    Failed(String),

    /// The tool produced output we could not interpret.
    #[error("malformed extractor output: {0}")]
    Malformed(String),
}

/// What a successful probe learned about the tool.
#[derive(Debug, Clone, Default)]
pub struct ExtractorCapabilities {
    pub version: String,
    /// Upper-case file extensions the tool understands; `None` means "try everything".
    pub extensions: Option<HashSet<String>>,
}

impl ExtractorCapabilities {
    pub fn supports(&self, path: &Path) -> bool {
        let Some(extensions) = &self.extensions else {
            return true;
        };
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| extensions.contains(&ext.to_uppercase()))
            .unwrap_or(false)
    }
}

/// Typed output of one extraction call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMetadata {
    pub format: Option<String>,
    pub mime: Option<String>,
    pub tags: BTreeMap<String, TagValue>,
    /// Errors/warnings the tool reported alongside its output
    pub problems: Vec<String>,
}

impl ExtractedMetadata {
    /// True when at least one tag describes the media itself.
    pub fn has_usable_tags(&self) -> bool {
        self.tags.keys().any(|key| {
            let group = key.split_once(':').map(|(g, _)| g).unwrap_or(key.as_str());
            !NON_MEDIA_GROUPS.contains(&group)
        })
    }
}

pub trait MetadataExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Check the tool is present and working. Fails with `ExtractorUnavailable`.
    fn probe(&self) -> Result<ExtractorCapabilities>;

    /// Extract metadata for one file. Blocking.
    fn extract(&self, path: &Path) -> std::result::Result<ExtractedMetadata, ExtractError>;
}
