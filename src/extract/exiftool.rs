//! ExifTool adapter
//!
//! Runs `exiftool -json -G1` per file and converts its JSON into typed
//! metadata. Group-qualified keys (`File:FileType`, `IFD0:Make`, ...) are
//! kept as tag names.

use super::{ExtractError, ExtractedMetadata, ExtractorCapabilities, MetadataExtractor};
use crate::error::{EngineError, Result};
use crate::model::TagValue;
use std::io;
use std::path::{Path, PathBuf};
use std::ffi::OsStr;
use std::process::{Command, Output};

const KEY_SOURCE_FILE: &str = "SourceFile";
const KEY_TOOL_VERSION: &str = "ExifTool:ExifToolVersion";
const KEY_ERROR: &str = "ExifTool:Error";
const KEY_WARNING: &str = "ExifTool:Warning";
const KEY_FILE_TYPE: &str = "File:FileType";
const KEY_MIME_TYPE: &str = "File:MIMEType";

pub struct ExifTool {
    program: PathBuf,
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    fn run(&self, args: &[&OsStr]) -> io::Result<Output> {
        Command::new(&self.program).args(args).output()
    }

    fn unavailable(&self, e: io::Error) -> String {
        format!("{}: {}", self.program.display(), e)
    }

    /// Parse `exiftool -json -G1` output for a single file.
    pub fn parse_output(raw: &str) -> std::result::Result<ExtractedMetadata, ExtractError> {
        let parsed: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| ExtractError::Malformed(e.to_string()))?;

        let object = parsed
            .as_array()
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.as_object())
            .ok_or_else(|| ExtractError::Malformed("expected a JSON array with one object".into()))?;

        let mut meta = ExtractedMetadata::default();
        for (key, value) in object {
            match key.as_str() {
                KEY_SOURCE_FILE | KEY_TOOL_VERSION => continue,
                KEY_ERROR | KEY_WARNING => {
                    if let Some(text) = value.as_str() {
                        meta.problems.push(text.to_string());
                    }
                    continue;
                }
                _ => {}
            }
            let Some(tag) = TagValue::from_json(value) else { continue };
            match key.as_str() {
                KEY_FILE_TYPE => meta.format = tag.as_text().map(|s| s.to_uppercase()),
                KEY_MIME_TYPE => meta.mime = tag.as_text().map(str::to_string),
                _ => {}
            }
            meta.tags.insert(key.clone(), tag);
        }
        Ok(meta)
    }

    /// Parse `exiftool -listf` output into upper-case extensions.
    pub fn parse_extensions(raw: &str) -> std::collections::HashSet<String> {
        let body = raw.split_once(':').map(|(_, rest)| rest).unwrap_or(raw);
        body.split_whitespace().map(|ext| ext.to_uppercase()).collect()
    }
}

impl MetadataExtractor for ExifTool {
    fn name(&self) -> &str {
        "exiftool"
    }

    fn probe(&self) -> Result<ExtractorCapabilities> {
        let version = self
            .run(&[OsStr::new("-ver")])
            .map_err(|e| EngineError::ExtractorUnavailable(self.unavailable(e)))?;
        if !version.status.success() {
            return Err(EngineError::ExtractorUnavailable(format!(
                "{} -ver exited with {}",
                self.program.display(),
                version.status
            )));
        }
        let version = String::from_utf8_lossy(&version.stdout).trim().to_string();

        let extensions = match self.run(&[OsStr::new("-listf")]) {
            Ok(out) if out.status.success() => {
                Some(Self::parse_extensions(&String::from_utf8_lossy(&out.stdout)))
            }
            Ok(out) => {
                tracing::warn!("[ExifTool] -listf exited with {}; not filtering by extension", out.status);
                None
            }
            Err(e) => return Err(EngineError::ExtractorUnavailable(self.unavailable(e))),
        };

        tracing::info!("[ExifTool] Found exiftool {} at {}", version, self.program.display());
        Ok(ExtractorCapabilities { version, extensions })
    }

    fn extract(&self, path: &Path) -> std::result::Result<ExtractedMetadata, ExtractError> {
        let output = self
            .run(&[OsStr::new("-json"), OsStr::new("-G1"), OsStr::new("-q"), path.as_os_str()])
            .map_err(|e| ExtractError::Unavailable(self.unavailable(e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Failed(if stderr.trim().is_empty() {
                format!("no output (exit status {})", output.status)
            } else {
                stderr.trim().to_string()
            }));
        }

        // exiftool exits non-zero for files it could only partly read; the
        // JSON (including its Error key) is still authoritative.
        Self::parse_output(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jpeg_output() {
        let raw = r#"[{
            "SourceFile": "/photos/a.jpg",
            "ExifTool:ExifToolVersion": 12.76,
            "System:FileName": "a.jpg",
            "System:FileSize": "2.1 MB",
            "File:FileType": "JPEG",
            "File:MIMEType": "image/jpeg",
            "File:ImageWidth": 4032,
            "IFD0:Make": "Apple",
            "Composite:Megapixels": 12.2
        }]"#;

        let meta = ExifTool::parse_output(raw).unwrap();
        assert_eq!(meta.format.as_deref(), Some("JPEG"));
        assert_eq!(meta.mime.as_deref(), Some("image/jpeg"));
        assert_eq!(meta.tags.get("File:ImageWidth"), Some(&TagValue::Integer(4032)));
        assert_eq!(meta.tags.get("Composite:Megapixels"), Some(&TagValue::Real(12.2)));
        assert!(!meta.tags.contains_key("SourceFile"));
        assert!(!meta.tags.contains_key("ExifTool:ExifToolVersion"));
        assert!(meta.problems.is_empty());
        assert!(meta.has_usable_tags());
    }

    #[test]
    fn test_parse_error_output() {
        let raw = r#"[{
            "SourceFile": "/photos/broken.jpg",
            "ExifTool:Error": "File format error",
            "System:FileName": "broken.jpg"
        }]"#;

        let meta = ExifTool::parse_output(raw).unwrap();
        assert_eq!(meta.problems, vec!["File format error".to_string()]);
        assert!(!meta.has_usable_tags());
    }

    #[test]
    fn test_parse_malformed_output() {
        assert!(matches!(ExifTool::parse_output("not json"), Err(ExtractError::Malformed(_))));
        assert!(matches!(ExifTool::parse_output("{}"), Err(ExtractError::Malformed(_))));
        assert!(matches!(ExifTool::parse_output("[]"), Err(ExtractError::Malformed(_))));
    }

    #[test]
    fn test_parse_extensions() {
        let raw = "Supported file extensions:\n  3FR 3G2 jpg\n  PNG\n";
        let exts = ExifTool::parse_extensions(raw);
        assert!(exts.contains("3FR"));
        assert!(exts.contains("JPG"));
        assert!(exts.contains("PNG"));
        assert_eq!(exts.len(), 4);
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let tool = ExifTool::new("/nonexistent/bin/exiftool");
        assert!(matches!(tool.probe(), Err(EngineError::ExtractorUnavailable(_))));
        assert!(matches!(
            tool.extract(Path::new("/tmp/whatever.jpg")),
            Err(ExtractError::Unavailable(_))
        ));
    }
}
