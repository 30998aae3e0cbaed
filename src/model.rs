//! Core data types shared across the engine.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CollectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenerationId(pub u64);

impl GenerationId {
    pub fn next(self) -> Self {
        GenerationId(self.0 + 1)
    }

    pub(crate) fn file_name(self) -> String {
        format!("gen-{:06}.db", self.0)
    }

    pub(crate) fn building_file_name(self) -> String {
        format!("gen-{:06}.db.building", self.0)
    }

    /// Inverse of `file_name`, used when sweeping a collection directory.
    pub(crate) fn parse_file_name(name: &str) -> Option<Self> {
        name.strip_prefix("gen-")?
            .strip_suffix(".db")?
            .parse()
            .ok()
            .map(GenerationId)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single metadata value as reported by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl TagValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TagValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts a JSON scalar; arrays and objects are kept as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(TagValue::Text(b.to_string())),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(TagValue::Integer(i)),
                None => n.as_f64().map(TagValue::Real),
            },
            serde_json::Value::String(s) => Some(TagValue::Text(s.clone())),
            other => Some(TagValue::Text(other.to_string())),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Integer(i) => write!(f, "{}", i),
            TagValue::Real(r) => write!(f, "{}", r),
            TagValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Text(s.to_string())
    }
}

impl From<i64> for TagValue {
    fn from(i: i64) -> Self {
        TagValue::Integer(i)
    }
}

impl ToSql for TagValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            TagValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            TagValue::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            TagValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for TagValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(TagValue::Integer(i)),
            ValueRef::Real(r) => Ok(TagValue::Real(r)),
            ValueRef::Text(t) | ValueRef::Blob(t) => Ok(TagValue::Text(String::from_utf8_lossy(t).into_owned())),
            ValueRef::Null => Err(rusqlite::types::FromSqlError::InvalidType),
        }
    }
}

/// SHA-256 content digest of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let raw = hex::decode(s).ok()?;
        let bytes: [u8; 32] = raw.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid fingerprint"))
    }
}

/// One indexed file in one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub record_id: i64,
    pub path: String,
    pub name: String,
    pub size: u64,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
    pub mtime_nsec: u32,
    /// Detected format class, e.g. "JPEG"
    pub format: Option<String>,
    pub mime: Option<String>,
    pub fingerprint: Option<Fingerprint>,
    pub tags: BTreeMap<String, TagValue>,
}

impl fmt::Display for MediaRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} bytes, {} tags)",
            self.path,
            self.format.as_deref().unwrap_or("unknown"),
            self.size,
            self.tags.len()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    NeverScanned,
    /// Scanned with no per-file warnings
    Ok,
    /// Scanned, but some files produced warnings
    Partial,
    /// The root did not exist at scan time
    Missing,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::NeverScanned => "never_scanned",
            ScanStatus::Ok => "ok",
            ScanStatus::Partial => "partial",
            ScanStatus::Missing => "missing",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ok" => ScanStatus::Ok,
            "partial" => ScanStatus::Partial,
            "missing" => ScanStatus::Missing,
            _ => ScanStatus::NeverScanned,
        }
    }
}

/// A filesystem location registered against a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootPath {
    pub path: String,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub last_scan_status: ScanStatus,
    pub file_count: u64,
}

impl RootPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            last_scan_at: None,
            last_scan_status: ScanStatus::NeverScanned,
            file_count: 0,
        }
    }
}

/// Descriptive state of a collection (everything but its records).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub id: CollectionId,
    pub name: String,
    pub roots: Vec<RootPath>,
    pub private: bool,
    pub current_generation: GenerationId,
    pub created_at: DateTime<Utc>,
    pub last_reindex_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_file_names() {
        let gen = GenerationId(42);
        assert_eq!(gen.file_name(), "gen-000042.db");
        assert_eq!(GenerationId::parse_file_name("gen-000042.db"), Some(gen));
        assert_eq!(GenerationId::parse_file_name("gen-000042.db.building"), None);
        assert_eq!(GenerationId::parse_file_name("catalog.db"), None);
    }

    #[test]
    fn test_tag_value_from_json() {
        assert_eq!(TagValue::from_json(&serde_json::json!(12)), Some(TagValue::Integer(12)));
        assert_eq!(TagValue::from_json(&serde_json::json!(1.5)), Some(TagValue::Real(1.5)));
        assert_eq!(TagValue::from_json(&serde_json::json!("x")), Some(TagValue::Text("x".into())));
        assert_eq!(TagValue::from_json(&serde_json::json!(null)), None);
        assert_eq!(
            TagValue::from_json(&serde_json::json!(["a", "b"])),
            Some(TagValue::Text(r#"["a","b"]"#.into()))
        );
    }

    #[test]
    fn test_fingerprint_hex() {
        let fp = Fingerprint::from_bytes([0xab; 32]);
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()), Some(fp));
        assert_eq!(Fingerprint::from_hex("abcd"), None);
    }
}
