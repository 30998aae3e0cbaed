#![allow(dead_code)]

use medialib::error::Result;
use medialib::{
    CollectionManager, EngineConfig, EngineError, ExtractError, ExtractedMetadata, ExtractorCapabilities,
    MetadataExtractor, TagValue,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Extractor that reads `key=value` lines from the file itself.
///
/// `format=` and `mime=` fill the detected format, every other key becomes a
/// tag. A file containing `CORRUPT` fails, one containing `VANISH` reports the
/// tool as gone mid-build.
#[derive(Default)]
pub struct FakeExtractor {
    calls: AtomicUsize,
    unavailable: bool,
    delay: Option<Duration>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self { unavailable: true, ..Self::default() }
    }

    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MetadataExtractor for FakeExtractor {
    fn name(&self) -> &str {
        "fake"
    }

    fn probe(&self) -> Result<ExtractorCapabilities> {
        if self.unavailable {
            return Err(EngineError::ExtractorUnavailable("fake tool not installed".into()));
        }
        Ok(ExtractorCapabilities { version: "1.0".into(), extensions: None })
    }

    fn extract(&self, path: &Path) -> std::result::Result<ExtractedMetadata, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let body = std::fs::read_to_string(path).map_err(|e| ExtractError::Failed(e.to_string()))?;
        if body.contains("VANISH") {
            return Err(ExtractError::Unavailable("fake tool disappeared".into()));
        }
        if body.contains("CORRUPT") {
            return Err(ExtractError::Failed("file format error".into()));
        }

        let mut meta = ExtractedMetadata::default();
        for line in body.lines() {
            let Some((key, value)) = line.split_once('=') else { continue };
            match key.trim() {
                "format" => meta.format = Some(value.trim().to_string()),
                "mime" => meta.mime = Some(value.trim().to_string()),
                key => {
                    let value = match value.trim().parse::<i64>() {
                        Ok(i) => TagValue::Integer(i),
                        Err(_) => TagValue::from(value.trim()),
                    };
                    meta.tags.insert(key.to_string(), value);
                }
            }
        }
        Ok(meta)
    }
}

pub fn manager(data_dir: &Path, extractor: Arc<FakeExtractor>) -> CollectionManager {
    let mut config = EngineConfig::with_data_dir(data_dir);
    config.max_workers = 2;
    config.write_batch_size = 4;
    config.page_size = 3;
    CollectionManager::with_extractor(config, extractor).unwrap()
}

pub fn jpeg(dir: &Path, name: &str, make: Option<&str>) {
    let mut body = String::from("format=JPEG\nmime=image/jpeg\nFile:FileType=JPEG\nEXIF:ImageWidth=4000\n");
    if let Some(make) = make {
        body.push_str(&format!("EXIF:Make={}\n", make));
    }
    write(dir, name, &body);
}

pub fn write(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}

/// Files in a collection directory still marked as in-progress builds.
pub fn building_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".building"))
        .collect()
}
