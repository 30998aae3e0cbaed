//! Index builder: scans a collection's roots into a new generation.
//!
//! Three stages connected by bounded channels:
//! - enumerator (blocking): walks the roots and stats every candidate
//! - dispatcher (async): dedups paths, reuses unchanged records from the
//!   previous generation, fans the rest out to extraction workers
//! - writer (blocking): sole owner of the build connection, writes batches
//!
//! Per-file problems become warnings on the outcome. Only fatal conditions
//! (store write failure, extractor gone, cancellation) fail the build, and
//! then the token is dropped and the build file discarded.

use crate::config::EngineConfig;
use crate::core::IgnoreRules;
use crate::error::{EngineError, Result};
use crate::extract::{ExtractError, FingerprintService, MetadataExtractor};
use crate::logging::LogPolicy;
use crate::model::{GenerationId, MediaRecord, ScanStatus, TagValue};
use crate::storage::store::BuildColumns;
use crate::storage::{BuildToken, GenerationRef};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WarningKind {
    /// The walk could not read a directory entry or stat a file
    Enumeration,
    /// A root path did not exist
    RootMissing,
    /// The file produced no usable metadata and was left out
    ExtractionFailed,
    /// The file was indexed, but the tool reported problems
    PartialExtraction,
    /// The file was indexed without a fingerprint
    Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildWarning {
    pub path: String,
    pub kind: WarningKind,
    pub message: String,
}

impl BuildWarning {
    fn new(path: &Path, kind: WarningKind, message: impl Into<String>) -> Self {
        Self { path: path.to_string_lossy().into_owned(), kind, message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootSummary {
    pub root: String,
    pub status: ScanStatus,
    pub file_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    pub generation: GenerationId,
    pub record_count: u64,
    /// Records copied unchanged from the previous generation
    pub reused_count: u64,
    pub extracted_count: u64,
    pub warnings: Vec<BuildWarning>,
    pub roots: Vec<RootSummary>,
    pub duration_ms: u64,
}

struct Candidate {
    root: usize,
    path: PathBuf,
    size: u64,
    mtime: i64,
    mtime_nsec: u32,
}

enum Found {
    File(Candidate),
    Warning(usize, BuildWarning),
}

enum Staged {
    Fresh { root: usize, record: Box<MediaRecord>, warnings: Vec<BuildWarning> },
    Reused { root: usize, path: String },
    Warning(usize, BuildWarning),
    Fatal(EngineError),
}

type FileStamp = (u64, i64, u32);

pub struct IndexBuilder {
    extractor: Arc<dyn MetadataExtractor>,
    fingerprints: Arc<FingerprintService>,
    max_workers: usize,
    write_batch_size: usize,
    excluded: Vec<PathBuf>,
}

impl IndexBuilder {
    pub fn new(extractor: Arc<dyn MetadataExtractor>, fingerprints: Arc<FingerprintService>, config: &EngineConfig) -> Self {
        Self {
            extractor,
            fingerprints,
            max_workers: config.max_workers.max(1),
            write_batch_size: config.write_batch_size.max(1),
            excluded: vec![config.data_dir.clone()],
        }
    }

    /// Scan `roots` into the generation behind `token`.
    ///
    /// On success the token is handed back ready for commit. On failure it has
    /// already been dropped, which discards the build.
    pub async fn build(
        &self,
        roots: &[String],
        token: BuildToken,
        previous: Option<GenerationRef>,
        policy: LogPolicy,
    ) -> Result<(BuildToken, BuildOutcome)> {
        let started = Instant::now();
        let generation = token.generation();
        let cancel = token.cancellation();

        let extractor = Arc::clone(&self.extractor);
        let capabilities = tokio::task::spawn_blocking(move || extractor.probe()).await.map_err(join_error)??;
        tracing::info!(
            "[Builder] Generation {}: scanning {} root(s) with {} {} ({} workers)",
            generation,
            roots.len(),
            self.extractor.name(),
            capabilities.version,
            self.max_workers
        );

        let previous_index = match &previous {
            Some(prev) => {
                let prev = prev.clone();
                tokio::task::spawn_blocking(move || load_stamps(&prev)).await.map_err(join_error)??
            }
            None => HashMap::new(),
        };

        // Stage 1: enumerate
        let (found_tx, mut found_rx) = mpsc::channel::<Found>(CHANNEL_CAPACITY);
        let mut ignore = IgnoreRules::new();
        for dir in &self.excluded {
            ignore.exclude_dir(dir.clone());
        }
        let root_paths: Vec<PathBuf> = roots.iter().map(PathBuf::from).collect();
        for root in &root_paths {
            ignore.load_rules_for_root(root);
        }
        let enum_cancel = cancel.clone();
        let enumerator = tokio::task::spawn_blocking(move || {
            enumerate(&root_paths, &ignore, &capabilities, &enum_cancel, &found_tx)
        });

        // Stage 3: write
        let (staged_tx, staged_rx) = mpsc::channel::<Staged>(CHANNEL_CAPACITY);
        let writer = {
            let runtime = Handle::current();
            let cancel = cancel.clone();
            let batch = self.write_batch_size;
            let root_count = roots.len();
            tokio::task::spawn_blocking(move || {
                write_generation(&runtime, token, staged_rx, previous, batch, root_count, &cancel, policy)
            })
        };

        // Stage 2: dispatch
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut workers = JoinSet::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        loop {
            let found = tokio::select! {
                _ = cancel.cancelled() => break,
                found = found_rx.recv() => found,
            };
            let Some(found) = found else { break };
            if staged_tx.is_closed() {
                break;
            }

            let staged = match found {
                Found::Warning(root, warning) => Staged::Warning(root, warning),
                Found::File(candidate) => {
                    if !seen.insert(candidate.path.clone()) {
                        continue;
                    }
                    let path = candidate.path.to_string_lossy().into_owned();
                    let stamp = (candidate.size, candidate.mtime, candidate.mtime_nsec);
                    if previous_index.get(&path) == Some(&stamp) {
                        Staged::Reused { root: candidate.root, path }
                    } else {
                        let permit = tokio::select! {
                            _ = cancel.cancelled() => break,
                            permit = Arc::clone(&semaphore).acquire_owned() => {
                                permit.map_err(|_| EngineError::State("worker pool closed".into()))?
                            }
                        };
                        let tx = staged_tx.clone();
                        let extractor = Arc::clone(&self.extractor);
                        let fingerprints = Arc::clone(&self.fingerprints);
                        workers.spawn_blocking(move || {
                            let staged = process_file(candidate, extractor.as_ref(), &fingerprints, policy);
                            // The writer has stopped if this fails; the result is discarded
                            let _ = tx.blocking_send(staged);
                            drop(permit);
                        });
                        continue;
                    }
                }
            };
            if staged_tx.send(staged).await.is_err() {
                // Writer stopped early; its result carries the reason
                break;
            }
        }

        drop(found_rx);
        drop(staged_tx);
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // In-flight extractions are abandoned, not awaited
                    workers.detach_all();
                    break;
                }
                joined = workers.join_next() => joined,
            };
            match joined {
                Some(Err(e)) => tracing::error!("[Builder] Extraction worker panicked: {}", e),
                Some(Ok(())) => {}
                None => break,
            }
        }

        if let Err(e) = enumerator.await {
            tracing::error!("[Builder] Enumerator panicked: {}", e);
        }
        let (token, stats) = writer.await.map_err(join_error)??;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let roots_summary = roots
            .iter()
            .enumerate()
            .map(|(i, root)| RootSummary {
                root: root.clone(),
                status: if stats.root_missing[i] {
                    ScanStatus::Missing
                } else if stats.root_warned[i] {
                    ScanStatus::Partial
                } else {
                    ScanStatus::Ok
                },
                file_count: stats.root_counts[i],
            })
            .collect();

        let mut token = token;
        token.set_warning_count(stats.warnings.len() as u64);
        let outcome = BuildOutcome {
            generation,
            record_count: token.records_written(),
            reused_count: stats.reused,
            extracted_count: stats.extracted,
            warnings: stats.warnings,
            roots: roots_summary,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            "[Builder] Generation {} built: {} records ({} reused, {} extracted), {} warnings in {}ms",
            generation,
            outcome.record_count,
            outcome.reused_count,
            outcome.extracted_count,
            outcome.warnings.len(),
            outcome.duration_ms
        );
        Ok((token, outcome))
    }
}

fn join_error(e: tokio::task::JoinError) -> EngineError {
    EngineError::Other(anyhow::anyhow!("build task failed: {}", e))
}

/// (size, mtime, mtime_nsec) for every path in a generation.
fn load_stamps(generation: &GenerationRef) -> Result<HashMap<String, FileStamp>> {
    let conn = generation.reader()?;
    let mut stmt = conn.prepare("SELECT path, size, mtime, mtime_nsec FROM media")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, (row.get(1)?, row.get(2)?, row.get(3)?))))?;
    let mut index = HashMap::new();
    for r in rows {
        let (path, stamp): (String, FileStamp) = r?;
        index.insert(path, stamp);
    }
    Ok(index)
}

fn enumerate(
    roots: &[PathBuf],
    ignore: &IgnoreRules,
    capabilities: &crate::extract::ExtractorCapabilities,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<Found>,
) {
    for (idx, root) in roots.iter().enumerate() {
        if !root.exists() {
            let warning = BuildWarning::new(root, WarningKind::RootMissing, "root path does not exist");
            if tx.blocking_send(Found::Warning(idx, warning)).is_err() {
                return;
            }
            continue;
        }

        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !ignore.is_ignored(root, e.path()));

        for entry in walker {
            if cancel.is_cancelled() {
                return;
            }
            let found = match entry {
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    Found::Warning(idx, BuildWarning::new(&path, WarningKind::Enumeration, e.to_string()))
                }
                Ok(entry) => {
                    if !entry.file_type().is_file() || !capabilities.supports(entry.path()) {
                        continue;
                    }
                    match stat(entry.path()) {
                        Ok((size, mtime, mtime_nsec)) => Found::File(Candidate {
                            root: idx,
                            path: entry.into_path(),
                            size,
                            mtime,
                            mtime_nsec,
                        }),
                        Err(e) => Found::Warning(idx, BuildWarning::new(entry.path(), WarningKind::Enumeration, e.to_string())),
                    }
                }
            };
            if tx.blocking_send(found).is_err() {
                return;
            }
        }
    }
}

fn stat(path: &Path) -> std::io::Result<FileStamp> {
    let meta = std::fs::metadata(path)?;
    let (mtime, mtime_nsec) = match meta.modified()?.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
        // Before the epoch; clamp rather than fail
        Err(_) => (0, 0),
    };
    Ok((meta.len(), mtime, mtime_nsec))
}

fn process_file(
    candidate: Candidate,
    extractor: &dyn MetadataExtractor,
    fingerprints: &FingerprintService,
    policy: LogPolicy,
) -> Staged {
    let Candidate { root, path, size, mtime, mtime_nsec } = candidate;

    let meta = match extractor.extract(&path) {
        Ok(meta) => meta,
        Err(ExtractError::Unavailable(msg)) => return Staged::Fatal(EngineError::ExtractorUnavailable(msg)),
        Err(e) => {
            return Staged::Warning(root, BuildWarning::new(&path, WarningKind::ExtractionFailed, e.to_string()));
        }
    };

    if !meta.has_usable_tags() {
        let message = if meta.problems.is_empty() {
            "no usable metadata".to_string()
        } else {
            meta.problems.join("; ")
        };
        return Staged::Warning(root, BuildWarning::new(&path, WarningKind::ExtractionFailed, message));
    }

    let (fingerprint, fingerprint_error) = match fingerprints.fingerprint(&path, size, mtime, mtime_nsec) {
        Ok(fp) => (Some(fp), None),
        Err(e) => (None, Some(e.to_string())),
    };

    let mut warnings = Vec::new();
    if !meta.problems.is_empty() {
        warnings.push(BuildWarning::new(&path, WarningKind::PartialExtraction, meta.problems.join("; ")));
    }
    if let Some(e) = fingerprint_error {
        warnings.push(BuildWarning::new(&path, WarningKind::Fingerprint, e));
    }

    if policy.per_file() {
        tracing::debug!("[Builder] Extracted {} ({} tags)", path.display(), meta.tags.len());
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let record = MediaRecord {
        record_id: 0,
        path: path.to_string_lossy().into_owned(),
        name,
        size,
        mtime,
        mtime_nsec,
        format: meta.format,
        mime: meta.mime,
        fingerprint,
        tags: meta.tags,
    };
    Staged::Fresh { root, record: Box::new(record), warnings }
}

struct WriterStats {
    reused: u64,
    extracted: u64,
    warnings: Vec<BuildWarning>,
    root_counts: Vec<u64>,
    root_warned: Vec<bool>,
    root_missing: Vec<bool>,
}

impl WriterStats {
    fn new(roots: usize) -> Self {
        Self {
            reused: 0,
            extracted: 0,
            warnings: Vec::new(),
            root_counts: vec![0; roots],
            root_warned: vec![false; roots],
            root_missing: vec![false; roots],
        }
    }

    fn warn(&mut self, root: usize, warning: BuildWarning, policy: LogPolicy) {
        tracing::warn!(
            "[Builder] {:?} {}: {}",
            warning.kind,
            policy.path(Path::new(&warning.path)),
            policy.text(&warning.message)
        );
        if warning.kind == WarningKind::RootMissing {
            self.root_missing[root] = true;
        } else {
            self.root_warned[root] = true;
        }
        self.warnings.push(warning);
    }
}

/// Next staged item, `None` once every sender is gone. Cancellation wins over
/// pending items; in-flight extractions are not waited for.
fn next_staged(runtime: &Handle, rx: &mut mpsc::Receiver<Staged>, cancel: &CancellationToken) -> Result<Option<Staged>> {
    runtime.block_on(async {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            staged = rx.recv() => Ok(staged),
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn write_generation(
    runtime: &Handle,
    mut token: BuildToken,
    mut rx: mpsc::Receiver<Staged>,
    previous: Option<GenerationRef>,
    batch_size: usize,
    root_count: usize,
    cancel: &CancellationToken,
    policy: LogPolicy,
) -> Result<(BuildToken, WriterStats)> {
    let mut stats = WriterStats::new(root_count);

    let copy_sql = match &previous {
        Some(prev) => {
            let (conn, columns) = token.writer()?;
            conn.execute("ATTACH DATABASE ?1 AS prev", [prev.path().to_string_lossy().into_owned()])?;
            Some(copy_statement(conn, columns, prev)?)
        }
        None => None,
    };

    let mut done = false;
    while !done {
        let mut written = 0u64;
        {
            let (conn, columns) = token.writer()?;
            let tx = conn.transaction()?;
            for _ in 0..batch_size {
                let Some(staged) = next_staged(runtime, &mut rx, cancel)? else {
                    done = true;
                    break;
                };
                match staged {
                    Staged::Reused { root, path } => {
                        let sql = copy_sql.as_deref()
                            .ok_or_else(|| EngineError::State("reuse without a previous generation".into()))?;
                        let n = tx.prepare_cached(sql)?.execute([&path])?;
                        if n > 0 {
                            written += 1;
                            stats.reused += 1;
                            stats.root_counts[root] += 1;
                            if policy.per_file() {
                                tracing::debug!("[Builder] Reused {}", path);
                            }
                        }
                    }
                    Staged::Fresh { root, record, warnings } => {
                        insert_record(&tx, columns, &record)?;
                        written += 1;
                        stats.extracted += 1;
                        stats.root_counts[root] += 1;
                        for w in warnings {
                            stats.warn(root, w, policy);
                        }
                    }
                    Staged::Warning(root, w) => stats.warn(root, w, policy),
                    Staged::Fatal(e) => {
                        tracing::error!("[Builder] Fatal: {}", e);
                        return Err(e);
                    }
                }
            }
            tx.commit()?;
        }
        token.note_written(written);
    }

    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    if previous.is_some() {
        let (conn, _) = token.writer()?;
        conn.execute("DETACH DATABASE prev", [])?;
    }
    Ok((token, stats))
}

/// INSERT ... SELECT copying one path verbatim from the attached previous generation.
fn copy_statement(conn: &Connection, columns: &mut BuildColumns, previous: &GenerationRef) -> Result<String> {
    let mut target = vec![
        "path", "name", "size", "mtime", "mtime_nsec", "format", "mime", "fingerprint", "search_text",
    ]
    .into_iter()
    .map(String::from)
    .collect::<Vec<_>>();
    let mut source = target.clone();

    for column in previous.columns() {
        let built = columns.ensure(conn, &column.tag_key)?;
        target.push(format!("\"{}\"", built));
        source.push(format!("\"{}\"", column.column));
    }

    Ok(format!(
        "INSERT INTO main.media ({}) SELECT {} FROM prev.media WHERE path = ?1",
        target.join(", "),
        source.join(", ")
    ))
}

fn insert_record(conn: &Connection, columns: &mut BuildColumns, record: &MediaRecord) -> Result<()> {
    let mut names: Vec<String> = ["path", "name", "size", "mtime", "mtime_nsec", "format", "mime", "fingerprint", "search_text"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut values = vec![
        Value::Text(record.path.clone()),
        Value::Text(record.name.clone()),
        Value::Integer(i64::try_from(record.size).unwrap_or(i64::MAX)),
        Value::Integer(record.mtime),
        Value::Integer(i64::from(record.mtime_nsec)),
        record.format.clone().map(Value::Text).unwrap_or(Value::Null),
        record.mime.clone().map(Value::Text).unwrap_or(Value::Null),
        record.fingerprint.map(|fp| Value::Text(fp.to_hex())).unwrap_or(Value::Null),
        Value::Text(search_text(record)),
    ];

    for (key, value) in &record.tags {
        let column = columns.ensure(conn, key)?;
        names.push(format!("\"{}\"", column));
        values.push(match value {
            TagValue::Integer(i) => Value::Integer(*i),
            TagValue::Real(r) => Value::Real(*r),
            TagValue::Text(s) => Value::Text(s.clone()),
        });
    }

    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!("INSERT INTO media ({}) VALUES ({})", names.join(", "), placeholders.join(", "));
    conn.prepare_cached(&sql)?.execute(params_from_iter(values))?;
    Ok(())
}

/// Lower-cased tag values, space separated.
fn search_text(record: &MediaRecord) -> String {
    record
        .tags
        .values()
        .map(|v| v.to_string().to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractedMetadata, ExtractorCapabilities};

    struct Fixed;

    impl MetadataExtractor for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn probe(&self) -> Result<ExtractorCapabilities> {
            Ok(ExtractorCapabilities::default())
        }

        fn extract(&self, path: &Path) -> std::result::Result<ExtractedMetadata, ExtractError> {
            if path.file_name().map_or(false, |n| n.to_string_lossy().starts_with("ghost")) {
                // Extracts fine, but the file is gone before it can be fingerprinted
                let mut meta = ExtractedMetadata::default();
                meta.tags.insert("EXIF:Make".into(), "Canon".into());
                meta.problems.push("minor maker-note error".into());
                return Ok(meta);
            }
            let body = std::fs::read_to_string(path).map_err(|e| ExtractError::Failed(e.to_string()))?;
            let mut meta = ExtractedMetadata::default();
            match body.trim() {
                "gone" => return Err(ExtractError::Unavailable("tool vanished".into())),
                "empty" => {}
                "warn" => {
                    meta.tags.insert("EXIF:Make".into(), "Canon".into());
                    meta.problems.push("truncated maker notes".into());
                }
                other => {
                    meta.format = Some("JPEG".into());
                    meta.tags.insert("EXIF:Make".into(), other.into());
                }
            }
            Ok(meta)
        }
    }

    fn candidate(path: PathBuf) -> Candidate {
        Candidate { root: 0, path, size: 1, mtime: 1, mtime_nsec: 0 }
    }

    #[test]
    fn test_process_file_policies() {
        let dir = tempfile::tempdir().unwrap();
        let fps = FingerprintService::new(8);
        let policy = LogPolicy::default();
        let write = |name: &str, body: &str| {
            let p = dir.path().join(name);
            std::fs::write(&p, body).unwrap();
            p
        };

        match process_file(candidate(write("a.jpg", "Nikon")), &Fixed, &fps, policy) {
            Staged::Fresh { record, warnings, .. } => {
                assert!(warnings.is_empty());
                assert!(record.fingerprint.is_some());
                assert_eq!(record.name, "a.jpg");
            }
            _ => panic!("expected a record"),
        }

        match process_file(candidate(write("b.jpg", "warn")), &Fixed, &fps, policy) {
            Staged::Fresh { warnings, .. } => {
                let kinds: Vec<_> = warnings.iter().map(|w| w.kind).collect();
                assert_eq!(kinds, vec![WarningKind::PartialExtraction]);
            }
            _ => panic!("expected a record with a warning"),
        }

        match process_file(candidate(dir.path().join("ghost.jpg")), &Fixed, &fps, policy) {
            Staged::Fresh { record, warnings, .. } => {
                assert!(record.fingerprint.is_none());
                let kinds: Vec<_> = warnings.iter().map(|w| w.kind).collect();
                assert_eq!(kinds, vec![WarningKind::PartialExtraction, WarningKind::Fingerprint]);
            }
            _ => panic!("expected a record with both warnings"),
        }

        match process_file(candidate(write("c.jpg", "empty")), &Fixed, &fps, policy) {
            Staged::Warning(_, w) => assert_eq!(w.kind, WarningKind::ExtractionFailed),
            _ => panic!("expected an omission"),
        }

        assert!(matches!(
            process_file(candidate(write("d.jpg", "gone")), &Fixed, &fps, policy),
            Staged::Fatal(EngineError::ExtractorUnavailable(_))
        ));
    }

    #[test]
    fn test_search_text_lowercases_values() {
        let mut record = MediaRecord {
            record_id: 0,
            path: "/a.jpg".into(),
            name: "a.jpg".into(),
            size: 0,
            mtime: 0,
            mtime_nsec: 0,
            format: None,
            mime: None,
            fingerprint: None,
            tags: Default::default(),
        };
        record.tags.insert("EXIF:Make".into(), "Canon".into());
        record.tags.insert("EXIF:ISO".into(), TagValue::Integer(400));
        assert_eq!(search_text(&record), "400 canon");
    }

    #[test]
    fn test_enumerate_reports_missing_root_and_skips_noise() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), "x").unwrap();
        std::fs::write(dir.path().join("Thumbs.db"), "x").unwrap();
        std::fs::create_dir(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join(".hidden/b.jpg"), "x").unwrap();

        let roots = vec![dir.path().to_path_buf(), dir.path().join("missing")];
        let mut ignore = IgnoreRules::new();
        for r in &roots {
            ignore.load_rules_for_root(r);
        }
        let (tx, mut rx) = mpsc::channel(16);
        enumerate(&roots, &ignore, &ExtractorCapabilities::default(), &CancellationToken::new(), &tx);
        drop(tx);

        let mut files = Vec::new();
        let mut warnings = Vec::new();
        while let Some(found) = rx.blocking_recv() {
            match found {
                Found::File(c) => files.push(c.path),
                Found::Warning(root, w) => warnings.push((root, w.kind)),
            }
        }
        assert_eq!(files, vec![dir.path().join("a.jpg")]);
        assert_eq!(warnings, vec![(1, WarningKind::RootMissing)]);
    }
}
