//! Read side: filtered, grouped and free-text queries against one pinned generation.
//!
//! Every result holds a `GenerationRef` for as long as it lives, so a commit
//! that happens mid-iteration never changes what it returns.

use crate::engine::filter::{Field, Filter};
use crate::error::Result;
use crate::model::{Fingerprint, GenerationId, MediaRecord, TagValue};
use crate::storage::{Generation, GenerationRef};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::collections::{BTreeMap, VecDeque};

const RECORD_COLUMNS: &str = "record_id, path, name, size, mtime, mtime_nsec, format, mime, fingerprint";
const FIXED_COLUMN_COUNT: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub field: Field,
    pub descending: bool,
}

/// A query over one collection. Defaults to every record in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Filter,
    pub group_by: Option<Field>,
    pub order_by: Vec<OrderKey>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn group_by(mut self, field: impl Into<Field>) -> Self {
        self.group_by = Some(field.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<Field>) -> Self {
        self.order_by.push(OrderKey { field: field.into(), descending: false });
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<Field>) -> Self {
        self.order_by.push(OrderKey { field: field.into(), descending: true });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    Value(TagValue),
    /// Records where the grouped field is absent
    NoValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupBucket {
    pub key: GroupKey,
    pub count: u64,
}

pub enum QueryOutput {
    Records(ResultSet),
    Groups(Vec<GroupBucket>),
}

impl QueryOutput {
    pub fn into_records(self) -> Option<ResultSet> {
        match self {
            QueryOutput::Records(rs) => Some(rs),
            QueryOutput::Groups(_) => None,
        }
    }

    pub fn into_groups(self) -> Option<Vec<GroupBucket>> {
        match self {
            QueryOutput::Groups(g) => Some(g),
            QueryOutput::Records(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub fingerprint: Fingerprint,
    pub records: Vec<MediaRecord>,
}

#[derive(Debug, Clone)]
pub struct QueryService {
    page_size: usize,
}

impl QueryService {
    pub fn new(page_size: usize) -> Self {
        Self { page_size: page_size.max(1) }
    }

    pub fn query(&self, generation: GenerationRef, query: &Query) -> Result<QueryOutput> {
        let mut params = Vec::new();
        let where_sql = query.filter.to_sql(&generation, &mut params);

        if let Some(field) = &query.group_by {
            return Ok(QueryOutput::Groups(group(&generation, field, &where_sql, &params)?));
        }

        let mut order: Vec<String> = query.order_by.iter()
            .map(|key| format!("{} {}", key.field.sql(&generation), if key.descending { "DESC" } else { "ASC" }))
            .collect();
        order.push("record_id ASC".into());

        Ok(QueryOutput::Records(ResultSet::new(generation, where_sql, params, order.join(", "), self.page_size)?))
    }

    /// Records whose tag values contain every whitespace-separated term.
    pub fn search(&self, generation: GenerationRef, free_text: &str) -> Result<ResultSet> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for term in free_text.split_whitespace() {
            params.push(Value::Text(format!("%{}%", escape_like(&term.to_lowercase()))));
            clauses.push(format!("search_text LIKE ?{} ESCAPE '\\'", params.len()));
        }
        let where_sql = if clauses.is_empty() { "1".to_string() } else { clauses.join(" AND ") };
        ResultSet::new(generation, where_sql, params, "record_id ASC".into(), self.page_size)
    }

    pub fn get(&self, generation: &Generation, path: &str) -> Result<Option<MediaRecord>> {
        let conn = generation.reader()?;
        let sql = format!("SELECT {} FROM media WHERE path = ?1", select_list(generation));
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([path])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_record(row, generation)?)),
            None => Ok(None),
        }
    }

    /// Groups of two or more records sharing a fingerprint.
    pub fn duplicates(&self, generation: &Generation) -> Result<Vec<DuplicateGroup>> {
        let conn = generation.reader()?;
        let sql = format!(
            "SELECT {} FROM media WHERE fingerprint IN (
                 SELECT fingerprint FROM media WHERE fingerprint IS NOT NULL
                 GROUP BY fingerprint HAVING COUNT(*) > 1
             ) ORDER BY fingerprint, record_id",
            select_list(generation)
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        while let Some(row) = rows.next()? {
            let record = read_record(row, generation)?;
            let Some(fingerprint) = record.fingerprint else { continue };
            match groups.last_mut() {
                Some(last) if last.fingerprint == fingerprint => last.records.push(record),
                _ => groups.push(DuplicateGroup { fingerprint, records: vec![record] }),
            }
        }
        Ok(groups)
    }
}

/// Lazy, restartable sequence of records from one pinned generation.
///
/// Rows are fetched `page_size` at a time. The generation is immutable, so
/// offsets stay valid for the life of the set.
pub struct ResultSet {
    generation: GenerationRef,
    conn: Connection,
    where_sql: String,
    params: Vec<Value>,
    order_sql: String,
    page_size: usize,
    offset: u64,
    buffer: VecDeque<MediaRecord>,
    exhausted: bool,
}

impl ResultSet {
    fn new(generation: GenerationRef, where_sql: String, params: Vec<Value>, order_sql: String, page_size: usize) -> Result<Self> {
        let conn = generation.reader()?;
        Ok(Self {
            generation,
            conn,
            where_sql,
            params,
            order_sql,
            page_size,
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    pub fn generation(&self) -> GenerationId {
        self.generation.id()
    }

    /// Number of matching records, without materialising them.
    pub fn total(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM media WHERE {}", self.where_sql);
        let n = self.conn.query_row(&sql, params_from_iter(self.params.iter()), |r| r.get(0))?;
        Ok(n)
    }

    /// Random access to `limit` records starting at `offset`.
    pub fn page(&self, offset: u64, limit: usize) -> Result<Vec<MediaRecord>> {
        let sql = format!(
            "SELECT {} FROM media WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
            select_list(&self.generation),
            self.where_sql,
            self.order_sql,
            limit,
            offset
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(self.params.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(read_record(row, &self.generation)?);
        }
        Ok(records)
    }

    /// Rewind to the first record.
    pub fn restart(&mut self) {
        self.offset = 0;
        self.buffer.clear();
        self.exhausted = false;
    }

    pub fn collect_all(self) -> Result<Vec<MediaRecord>> {
        self.collect()
    }

    /// Unpin the generation.
    pub fn release(self) {}
}

impl Iterator for ResultSet {
    type Item = Result<MediaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.page(self.offset, self.page_size) {
                Ok(records) => {
                    if records.len() < self.page_size {
                        self.exhausted = true;
                    }
                    self.offset += records.len() as u64;
                    self.buffer.extend(records);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn group(generation: &Generation, field: &Field, where_sql: &str, params: &[Value]) -> Result<Vec<GroupBucket>> {
    let conn = generation.reader()?;
    let sql = format!(
        "SELECT {expr} AS k, COUNT(*) FROM media WHERE {where_sql} GROUP BY k ORDER BY (k IS NULL), k",
        expr = field.sql(generation),
        where_sql = where_sql,
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        let key: Option<TagValue> = row.get(0)?;
        Ok(GroupBucket {
            key: key.map(GroupKey::Value).unwrap_or(GroupKey::NoValue),
            count: row.get(1)?,
        })
    })?;
    let mut buckets = Vec::new();
    for b in rows { buckets.push(b?); }
    Ok(buckets)
}

fn select_list(generation: &Generation) -> String {
    let mut list = RECORD_COLUMNS.to_string();
    for column in generation.columns() {
        list.push_str(&format!(", \"{}\"", column.column));
    }
    list
}

fn read_record(row: &Row, generation: &Generation) -> rusqlite::Result<MediaRecord> {
    let fingerprint: Option<String> = row.get(8)?;
    let mut tags = BTreeMap::new();
    for (i, column) in generation.columns().iter().enumerate() {
        if let Some(value) = row.get::<_, Option<TagValue>>(FIXED_COLUMN_COUNT + i)? {
            tags.insert(column.tag_key.clone(), value);
        }
    }
    Ok(MediaRecord {
        record_id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        size: row.get(3)?,
        mtime: row.get(4)?,
        mtime_nsec: row.get(5)?,
        format: row.get(6)?,
        mime: row.get(7)?,
        fingerprint: fingerprint.as_deref().and_then(Fingerprint::from_hex),
        tags,
    })
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::open_build;
    use crate::storage::schema::{create_generation_tables, TagColumn};
    use std::path::Path;
    use std::sync::Arc;

    /// A generation with five records: three JPEGs (two identical), a PNG and an untagged file.
    fn fixture(dir: &Path) -> GenerationRef {
        let id = GenerationId(1);
        let path = dir.join(id.file_name());
        let columns = vec![TagColumn { tag_key: "EXIF:Make".into(), column: "tag_1".into() }];
        {
            let conn = open_build(&path).unwrap();
            create_generation_tables(&conn, id, &columns).unwrap();
            let rows: &[(&str, i64, Option<&str>, Option<&str>, Option<&str>, &str)] = &[
                ("/p/a.jpg", 10, Some("JPEG"), Some("aa"), Some("Canon"), "canon jpeg"),
                ("/p/b.jpg", 20, Some("JPEG"), Some("aa"), Some("Canon"), "canon jpeg"),
                ("/p/c.png", 30, Some("PNG"), Some("cc"), None, "png"),
                ("/p/d.jpg", 40, Some("JPEG"), Some("dd"), Some("Nikon"), "nikon jpeg 50%"),
                ("/p/e.bin", 50, None, None, None, ""),
            ];
            for (p, size, format, fp, make, search) in rows {
                let fp = fp.map(|f| f.repeat(32));
                conn.execute(
                    "INSERT INTO media (path, name, size, mtime, format, fingerprint, tag_1, search_text)
                     VALUES (?1, ?1, ?2, 0, ?3, ?4, ?5, ?6)",
                    rusqlite::params![p, size, format, fp, make, search],
                ).unwrap();
            }
        }
        GenerationRef::new(Arc::new(Generation::load(dir, id).unwrap()))
    }

    fn paths(rs: ResultSet) -> Vec<String> {
        rs.collect_all().unwrap().into_iter().map(|r| r.path).collect()
    }

    #[test]
    fn test_filter_and_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let gen = fixture(dir.path());
        let service = QueryService::new(2);

        let q = Query::new().filter(Filter::eq("format", "JPEG"));
        let rs = service.query(gen.clone(), &q).unwrap().into_records().unwrap();
        assert_eq!(rs.total().unwrap(), 3);
        assert_eq!(paths(rs), vec!["/p/a.jpg", "/p/b.jpg", "/p/d.jpg"]);
    }

    #[test]
    fn test_order_by_desc() {
        let dir = tempfile::tempdir().unwrap();
        let gen = fixture(dir.path());
        let q = Query::new().order_by_desc("size");
        let rs = QueryService::new(10).query(gen, &q).unwrap().into_records().unwrap();
        assert_eq!(paths(rs)[0], "/p/e.bin");
    }

    #[test]
    fn test_paging_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        let gen = fixture(dir.path());
        let mut rs = QueryService::new(2).query(gen, &Query::new()).unwrap().into_records().unwrap();

        let page = rs.page(3, 10).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].path, "/p/d.jpg");

        assert_eq!(rs.by_ref().take(3).count(), 3);
        rs.restart();
        assert_eq!(rs.map(|r| r.unwrap()).count(), 5);
    }

    #[test]
    fn test_group_by_tag_with_no_value_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let gen = fixture(dir.path());
        let q = Query::new().group_by("EXIF:Make");
        let groups = QueryService::new(10).query(gen, &q).unwrap().into_groups().unwrap();
        assert_eq!(
            groups,
            vec![
                GroupBucket { key: GroupKey::Value("Canon".into()), count: 2 },
                GroupBucket { key: GroupKey::Value("Nikon".into()), count: 1 },
                GroupBucket { key: GroupKey::NoValue, count: 2 },
            ]
        );
    }

    #[test]
    fn test_group_by_unknown_tag() {
        let dir = tempfile::tempdir().unwrap();
        let gen = fixture(dir.path());
        let q = Query::new().group_by("XMP:Rating");
        let groups = QueryService::new(10).query(gen, &q).unwrap().into_groups().unwrap();
        assert_eq!(groups, vec![GroupBucket { key: GroupKey::NoValue, count: 5 }]);
    }

    #[test]
    fn test_search_terms_and_escaping() {
        let dir = tempfile::tempdir().unwrap();
        let gen = fixture(dir.path());
        let service = QueryService::new(10);
        assert_eq!(paths(service.search(gen.clone(), "CANON").unwrap()), vec!["/p/a.jpg", "/p/b.jpg"]);
        assert_eq!(paths(service.search(gen.clone(), "jpeg nikon").unwrap()), vec!["/p/d.jpg"]);
        assert_eq!(paths(service.search(gen.clone(), "50%").unwrap()), vec!["/p/d.jpg"]);
        assert_eq!(service.search(gen, "").unwrap().total().unwrap(), 5);
    }

    #[test]
    fn test_get_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let gen = fixture(dir.path());
        let service = QueryService::new(10);

        let rec = service.get(&gen, "/p/a.jpg").unwrap().unwrap();
        assert_eq!(rec.tags.get("EXIF:Make"), Some(&TagValue::from("Canon")));
        assert!(service.get(&gen, "/p/zzz.jpg").unwrap().is_none());

        let dups = service.duplicates(&gen).unwrap();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].records.len(), 2);
        assert_eq!(dups[0].fingerprint.to_hex(), "aa".repeat(32));
    }
}
