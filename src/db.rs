use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::types::{ToSql, Type};
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::SinkError;
use crate::parser::blocks::{BlockKind, ContentBlock};
use crate::parser::properties::ArchiveResult;

/// Destination for finished archive results.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Persist one result and return the new document's ID.
    async fn store(&self, result: &ArchiveResult) -> Result<String, SinkError>;
}

pub fn connect(path: &str) -> Result<Connection, SinkError> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<(), SinkError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            id          INTEGER PRIMARY KEY,
            url         TEXT NOT NULL,
            title       TEXT NOT NULL,
            source_type TEXT NOT NULL,
            notes       TEXT NOT NULL DEFAULT '',
            tags        TEXT NOT NULL DEFAULT '[]',
            archived_at TEXT NOT NULL,
            published   TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_documents_url ON documents(url);

        CREATE TABLE IF NOT EXISTS blocks (
            id          INTEGER PRIMARY KEY,
            document_id INTEGER NOT NULL REFERENCES documents(id),
            position    INTEGER NOT NULL,
            kind        TEXT NOT NULL,
            text        TEXT,
            url         TEXT,
            UNIQUE(document_id, position)
        );
        CREATE INDEX IF NOT EXISTS idx_blocks_document ON blocks(document_id);
        ",
    )?;
    Ok(())
}

/// One document row with its blocks in a single transaction.
pub fn insert_document(conn: &Connection, result: &ArchiveResult) -> Result<i64, SinkError> {
    let props = &result.properties;
    let tags = serde_json::to_string(&props.tags)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO documents (url, title, source_type, notes, tags, archived_at, published)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            props.url,
            props.title,
            props.source.label(),
            props.notes,
            tags,
            props.datetime,
            props.published,
        ],
    )?;
    let doc_id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO blocks (document_id, position, kind, text, url)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (position, block) in result.children.iter().enumerate() {
            stmt.execute(rusqlite::params![
                doc_id,
                position as i64,
                block.kind().as_str(),
                block.text_value(),
                block.url_value(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(doc_id)
}

#[derive(Debug)]
pub struct DocumentRow {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub source_type: String,
    pub notes: String,
    pub tags: Vec<String>,
    pub archived_at: String,
    pub published: Option<String>,
    pub block_count: usize,
}

const DOCUMENT_COLUMNS: &str = "d.id, d.url, d.title, d.source_type, d.notes, d.tags, d.archived_at,
        d.published, (SELECT COUNT(*) FROM blocks b WHERE b.document_id = d.id)";

fn document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    let tags: String = row.get(5)?;
    let tags = serde_json::from_str(&tags)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    Ok(DocumentRow {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        source_type: row.get(3)?,
        notes: row.get(4)?,
        tags,
        archived_at: row.get(6)?,
        published: row.get(7)?,
        block_count: row.get(8)?,
    })
}

pub fn fetch_recent(conn: &Connection, limit: usize) -> Result<Vec<DocumentRow>, SinkError> {
    query_documents(conn, None, None, &[], limit)
}

/// Documents archived between `from` and `to` (inclusive days) carrying
/// every tag in `tags`, newest first.
pub fn query_documents(
    conn: &Connection,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    tags: &[String],
    limit: usize,
) -> Result<Vec<DocumentRow>, SinkError> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(from) = from {
        conditions.push(format!("date(d.archived_at) >= ?{}", params.len() + 1));
        params.push(Box::new(from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = to {
        conditions.push(format!("date(d.archived_at) <= ?{}", params.len() + 1));
        params.push(Box::new(to.format("%Y-%m-%d").to_string()));
    }
    for tag in tags {
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM json_each(d.tags) WHERE json_each.value = ?{})",
            params.len() + 1
        ));
        params.push(Box::new(tag.clone()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM documents d{} ORDER BY d.id DESC LIMIT {}",
        DOCUMENT_COLUMNS, where_clause, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), document_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_document(conn: &Connection, id: i64) -> Result<Option<DocumentRow>, SinkError> {
    let sql = format!("SELECT {} FROM documents d WHERE d.id = ?1", DOCUMENT_COLUMNS);
    Ok(conn.query_row(&sql, [id], document_row).optional()?)
}

pub fn fetch_blocks(conn: &Connection, document_id: i64) -> Result<Vec<ContentBlock>, SinkError> {
    let mut stmt = conn.prepare(
        "SELECT kind, text, url FROM blocks WHERE document_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map([document_id], |row| {
            let kind: String = row.get(0)?;
            let text: Option<String> = row.get(1)?;
            let url: Option<String> = row.get(2)?;
            let kind = BlockKind::parse(&kind);
            let value = if kind.carries_url() { url } else { text };
            Ok(ContentBlock::new(kind, value.unwrap_or_default()))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub documents: usize,
    pub blocks: usize,
    pub images: usize,
    pub by_source: Vec<(String, usize)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats, SinkError> {
    let documents: usize = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
    let blocks: usize = conn.query_row("SELECT COUNT(*) FROM blocks", [], |r| r.get(0))?;
    let images: usize = conn.query_row(
        "SELECT COUNT(*) FROM blocks WHERE kind = 'image'",
        [],
        |r| r.get(0),
    )?;
    let mut stmt = conn.prepare(
        "SELECT source_type, COUNT(*) FROM documents GROUP BY source_type ORDER BY 2 DESC",
    )?;
    let by_source = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stats {
        documents,
        blocks,
        images,
        by_source,
    })
}

// ── Sink ──

pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    pub fn open(path: &str) -> Result<Self, SinkError> {
        let conn = connect(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, SinkError>,
    ) -> Result<T, SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Poisoned)?;
        f(&*conn)
    }
}

#[async_trait]
impl DocumentSink for SqliteSink {
    async fn store(&self, result: &ArchiveResult) -> Result<String, SinkError> {
        let id = self.with_conn(|conn| insert_document(conn, result))?;
        info!(
            "Stored document {} ({} blocks) for {}",
            id,
            result.children.len(),
            result.properties.url
        );
        Ok(id.to_string())
    }
}
