//! The full-text chunk index: a sqlite file holding `files`, `chunks`, and
//! an FTS5 virtual table kept in lock-step through triggers.
//!
//! Re-indexing is an atomic per-path set replacement, and an unchanged
//! path (same mtime, size, and content hash) is a no-op. Chunk ids are
//! deterministic: `{basename}:{start}-{end}`.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::chunk::chunk_lines;
use crate::hash::hash;

const FILE_CHUNK_SIZE: usize = 50;
const FILE_CHUNK_OVERLAP: usize = 10;
const SESSION_CHUNK_SIZE: usize = 30;
const SESSION_CHUNK_OVERLAP: usize = 5;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    hash TEXT NOT NULL,
    mtime INTEGER NOT NULL,
    size INTEGER NOT NULL,
    indexed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    source TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    hash TEXT NOT NULL,
    text TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    text,
    content='chunks', content_rowid='rowid',
    tokenize='porter unicode61'
);

-- Keep FTS5 in sync via triggers
CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
    INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
END;
";

/// One full-text search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub path: String,
    pub source: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub score: f64,
}

/// The chunk database. Single-writer by convention: all mutation goes
/// through the one owner the server constructs at startup.
pub struct ChunkIndex {
    conn: Connection,
}

impl ChunkIndex {
    /// Open or create the database file with the full schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create index directory: {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open chunk index: {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory index")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             -- REPLACE on a colliding chunk id must fire the FTS delete trigger
             PRAGMA recursive_triggers = ON;",
        )
        .context("failed to apply index pragmas")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize index schema")?;
        Ok(Self { conn })
    }

    /// Index one file, re-chunking only when its `(mtime, size, hash)`
    /// changed. Returns the number of chunks written (0 for a no-op).
    pub fn index_file(&mut self, path: &Path, source: &str) -> Result<usize> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let size = metadata.len() as i64;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let content_hash = hash(&content);

        if self.is_fresh(path, mtime, size, &content_hash)? {
            debug!(path = %path.display(), "index unchanged; skipping");
            return Ok(0);
        }

        let lines: Vec<&str> = content.lines().collect();
        let chunks = chunk_lines(&lines, FILE_CHUNK_SIZE, FILE_CHUNK_OVERLAP);
        self.replace_chunks(path, source, mtime, size, &content_hash, &chunks)
    }

    /// Index an agent transcript: parse the JSONL into `User:`/`Assistant:`
    /// lines, then chunk with the smaller session windows.
    pub fn index_claude_session(&mut self, path: &Path) -> Result<usize> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let size = metadata.len() as i64;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let content_hash = hash(&raw);
        if self.is_fresh(path, mtime, size, &content_hash)? {
            return Ok(0);
        }

        let dialogue = transcript_to_lines(&raw);
        let refs: Vec<&str> = dialogue.iter().map(String::as_str).collect();
        let chunks = chunk_lines(&refs, SESSION_CHUNK_SIZE, SESSION_CHUNK_OVERLAP);
        self.replace_chunks(path, "session", mtime, size, &content_hash, &chunks)
    }

    fn is_fresh(&self, path: &Path, mtime: i64, size: i64, content_hash: &str) -> Result<bool> {
        let stored: Option<(String, i64, i64)> = self
            .conn
            .query_row(
                "SELECT hash, mtime, size FROM files WHERE path = ?1",
                params![path.to_string_lossy()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .context("failed to query files row")?;

        Ok(matches!(
            stored,
            Some((ref h, m, s)) if h == content_hash && m == mtime && s == size
        ))
    }

    /// Atomic per-path set replacement: delete the old chunks, insert the
    /// new ones, upsert the files row, all in one transaction with a
    /// single `updated_at` for the whole run.
    fn replace_chunks(
        &mut self,
        path: &Path,
        source: &str,
        mtime: i64,
        size: i64,
        content_hash: &str,
        chunks: &[crate::chunk::LineChunk],
    ) -> Result<usize> {
        let path_str = path.to_string_lossy().into_owned();
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path_str.clone());
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction().context("failed to begin index transaction")?;
        tx.execute("DELETE FROM chunks WHERE path = ?1", params![path_str])
            .context("failed to delete stale chunks")?;

        for chunk in chunks {
            let id = format!("{basename}:{}-{}", chunk.start_line, chunk.end_line);
            tx.execute(
                "INSERT OR REPLACE INTO chunks
                     (id, path, source, start_line, end_line, hash, text, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    path_str,
                    source,
                    chunk.start_line as i64,
                    chunk.end_line as i64,
                    hash(&chunk.text),
                    chunk.text,
                    now,
                ],
            )
            .context("failed to insert chunk")?;
        }

        tx.execute(
            "INSERT INTO files (path, source, hash, mtime, size, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(path) DO UPDATE SET
                 source = excluded.source,
                 hash = excluded.hash,
                 mtime = excluded.mtime,
                 size = excluded.size,
                 indexed_at = excluded.indexed_at",
            params![path_str, source, content_hash, mtime, size, now],
        )
        .context("failed to upsert files row")?;

        tx.commit().context("failed to commit index transaction")?;
        Ok(chunks.len())
    }

    /// Full-text query ordered by bm25 relevance.
    pub fn search_fts(
        &self,
        query: &str,
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let fts_query = sanitize_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let sql = match source {
            Some(_) => {
                "SELECT c.id, c.path, c.source, c.start_line, c.end_line, c.text,
                        bm25(chunks_fts) AS score
                 FROM chunks_fts
                 JOIN chunks c ON c.rowid = chunks_fts.rowid
                 WHERE chunks_fts MATCH ?1 AND c.source = ?2
                 ORDER BY score
                 LIMIT ?3"
            }
            None => {
                "SELECT c.id, c.path, c.source, c.start_line, c.end_line, c.text,
                        bm25(chunks_fts) AS score
                 FROM chunks_fts
                 JOIN chunks c ON c.rowid = chunks_fts.rowid
                 WHERE chunks_fts MATCH ?1
                 ORDER BY score
                 LIMIT ?2"
            }
        };

        let mut stmt = self.conn.prepare(sql).context("failed to prepare fts query")?;
        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<SearchHit> {
            Ok(SearchHit {
                id: row.get(0)?,
                path: row.get(1)?,
                source: row.get(2)?,
                start_line: row.get::<_, i64>(3)? as usize,
                end_line: row.get::<_, i64>(4)? as usize,
                text: row.get(5)?,
                // bm25 scores are negative; flip for display
                score: row.get::<_, f64>(6)?.abs(),
            })
        };

        let rows = match source {
            Some(source) => stmt
                .query_map(params![fts_query, source, limit as i64], map_row)
                .context("failed to run fts query")?
                .collect::<rusqlite::Result<Vec<_>>>(),
            None => stmt
                .query_map(params![fts_query, limit as i64], map_row)
                .context("failed to run fts query")?
                .collect::<rusqlite::Result<Vec<_>>>(),
        };
        rows.context("failed to read fts rows")
    }

    /// Chunk count for a path; used by callers reporting index status.
    pub fn chunk_count(&self, path: &Path) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE path = ?1",
                params![path.to_string_lossy()],
                |row| row.get(0),
            )
            .context("failed to count chunks")?;
        Ok(count as usize)
    }

    /// Drop a path and its chunks (the FTS rows follow via trigger).
    pub fn remove_file(&mut self, path: &Path) -> Result<()> {
        let tx = self.conn.transaction().context("failed to begin removal")?;
        tx.execute(
            "DELETE FROM chunks WHERE path = ?1",
            params![path.to_string_lossy()],
        )
        .context("failed to delete chunks")?;
        tx.execute(
            "DELETE FROM files WHERE path = ?1",
            params![path.to_string_lossy()],
        )
        .context("failed to delete files row")?;
        tx.commit().context("failed to commit removal")
    }
}

/// Flatten one transcript JSONL document into `User:`/`Assistant:` lines.
fn transcript_to_lines(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let Some(role) = value.get("role").and_then(Value::as_str) else {
            continue;
        };
        let label = match role {
            "user" => "User",
            "assistant" => "Assistant",
            _ => continue,
        };
        let text = message_text(&value);
        if text.is_empty() {
            continue;
        }
        for text_line in text.lines() {
            out.push(format!("{label}: {text_line}"));
        }
    }
    out
}

fn message_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Strip FTS5 operator characters and OR-join the remaining tokens for
/// broad recall.
fn sanitize_fts_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();
    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    if tokens.is_empty() {
        return String::new();
    }
    tokens
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}
