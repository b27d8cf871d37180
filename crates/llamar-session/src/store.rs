//! The per-agent session metadata store.
//!
//! `sessions.json` maps sessionKey to metadata. It is the one multi-writer
//! file in the system (subagents update their own records), so every
//! read-modify-write runs under the advisory store lock and lands through
//! a temp-file rename.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::trace::{self, TraceEntry};
use crate::transcript::{self, Message, Role};

const STORE_FILE_NAME: &str = "sessions.json";
const LOCK_ATTEMPTS: u32 = 20;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Session metadata plus, when loaded, its messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
    pub provider: String,
    pub model: String,
    pub cwd: String,
    #[serde(rename = "inputTokens", default)]
    pub input_tokens: u64,
    #[serde(rename = "outputTokens", default)]
    pub output_tokens: u64,
    #[serde(rename = "compactionCount", default)]
    pub compaction_count: u32,
    /// Lifecycle marker used by subagent records
    /// (starting, running, completed). Absent for plain sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip)]
    pub messages: Vec<Message>,
}

impl Session {
    /// In-memory only; persistence goes through the transcript.
    pub fn add_message(&mut self, role: Role, text: impl Into<String>) {
        self.messages.push(Message::text_only(role, text));
    }
}

/// A store listing entry: the metadata plus the on-disk message count.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub message_count: usize,
}

/// Store rooted at one agent's sessions directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn store_path(&self) -> PathBuf {
        self.dir.join(STORE_FILE_NAME)
    }

    pub fn transcript_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.jsonl"))
    }

    pub fn trace_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}_trace.jsonl"))
    }

    /// Mint a session: random 128-bit id, `llamar:{id}` key, header written
    /// to a fresh transcript, entry upserted into the store.
    pub fn new_session(&self, provider: &str, model: &str, cwd: &str) -> Result<Session> {
        self.new_session_with_key(provider, model, cwd, None)
    }

    /// Variant used by the subagent supervisor, which owns its key format.
    pub fn new_session_with_key(
        &self,
        provider: &str,
        model: &str,
        cwd: &str,
        session_key: Option<String>,
    ) -> Result<Session> {
        let session_id = Uuid::new_v4().simple().to_string();
        let session_key = session_key.unwrap_or_else(|| format!("llamar:{session_id}"));
        let now = Utc::now().timestamp_millis();

        let session = Session {
            session_id: session_id.clone(),
            session_key,
            created_at: now,
            updated_at: now,
            provider: provider.to_string(),
            model: model.to_string(),
            cwd: cwd.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            compaction_count: 0,
            status: None,
            messages: Vec::new(),
        };

        transcript::write_header(&self.transcript_path(&session_id), &session_id, cwd)?;
        self.save(&session)?;
        Ok(session)
    }

    /// Upsert the metadata entry, refreshing `updatedAt`.
    pub fn save(&self, session: &Session) -> Result<()> {
        let _lock = llamar_lock::acquire_with_retry(
            &self.store_path(),
            "session-store",
            LOCK_ATTEMPTS,
            LOCK_RETRY_DELAY,
        )?;

        let mut entries = self.read_entries();
        let mut entry = session.clone();
        entry.messages = Vec::new();
        entry.updated_at = Utc::now().timestamp_millis();
        entries.insert(entry.session_key.clone(), entry);
        self.write_entries(&entries)
    }

    /// Load a session and its transcript messages.
    pub fn load(&self, session_key: &str, from_compaction: bool) -> Result<Session> {
        let entries = self.read_entries();
        let mut session = entries
            .get(session_key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Session '{session_key}' not found"))?;
        session.messages =
            transcript::load_messages(&self.transcript_path(&session.session_id), from_compaction)?;
        Ok(session)
    }

    /// Up to `n` entries by `updatedAt` descending, each with its current
    /// on-disk message count.
    pub fn list(&self, n: usize) -> Vec<SessionSummary> {
        let mut sessions: Vec<Session> = self.read_entries().into_values().collect();
        sessions.sort_by_key(|session| std::cmp::Reverse(session.updated_at));
        sessions.truncate(n);
        sessions
            .into_iter()
            .map(|session| {
                let message_count =
                    transcript::count_messages(&self.transcript_path(&session.session_id));
                SessionSummary {
                    session,
                    message_count,
                }
            })
            .collect()
    }

    /// Remove a metadata entry (transcripts stay on disk).
    pub fn remove(&self, session_key: &str) -> Result<bool> {
        let _lock = llamar_lock::acquire_with_retry(
            &self.store_path(),
            "session-store",
            LOCK_ATTEMPTS,
            LOCK_RETRY_DELAY,
        )?;
        let mut entries = self.read_entries();
        let removed = entries.remove(session_key).is_some();
        if removed {
            self.write_entries(&entries)?;
        }
        Ok(removed)
    }

    /// Persistent message append for a session.
    pub fn transcript_append(&self, session: &Session, message: &Message) -> Result<()> {
        transcript::append_message(&self.transcript_path(&session.session_id), message)
    }

    /// Append a compaction marker and bump the stored count.
    pub fn transcript_compact(&self, session: &mut Session, summary: &str) -> Result<()> {
        transcript::append_compaction(&self.transcript_path(&session.session_id), summary)?;
        session.compaction_count += 1;
        self.save(session)
    }

    pub fn transcript_count(&self, session_id: &str) -> usize {
        transcript::count_messages(&self.transcript_path(session_id))
    }

    pub fn trace_add(&self, session_id: &str, entry: &TraceEntry) -> Result<()> {
        trace::trace_add(&self.trace_path(session_id), entry)
    }

    pub fn trace_load(&self, session_id: &str, n: Option<usize>) -> Result<Vec<TraceEntry>> {
        trace::trace_load(&self.trace_path(session_id), n)
    }

    fn read_entries(&self) -> BTreeMap<String, Session> {
        let path = self.store_path();
        let Ok(raw) = fs::read_to_string(&path) else {
            return BTreeMap::new();
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(error) => {
                // Corrupt store metadata needs user intervention; refusing
                // to guess here keeps the transcripts authoritative.
                warn!(path = %path.display(), %error, "sessions.json is corrupt");
                BTreeMap::new()
            }
        }
    }

    fn write_entries(&self, entries: &BTreeMap<String, Session>) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create sessions dir: {}", self.dir.display()))?;
        let tmp = self.dir.join("sessions.json.tmp");
        let json = serde_json::to_string_pretty(entries).context("failed to serialize store")?;
        fs::write(&tmp, json)
            .with_context(|| format!("failed to write temp store: {}", tmp.display()))?;
        fs::rename(&tmp, self.store_path())
            .with_context(|| format!("failed to replace store: {}", self.store_path().display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn make_store(dir: &Path) -> SessionStore {
        SessionStore::new(dir.join("sessions"))
    }

    #[test]
    fn test_new_session_mints_id_and_key() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());

        let session = store.new_session("anthropic", "claude-sonnet-4-5", "/work").unwrap();
        assert_eq!(session.session_id.len(), 32, "uuid simple form");
        assert_eq!(session.session_key, format!("llamar:{}", session.session_id));
        assert!(store.transcript_path(&session.session_id).exists());
    }

    #[test]
    fn test_persistence_round_trip() {
        // Scenario S5: create, append user + assistant, reload, expect
        // both messages with role and text intact.
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());

        let session = store.new_session("anthropic", "claude-sonnet-4-5", "/work").unwrap();
        store
            .transcript_append(&session, &Message::text_only(Role::User, "hello"))
            .unwrap();
        store
            .transcript_append(&session, &Message::text_only(Role::Assistant, "hi"))
            .unwrap();

        let loaded = store.load(&session.session_key, true).unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].role, Role::User);
        assert_eq!(loaded.messages[0].text(), "hello");
        assert_eq!(loaded.messages[1].role, Role::Assistant);
        assert_eq!(loaded.messages[1].text(), "hi");
    }

    #[test]
    fn test_save_updates_counters() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());

        let mut session = store.new_session("anthropic", "claude-sonnet-4-5", "/work").unwrap();
        session.input_tokens = 1200;
        session.output_tokens = 450;
        store.save(&session).unwrap();

        let loaded = store.load(&session.session_key, true).unwrap();
        assert_eq!(loaded.input_tokens, 1200);
        assert_eq!(loaded.output_tokens, 450);
        assert!(loaded.updated_at >= session.created_at);
    }

    #[test]
    fn test_list_sorted_with_counts() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());

        let first = store.new_session("anthropic", "m", "/a").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let second = store.new_session("anthropic", "m", "/b").unwrap();
        store
            .transcript_append(&second, &Message::text_only(Role::User, "x"))
            .unwrap();

        let listed = store.list(10);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].session.session_key, second.session_key);
        assert_eq!(listed[0].message_count, 1);
        assert_eq!(listed[1].message_count, 0);

        let capped = store.list(1);
        assert_eq!(capped.len(), 1);
        let _ = first;
    }

    #[test]
    fn test_load_unknown_key_fails() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        assert!(store.load("llamar:nope", true).is_err());
    }

    #[test]
    fn test_compaction_bumps_count_and_filters() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());

        let mut session = store.new_session("anthropic", "m", "/work").unwrap();
        store
            .transcript_append(&session, &Message::text_only(Role::User, "ancient history"))
            .unwrap();
        store.transcript_compact(&mut session, "Summary of history.").unwrap();
        store
            .transcript_append(&session, &Message::text_only(Role::User, "fresh question"))
            .unwrap();

        let loaded = store.load(&session.session_key, true).unwrap();
        assert_eq!(loaded.compaction_count, 1);
        assert_eq!(loaded.messages.len(), 2);
        assert!(loaded.messages[0].is_compaction_marker());
    }

    #[test]
    fn test_trace_mirrors_session() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        let session = store.new_session("anthropic", "m", "/work").unwrap();

        store
            .trace_add(
                &session.session_id,
                &TraceEntry::new("bash", &json!({"command": "ls"}), "ok", true, 3, None, None),
            )
            .unwrap();

        let entries = store.trace_load(&session.session_id, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tool, "bash");
        assert!(store.trace_path(&session.session_id).exists());
    }

    #[test]
    fn test_remove_entry_keeps_transcript() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        let session = store.new_session("anthropic", "m", "/work").unwrap();

        assert!(store.remove(&session.session_key).unwrap());
        assert!(store.load(&session.session_key, true).is_err());
        assert!(store.transcript_path(&session.session_id).exists());
        assert!(!store.remove(&session.session_key).unwrap());
    }
}
