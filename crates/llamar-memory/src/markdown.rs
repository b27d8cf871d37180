//! The Markdown face of memory: `MEMORY.md` with categorized, tagged,
//! dated entries, plus daily append logs.
//!
//! These files are both human-edited and machine-parsed, so the parser
//! tolerates extra whitespace, mixed-case section headings, and blank
//! sections. Each entry line must round-trip: formatting then parsing
//! recovers exactly the text, tags, and date.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate};
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    Global,
    Project,
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Project => f.write_str("project"),
        }
    }
}

/// One parsed entry line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntry {
    pub text: String,
    pub date: NaiveDate,
    pub tags: Vec<String>,
}

/// One search hit, with its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryHit {
    pub text: String,
    pub tags: Vec<String>,
    pub date: String,
    pub section: String,
    pub scope: MemoryScope,
    pub line: usize,
    pub raw: String,
}

static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*-\s+(?P<text>.*?)\s+\((?P<date>\d{4}-\d{2}-\d{2})\)(?P<tags>(\s+#[A-Za-z0-9_-]+)*)\s*$")
        .expect("entry regex must compile")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([A-Za-z0-9_-]+)").expect("tag regex must compile"));

/// Format an entry line: `- <text> (YYYY-MM-DD)[ #tag]*`.
pub fn format_entry(text: &str, tags: &[String], date: NaiveDate) -> String {
    let mut line = format!("- {} ({})", text.trim(), date.format("%Y-%m-%d"));
    for tag in tags {
        line.push_str(" #");
        line.push_str(tag);
    }
    line
}

/// Parse one entry line back into its parts. Returns `None` for anything
/// that is not an entry (headings, prose, blanks).
pub fn parse_entry(line: &str) -> Option<ParsedEntry> {
    let captures = ENTRY_RE.captures(line)?;
    let date = NaiveDate::parse_from_str(&captures["date"], "%Y-%m-%d").ok()?;
    let tags = TAG_RE
        .captures_iter(&captures["tags"])
        .map(|c| c[1].to_string())
        .collect();
    Some(ParsedEntry {
        text: captures["text"].to_string(),
        date,
        tags,
    })
}

/// Pull embedded hashtags out of a fact, returning the cleaned text and the
/// tags in order of first appearance.
pub fn extract_tags(fact: &str) -> (String, Vec<String>) {
    let mut tags = Vec::new();
    for captures in TAG_RE.captures_iter(fact) {
        let tag = captures[1].to_string();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    let cleaned = TAG_RE.replace_all(fact, "");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    (cleaned, tags)
}

/// Keyword-based category detection for facts stored without one.
pub fn detect_category(fact: &str) -> &'static str {
    let lowered = fact.to_lowercase();
    const PREFERENCE_WORDS: &[&str] = &[
        "prefer", "prefers", "like", "likes", "dislike", "always use", "never use", "favorite",
        "instead of",
    ];
    const CONTEXT_WORDS: &[&str] = &[
        "working on", "currently", "this week", "project", "deadline", "in progress", "todo",
    ];
    if PREFERENCE_WORDS.iter().any(|word| lowered.contains(word)) {
        return "Preferences";
    }
    if CONTEXT_WORDS.iter().any(|word| lowered.contains(word)) {
        return "Context";
    }
    "Facts"
}

/// A memory store bound to concrete file locations. Callers construct it
/// from the standard layout; tests point it at a tempdir.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    global_path: PathBuf,
    project_path: PathBuf,
    daily_dir: PathBuf,
}

impl MemoryStore {
    pub fn new(global_path: PathBuf, project_path: PathBuf, daily_dir: PathBuf) -> Self {
        Self {
            global_path,
            project_path,
            daily_dir,
        }
    }

    fn path_for(&self, scope: MemoryScope) -> &Path {
        match scope {
            MemoryScope::Global => &self.global_path,
            MemoryScope::Project => &self.project_path,
        }
    }

    /// Append a fact to the scoped `MEMORY.md`, extracting embedded
    /// hashtags and auto-detecting the category when none is given.
    /// Also mirrors the fact into the daily log. Returns the entry line.
    pub fn store(
        &self,
        fact: &str,
        extra_tags: &[String],
        category: Option<&str>,
        scope: MemoryScope,
        now: DateTime<Local>,
    ) -> Result<String> {
        let (cleaned, mut tags) = extract_tags(fact);
        for tag in extra_tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        let category = category
            .map(normalize_category)
            .unwrap_or_else(|| detect_category(&cleaned).to_string());
        let entry = format_entry(&cleaned, &tags, now.date_naive());

        let path = self.path_for(scope);
        let document = match fs::read_to_string(path) {
            Ok(existing) => existing,
            Err(_) => "# Memory\n".to_string(),
        };
        let updated = insert_into_section(&document, &category, &entry);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create memory dir: {}", parent.display()))?;
        }
        write_atomic(path, &updated)?;

        self.append_daily_log(&cleaned, &tags, now)?;
        Ok(entry)
    }

    /// Scan the applicable files line by line with a case-insensitive
    /// regex, yielding structured hits.
    pub fn search(&self, query: &str, scope: Option<MemoryScope>) -> Result<Vec<MemoryHit>> {
        let regex = regex::RegexBuilder::new(&regex::escape(query))
            .case_insensitive(true)
            .build()
            .with_context(|| format!("invalid memory query: {query}"))?;

        let scopes: &[MemoryScope] = match scope {
            Some(MemoryScope::Global) => &[MemoryScope::Global],
            Some(MemoryScope::Project) => &[MemoryScope::Project],
            None => &[MemoryScope::Project, MemoryScope::Global],
        };

        let mut hits = Vec::new();
        for &scope in scopes {
            let path = self.path_for(scope);
            let Ok(document) = fs::read_to_string(path) else {
                continue;
            };

            let mut section = String::from("Memory");
            for (idx, line) in document.lines().enumerate() {
                if let Some(heading) = line.trim().strip_prefix("## ")
                    && !heading.trim_start().starts_with('#')
                {
                    section = heading.trim().to_string();
                    continue;
                }
                if !regex.is_match(line) {
                    continue;
                }
                let Some(parsed) = parse_entry(line) else {
                    continue;
                };
                hits.push(MemoryHit {
                    text: parsed.text,
                    tags: parsed.tags,
                    date: parsed.date.format("%Y-%m-%d").to_string(),
                    section: section.clone(),
                    scope,
                    line: idx + 1,
                    raw: line.to_string(),
                });
            }
        }
        Ok(hits)
    }

    /// Append a timestamped copy of the fact to `memory/YYYY-MM-DD.md`.
    fn append_daily_log(&self, fact: &str, tags: &[String], now: DateTime<Local>) -> Result<()> {
        fs::create_dir_all(&self.daily_dir).with_context(|| {
            format!("failed to create daily log dir: {}", self.daily_dir.display())
        })?;

        let date = now.format("%Y-%m-%d").to_string();
        let path = self.daily_dir.join(format!("{date}.md"));
        let mut document = match fs::read_to_string(&path) {
            Ok(existing) => existing,
            Err(_) => format!("# {date}\n"),
        };
        if !document.ends_with('\n') {
            document.push('\n');
        }
        document.push_str(&format!("- [{}] {}", now.format("%H:%M"), fact));
        for tag in tags {
            document.push_str(" #");
            document.push_str(tag);
        }
        document.push('\n');
        write_atomic(&path, &document)
    }
}

fn normalize_category(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => "Facts".to_string(),
    }
}

/// Insert `entry` at the tail of `## category`, creating the section (and
/// the `# Memory` heading) as needed. Section matching is case-insensitive.
fn insert_into_section(document: &str, category: &str, entry: &str) -> String {
    let mut lines: Vec<String> = document.lines().map(str::to_string).collect();
    if lines.is_empty() {
        lines.push("# Memory".to_string());
    }

    let wanted = category.to_lowercase();
    let mut section_start = None;
    for (idx, line) in lines.iter().enumerate() {
        if let Some(heading) = line.trim().strip_prefix("## ")
            && heading.trim().to_lowercase() == wanted
        {
            section_start = Some(idx);
            break;
        }
    }

    match section_start {
        Some(start) => {
            // Tail of the section: last non-blank line before the next
            // heading (or end of file).
            let mut end = lines.len();
            for (idx, line) in lines.iter().enumerate().skip(start + 1) {
                if line.trim().starts_with("## ") {
                    end = idx;
                    break;
                }
            }
            let mut insert_at = end;
            while insert_at > start + 1 && lines[insert_at - 1].trim().is_empty() {
                insert_at -= 1;
            }
            lines.insert(insert_at, entry.to_string());
        }
        None => {
            if !lines.last().is_none_or(|l| l.trim().is_empty()) {
                lines.push(String::new());
            }
            lines.push(format!("## {category}"));
            lines.push(entry.to_string());
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("md.tmp");
    fs::write(&tmp, contents)
        .with_context(|| format!("failed to write temp memory file: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace memory file: {}", path.display()))
}
