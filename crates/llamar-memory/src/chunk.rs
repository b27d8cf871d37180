//! Text chunking primitives shared by the index and the tool bodies.

/// A window over a line array, 1-indexed and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineChunk {
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

/// Split `text` into pieces of at most `limit` characters.
///
/// Within each window the break point is scanned right to left: a newline
/// is preferred, then any whitespace, then a hard cut at `limit`. Chunks
/// are trimmed of surrounding whitespace; empty input yields no chunks and
/// input that already fits yields exactly one.
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 || text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        while start < chars.len() && chars[start].is_whitespace() {
            start += 1;
        }
        if start >= chars.len() {
            break;
        }

        let remaining = chars.len() - start;
        if remaining <= limit {
            push_trimmed(&mut chunks, &chars[start..]);
            break;
        }

        let window_end = start + limit;
        let mut cut = None;
        for idx in (start + 1..=window_end).rev() {
            if chars[idx - 1] == '\n' {
                cut = Some(idx);
                break;
            }
        }
        if cut.is_none() {
            for idx in (start + 1..=window_end).rev() {
                if chars[idx - 1].is_whitespace() {
                    cut = Some(idx);
                    break;
                }
            }
        }

        let end = cut.unwrap_or(window_end);
        push_trimmed(&mut chunks, &chars[start..end]);
        start = end;
    }

    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, piece: &[char]) {
    let text: String = piece.iter().collect();
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split on blank lines and greedily pack paragraphs (joined by a blank
/// line) up to `limit`. Paragraphs that individually exceed the limit are
/// delegated to [`chunk_text`].
pub fn chunk_by_paragraph(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 {
        return Vec::new();
    }

    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut chunks = Vec::new();
    let mut current = String::new();

    for raw_paragraph in normalized.split("\n\n") {
        let paragraph = raw_paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if paragraph.chars().count() > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(chunk_text(paragraph, limit));
            continue;
        }

        if current.is_empty() {
            current = paragraph.to_string();
        } else if current.chars().count() + 2 + paragraph.chars().count() <= limit {
            current.push_str("\n\n");
            current.push_str(paragraph);
        } else {
            chunks.push(std::mem::take(&mut current));
            current = paragraph.to_string();
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Produce overlapping windows over a line array.
///
/// For consecutive chunks `i`, `i+1`:
/// `chunks[i].end_line - chunks[i+1].start_line + 1 == overlap`.
pub fn chunk_lines(lines: &[&str], size: usize, overlap: usize) -> Vec<LineChunk> {
    if lines.is_empty() || size == 0 {
        return Vec::new();
    }

    let overlap = overlap.min(size.saturating_sub(1));
    let step = size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + size).min(lines.len());
        chunks.push(LineChunk {
            start_line: start + 1,
            end_line: end,
            text: lines[start..end].join("\n"),
        });
        if end == lines.len() {
            break;
        }
        start += step;
    }

    chunks
}
