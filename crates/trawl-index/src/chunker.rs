//! Line-based chunking: paragraphs for prose, declaration segments for code,
//! overlapping windows for everything else.

use std::path::Path;

use crate::error::{IndexError, Result};
use crate::rules::{ChunkRules, Strategy};

/// Characters of chunk text folded into the chunk id.
const ID_TEXT_PREFIX: usize = 200;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// A contiguous, 1-based inclusive line range of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

impl Chunk {
    fn new(path: &str, start_line: usize, end_line: usize, text: String) -> Self {
        Self {
            chunk_id: chunk_id(path, start_line, end_line, &text),
            path: path.to_owned(),
            start_line,
            end_line,
            text,
        }
    }
}

/// Content-derived chunk identity: blake3 over path, range and a text prefix.
#[must_use]
pub fn chunk_id(path: &str, start_line: usize, end_line: usize, text: &str) -> String {
    let prefix: String = text.chars().take(ID_TEXT_PREFIX).collect();
    let input = format!("{path}:{start_line}:{end_line}:{prefix}");
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Split `content` of the file at `path` into chunks. Empty chunks are dropped.
#[must_use]
pub fn chunk_text(path: &str, content: &str, rules: &ChunkRules) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    match rules.strategy_for(path) {
        Strategy::Text => chunk_prose(path, &lines, rules),
        Strategy::Code => chunk_code(path, &lines, rules),
        Strategy::Window => chunk_window(path, &lines, 1, rules),
    }
}

/// Read and chunk `rel_path` under `root`.
///
/// A path that no longer exists (or is not a regular file) yields no chunks.
///
/// # Errors
///
/// Returns [`IndexError::FileTooLarge`] above `max_file_bytes`, or an IO error
/// if the file cannot be read.
pub async fn chunk_file(
    root: &Path,
    rel_path: &str,
    rules: &ChunkRules,
    max_file_bytes: u64,
) -> Result<Vec<Chunk>> {
    let abs = root.join(rel_path);
    let meta = match tokio::fs::metadata(&abs).await {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return Ok(Vec::new()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if meta.len() > max_file_bytes {
        return Err(IndexError::FileTooLarge {
            path: rel_path.to_owned(),
            size: meta.len(),
            limit: max_file_bytes,
        });
    }

    let bytes = tokio::fs::read(&abs).await?;
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
    let content = String::from_utf8_lossy(body);
    Ok(chunk_text(rel_path, &content, rules))
}

fn push_trimmed(out: &mut Vec<Chunk>, path: &str, start: usize, end: usize, lines: &[&str]) {
    let text = lines.join("\n").trim().to_owned();
    if !text.is_empty() {
        out.push(Chunk::new(path, start, end, text));
    }
}

fn chunk_prose(path: &str, lines: &[&str], rules: &ChunkRules) -> Vec<Chunk> {
    let max_lines = rules.limits.text_max_lines.max(1);
    let mut chunks = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut start_line = 1;

    for (idx, &line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        if buffer.is_empty() {
            start_line = line_no;
        }
        buffer.push(line);
        if line.trim().is_empty() || buffer.len() >= max_lines {
            push_trimmed(&mut chunks, path, start_line, line_no, &buffer);
            buffer.clear();
        }
    }
    if !buffer.is_empty() {
        push_trimmed(&mut chunks, path, start_line, lines.len(), &buffer);
    }
    chunks
}

fn chunk_code(path: &str, lines: &[&str], rules: &ChunkRules) -> Vec<Chunk> {
    if lines.is_empty() {
        return Vec::new();
    }

    let mut boundaries = vec![1];
    boundaries.extend(
        lines
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, line)| rules.is_boundary(line))
            .map(|(idx, _)| idx + 1),
    );
    boundaries.push(lines.len() + 1);

    let mut chunks = Vec::new();
    for pair in boundaries.windows(2) {
        let (start_line, end_line) = (pair[0], pair[1] - 1);
        let segment = &lines[start_line - 1..end_line];
        if segment.len() > rules.limits.code_max_segment {
            chunks.extend(chunk_window(path, segment, start_line, rules));
        } else {
            push_trimmed(&mut chunks, path, start_line, end_line, segment);
        }
    }

    if chunks.is_empty() {
        return chunk_window(path, lines, 1, rules);
    }
    chunks
}

/// Sliding window over `lines`, numbering from `start_offset`.
fn chunk_window(path: &str, lines: &[&str], start_offset: usize, rules: &ChunkRules) -> Vec<Chunk> {
    let window = rules.limits.window.max(1);
    let step = window.saturating_sub(rules.limits.overlap).max(1);
    let mut chunks = Vec::new();

    for index in (0..lines.len()).step_by(step) {
        let segment = &lines[index..(index + window).min(lines.len())];
        let start_line = start_offset + index;
        let end_line = start_line + segment.len() - 1;
        push_trimmed(&mut chunks, path, start_line, end_line, segment);
    }
    chunks
}
