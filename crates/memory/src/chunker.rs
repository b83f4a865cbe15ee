/// Split documents into overlapping character windows with stable ids.
use crate::hashing::short_hash;

/// One window of a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Derived from `source`, `index` and the content hash; identical input gives identical ids.
    pub id: String,
    /// Position of the chunk within its source.
    pub index: usize,
    pub content: String,
    /// Truncated SHA-256 of `content`.
    pub content_hash: String,
}

/// Split `content` into windows of at most `chunk_size` characters, consecutive
/// windows sharing up to `chunk_overlap` characters (aligned to a word start).
///
/// A window that would cut through the text is pulled back to the last
/// whitespace in its second half. Whitespace-only windows are dropped, so empty
/// content yields no chunks and content shorter than `chunk_size` yields one.
pub fn chunk_text(
    content: &str,
    source: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Chunk> {
    if chunk_size == 0 || content.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = content.chars().collect();
    let offsets: Vec<usize> = content
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(content.len()))
        .collect();
    let total = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let mut end = (start + chunk_size).min(total);
        if end < total {
            let floor = start + chunk_size / 2;
            if let Some(ws) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = ws + 1;
            }
        }

        let text = content[offsets[start]..offsets[end]].trim();
        if !text.is_empty() {
            let index = chunks.len();
            let content_hash = short_hash(text);
            chunks.push(Chunk {
                id: short_hash(&format!("{source}:{index}:{content_hash}")),
                index,
                content: text.to_string(),
                content_hash,
            });
        }

        if end >= total {
            break;
        }
        // Overlap starts on a word boundary and always moves forward.
        let mut next = end.saturating_sub(chunk_overlap).max(start + 1);
        while next < end && !chars[next - 1].is_whitespace() {
            next += 1;
        }
        start = next;
    }

    chunks
}
