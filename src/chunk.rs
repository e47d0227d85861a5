//! Overlapping character-window chunker.
//!
//! Splits a document body into windows of `window` characters where each
//! window starts `window - overlap` characters after the previous one.
//! Lengths are counted in Unicode scalar values, never bytes, so a window
//! boundary never lands inside a multi-byte character.
//!
//! Each chunk is identified as `<document_id>_<index>` and carries a
//! SHA-256 hash of its text.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Split text into overlapping windows. Returns chunks with contiguous
/// indices starting at 0, or no chunks for whitespace-only text.
///
/// `overlap` must be smaller than `window` (enforced by config validation).
pub fn chunk_text(document_id: &str, text: &str, window: usize, overlap: usize) -> Vec<Chunk> {
    if text.trim().is_empty() || window == 0 {
        return Vec::new();
    }
    let stride = window.saturating_sub(overlap).max(1);

    // Byte offset of every char, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let total_chars = bounds.len();
    bounds.push(text.len());

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index: i64 = 0;

    loop {
        let end = (start + window).min(total_chars);
        let piece = &text[bounds[start]..bounds[end]];
        chunks.push(make_chunk(document_id, chunk_index, piece));
        chunk_index += 1;

        if end >= total_chars {
            break;
        }
        start += stride;
    }

    chunks
}

/// Number of chunks [`chunk_text`] yields for a text of `chars` characters.
#[cfg(test)]
fn expected_chunk_count(chars: usize, window: usize, overlap: usize) -> usize {
    if chars == 0 {
        return 0;
    }
    if chars <= window {
        return 1;
    }
    let stride = window - overlap;
    (chars - overlap).div_ceil(stride)
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}_{}", document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
