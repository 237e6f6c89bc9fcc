//! Sentence-aware text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `max_chars` characters
//! (Unicode scalar values). Chunks partition the text with zero overlap:
//! concatenating them in `chunk_index` order gives back the original text
//! byte-for-byte.
//!
//! Sentences end after `。！？…` or a newline, or after `.!?` when followed
//! by whitespace (the whitespace stays with the sentence). Sentences are
//! packed greedily. A buffer that has reached `min_chars` is flushed when the
//! next sentence does not fit; a shorter buffer is topped up with a prefix of
//! the next sentence, cut at a whitespace boundary when one keeps the chunk at
//! or above `min_chars`, otherwise hard-cut at `max_chars`. Only the last chunk
//! of a document may fall below `min_chars`.

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chars: usize,
    min_chars: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            max_chars: 400,
            min_chars: 50,
        }
    }
}

impl Chunker {
    pub fn new(max_chars: usize, min_chars: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(Error::Config("chunking.max_chars must be > 0".into()));
        }
        if min_chars > max_chars {
            return Err(Error::Config(format!(
                "chunking.min_chars ({}) must be <= chunking.max_chars ({})",
                min_chars, max_chars
            )));
        }
        Ok(Self {
            max_chars,
            min_chars,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.max_chars, config.min_chars)
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn min_chars(&self) -> usize {
        self.min_chars
    }

    /// Split a document into ordered chunks. Empty or whitespace-only text
    /// yields no chunks.
    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        self.split(&doc.raw_text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| Chunk {
                docs_root: doc.docs_root.clone(),
                doc_name: doc.doc_name.clone(),
                chunk_index,
                text: text.to_string(),
            })
            .collect()
    }

    /// Split raw text into chunk slices.
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut out = Vec::new();
        // Buffer is always a contiguous slice text[start..end].
        let mut start = 0usize;
        let mut end = 0usize;
        let mut buf_chars = 0usize;

        for segment in segments(text) {
            let mut rest = segment;
            while !rest.is_empty() {
                let rest_chars = rest.chars().count();
                if buf_chars + rest_chars <= self.max_chars {
                    end += rest.len();
                    buf_chars += rest_chars;
                    break;
                }

                if buf_chars > 0 && buf_chars >= self.min_chars {
                    out.push(&text[start..end]);
                    start = end;
                    buf_chars = 0;
                    continue;
                }

                let room = self.max_chars - buf_chars;
                let need = self.min_chars.saturating_sub(buf_chars);
                let cut = prefix_cut(rest, need, room);
                end += cut;
                out.push(&text[start..end]);
                start = end;
                buf_chars = 0;
                rest = &rest[cut..];
            }
        }

        if end > start {
            out.push(&text[start..end]);
        }
        out
    }
}

/// Sentence segments covering `text` exactly.
fn segments(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut seg_start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        let mut seg_end = None;
        match c {
            '。' | '！' | '？' | '…' | '\n' => seg_end = Some(i + c.len_utf8()),
            '.' | '!' | '?' => {
                if let Some(&(j, next)) = iter.peek() {
                    if next.is_whitespace() {
                        iter.next();
                        seg_end = Some(j + next.len_utf8());
                    }
                }
            }
            _ => {}
        }
        if let Some(e) = seg_end {
            out.push(&text[seg_start..e]);
            seg_start = e;
        }
    }

    if seg_start < text.len() {
        out.push(&text[seg_start..]);
    }
    out
}

/// Byte length of the prefix of `s` to take: the longest prefix of at most
/// `room` chars ending in whitespace and holding at least `need` chars, or
/// exactly `room` chars when no such prefix exists.
fn prefix_cut(s: &str, need: usize, room: usize) -> usize {
    let mut best = None;
    let mut hard = s.len();
    for (n, (i, c)) in s.char_indices().enumerate() {
        let taken = n + 1;
        if taken > room {
            hard = i;
            break;
        }
        if taken >= need.max(1) && c.is_whitespace() {
            best = Some(i + c.len_utf8());
        }
    }
    best.unwrap_or(hard)
}
