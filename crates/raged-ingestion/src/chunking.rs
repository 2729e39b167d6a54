//! Deterministic text chunker
//!
//! Splits on paragraph boundaries first, falls back to sentences when a
//! paragraph overflows the window, and hard-cuts only when a single sentence
//! does. Adjacent chunks share a small overlap so context survives the cut.
//! Identical input yields identical output across processes.

/// Chunker tuning
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target window in characters
    pub max_chars: usize,
    /// Overlap carried into the next chunk
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 1536,
            overlap_chars: 200,
        }
    }
}

/// Split a text into an ordered sequence of chunk strings
///
/// Whitespace-only input produces no chunks; anything that fits the window
/// produces exactly one.
pub fn chunk_text(text: &str, config: &ChunkerConfig) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= config.max_chars {
        return vec![text.to_string()];
    }

    // Break the text into units no larger than the window.
    let mut units: Vec<String> = Vec::new();
    for paragraph in split_paragraphs(text) {
        if char_len(paragraph) <= config.max_chars {
            units.push(paragraph.to_string());
            continue;
        }
        for sentence in split_sentences(paragraph) {
            if char_len(&sentence) <= config.max_chars {
                units.push(sentence);
            } else {
                units.extend(hard_cut(&sentence, config));
            }
        }
    }

    // Greedy packing with overlap carried between adjacent chunks.
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for unit in units {
        if current.is_empty() {
            current = unit;
            continue;
        }
        if char_len(&current) + 2 + char_len(&unit) <= config.max_chars {
            current.push_str("\n\n");
            current.push_str(&unit);
            continue;
        }
        let tail = overlap_tail(&current, config.overlap_chars);
        chunks.push(std::mem::take(&mut current));
        current = if tail.is_empty() {
            unit
        } else {
            format!("{tail}\n\n{unit}")
        };
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n").map(str::trim).filter(|p| !p.is_empty())
}

/// Split a paragraph into sentences at `.`, `!` or `?` followed by
/// whitespace. The terminator stays with its sentence.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_none_or(|n| n.is_whitespace()) {
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let trailing = current.trim();
    if !trailing.is_empty() {
        sentences.push(trailing.to_string());
    }
    sentences
}

/// Cut an oversized sentence at character boundaries, with overlap between
/// consecutive pieces
fn hard_cut(sentence: &str, config: &ChunkerConfig) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    let step = config.max_chars.saturating_sub(config.overlap_chars).max(1);
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.max_chars).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    pieces
}

/// The last `overlap` characters of a chunk, trimmed forward to the first
/// whitespace so no word is split
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = chunk.chars().collect();
    let start = chars.len().saturating_sub(overlap);
    let tail: String = chars[start..].iter().collect();
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start().to_string(),
        None => tail,
    }
}
