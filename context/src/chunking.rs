//! Boundary-preserving, token-bounded chunking.
//!
//! Text is segmented at the most meaningful boundaries available (fenced code
//! blocks, then blank-line paragraphs) and segments are packed greedily into
//! chunks under a token ceiling. Each chunk after the first is seeded with a
//! short overlap window copied from the tail of the previous chunk so that a
//! summarizer sees some context across the cut.

use condense_types::Chunk;

use crate::TokenCounter;
use crate::truncation::longest_fitting_prefix;

/// Separator placed between packed segments.
const SEGMENT_SEPARATOR: &str = "\n\n";

/// Separator between an overlap window and the chunk's own text.
const OVERLAP_SEPARATOR: &str = " ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Ceiling for every chunk, overlap included.
    pub max_chunk_tokens: u32,
    /// Upper bound for the overlap window carried into the next chunk.
    pub overlap_tokens: u32,
    /// Keep fenced code blocks in one segment.
    pub preserve_code_blocks: bool,
    /// Split prose at blank lines.
    pub preserve_paragraphs: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 3_000,
            overlap_tokens: 200,
            preserve_code_blocks: true,
            preserve_paragraphs: true,
        }
    }
}

#[derive(Debug)]
struct Segment {
    text: String,
    code: bool,
}

/// Splits `text` into ordered chunks of at most `max_chunk_tokens` tokens.
///
/// - Empty or whitespace-only input yields no chunks.
/// - Input that already fits yields exactly one chunk equal to the input.
/// - A segment larger than the ceiling is cut at sentence, then word, then
///   character boundaries. A single character that alone exceeds the ceiling
///   is the only way a chunk can exceed it.
#[must_use]
pub fn chunk(counter: &TokenCounter, text: &str, options: &ChunkOptions) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let max_tokens = options.max_chunk_tokens.max(1);
    let total = counter.count(text);
    if total <= max_tokens {
        return vec![Chunk {
            text: text.to_string(),
            token_count: total,
            index: 0,
            overlap_len: 0,
        }];
    }

    // Leave room for an overlap window in front of forced fragments.
    let fragment_tokens = if max_tokens > options.overlap_tokens.saturating_mul(2) {
        max_tokens - options.overlap_tokens
    } else {
        max_tokens
    };

    let segments = split_segments(text, options);
    let mut packer = Packer::new(counter, max_tokens, options.overlap_tokens);
    for segment in &segments {
        if counter.count(&segment.text) > max_tokens {
            for fragment in force_split(counter, &segment.text, fragment_tokens, segment.code) {
                packer.push(fragment);
            }
        } else {
            packer.push(&segment.text);
        }
    }
    let chunks = packer.finish();

    tracing::debug!(
        tokens = total,
        segments = segments.len(),
        chunks = chunks.len(),
        max_chunk_tokens = max_tokens,
        "Chunked text"
    );
    chunks
}

struct Packer<'a> {
    counter: &'a TokenCounter,
    max_tokens: u32,
    overlap_tokens: u32,
    chunks: Vec<Chunk>,
    current: String,
    overlap_len: usize,
}

impl<'a> Packer<'a> {
    fn new(counter: &'a TokenCounter, max_tokens: u32, overlap_tokens: u32) -> Self {
        Self {
            counter,
            max_tokens,
            overlap_tokens,
            chunks: Vec::new(),
            current: String::new(),
            overlap_len: 0,
        }
    }

    fn push(&mut self, piece: &str) {
        if self.current.is_empty() {
            self.current.push_str(piece);
            return;
        }

        let candidate = format!("{}{SEGMENT_SEPARATOR}{piece}", self.current);
        if self.counter.count(&candidate) <= self.max_tokens {
            self.current = candidate;
            return;
        }

        let closed = self.close();
        let overlap = tail_words(self.counter, &closed, self.overlap_tokens);
        self.seed(overlap, piece);
    }

    /// Starts the next chunk with as much of `overlap` as still fits in front
    /// of `piece`, dropping words from the front of the window.
    fn seed(&mut self, mut overlap: &str, piece: &str) {
        while !overlap.is_empty() {
            let candidate = format!("{overlap}{OVERLAP_SEPARATOR}{piece}");
            if self.counter.count(&candidate) <= self.max_tokens {
                self.overlap_len = overlap.len() + OVERLAP_SEPARATOR.len();
                self.current = candidate;
                return;
            }
            overlap = drop_first_word(overlap);
        }
        self.overlap_len = 0;
        self.current = piece.to_string();
    }

    /// Pushes the current chunk and returns its text.
    fn close(&mut self) -> String {
        let text = std::mem::take(&mut self.current);
        self.chunks.push(Chunk {
            token_count: self.counter.count(&text),
            index: self.chunks.len(),
            overlap_len: std::mem::take(&mut self.overlap_len),
            text: text.clone(),
        });
        text
    }

    fn finish(mut self) -> Vec<Chunk> {
        if !self.current.is_empty() {
            self.close();
        }
        self.chunks
    }
}

/// The longest run of trailing words of `text` that fits in `max_tokens`.
fn tail_words<'t>(counter: &TokenCounter, text: &'t str, max_tokens: u32) -> &'t str {
    if max_tokens == 0 {
        return "";
    }

    let text = text.trim_end();
    let mut best = "";
    for start in word_starts(text).into_iter().rev() {
        let window = &text[start..];
        if counter.count(window) > max_tokens {
            break;
        }
        best = window;
    }
    best
}

fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut prev_ws = true;
    for (i, c) in text.char_indices() {
        let ws = c.is_whitespace();
        if prev_ws && !ws {
            starts.push(i);
        }
        prev_ws = ws;
    }
    starts
}

fn drop_first_word(text: &str) -> &str {
    match text.find(char::is_whitespace) {
        Some(pos) => text[pos..].trim_start(),
        None => "",
    }
}

/// Cuts an oversized segment into fragments of at most `max_tokens` tokens.
fn force_split<'t>(
    counter: &TokenCounter,
    text: &'t str,
    max_tokens: u32,
    code: bool,
) -> Vec<&'t str> {
    let mut fragments = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        let end = longest_fitting_prefix(counter, rest, max_tokens);
        if end == rest.len() {
            fragments.push(rest);
            break;
        }

        let cut = if end == 0 {
            // Even one character is over the ceiling; take it anyway.
            rest.chars().next().map_or(rest.len(), char::len_utf8)
        } else {
            boundary_cut(rest, end, code)
        };

        let fragment = rest[..cut].trim_end();
        if !fragment.is_empty() {
            fragments.push(fragment);
        }
        rest = rest[cut..].trim_start();
    }

    fragments
}

/// Chooses where to cut `text` given that `text[..end]` fits.
///
/// Code prefers line breaks; prose prefers sentence ends. Both then fall back
/// to the last whitespace and finally the raw cut.
fn boundary_cut(text: &str, end: usize, code: bool) -> usize {
    let prefix = &text[..end];

    if code && let Some(pos) = prefix.rfind('\n').filter(|&p| p > 0) {
        return pos;
    }

    if let Some(pos) = last_sentence_end(text, end) {
        return pos;
    }

    if text[end..].starts_with(char::is_whitespace) {
        return end;
    }

    match prefix.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => pos,
        _ => end,
    }
}

/// Byte offset just past the last `.`, `!` or `?` in `text[..end]` that is
/// followed by whitespace or the end of `text`.
fn last_sentence_end(text: &str, end: usize) -> Option<usize> {
    text[..end]
        .char_indices()
        .rev()
        .filter(|&(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .find(|&after| {
            text[after..]
                .chars()
                .next()
                .is_none_or(char::is_whitespace)
        })
}

fn split_segments(text: &str, options: &ChunkOptions) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut prose: Vec<&str> = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        if options.preserve_code_blocks
            && let Some(fence) = parse_fence_start(line)
        {
            flush_prose(&mut prose, options.preserve_paragraphs, &mut segments);

            // An unclosed fence runs to the end of the input.
            let mut block = vec![line];
            for next in lines.by_ref() {
                block.push(next);
                if is_fence_close(next, &fence) {
                    break;
                }
            }
            segments.push(Segment {
                text: block.join("\n"),
                code: true,
            });
            continue;
        }
        prose.push(line);
    }
    flush_prose(&mut prose, options.preserve_paragraphs, &mut segments);

    segments
}

fn flush_prose(prose: &mut Vec<&str>, paragraphs: bool, segments: &mut Vec<Segment>) {
    let mut emit = |lines: &[&str]| {
        let text = lines.join("\n");
        let text = text.trim();
        if !text.is_empty() {
            segments.push(Segment {
                text: text.to_string(),
                code: false,
            });
        }
    };

    if paragraphs {
        for paragraph in prose.split(|line| line.trim().is_empty()) {
            emit(paragraph);
        }
    } else {
        emit(prose);
    }
    prose.clear();
}

fn parse_fence_start(line: &str) -> Option<String> {
    let trimmed = line.trim_start();

    let fence_char = if trimmed.starts_with('`') {
        '`'
    } else if trimmed.starts_with('~') {
        '~'
    } else {
        return None;
    };

    let fence_len = trimmed.chars().take_while(|c| *c == fence_char).count();
    if fence_len < 3 {
        return None;
    }

    Some(fence_char.to_string().repeat(fence_len))
}

fn is_fence_close(line: &str, opening_fence: &str) -> bool {
    let trimmed = line.trim();
    let fence_char = opening_fence.chars().next().unwrap_or('`');

    if !trimmed.starts_with(fence_char) {
        return false;
    }

    // Closing fence must be at least as long as opening
    let fence_len = trimmed.chars().take_while(|c| *c == fence_char).count();
    if fence_len < opening_fence.len() {
        return false;
    }

    trimmed[fence_len..].trim().is_empty()
}
