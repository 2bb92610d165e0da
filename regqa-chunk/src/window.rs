//! Token-window chunking for retrieval.
//!
//! This module turns a document's text into the unit of retrieval: a sequence
//! of overlapping, fixed-size token windows. Each window is sized to stay
//! within an embedding model's context limit while the overlap preserves
//! cross-boundary context, so an answer that spans a window edge is still
//! recoverable from at least one window.
//!
//! The module defines two main types:
//! - [`WindowChunker`]: validates a [`ChunkerConfig`] and produces windows
//!   from text.
//! - [`TokenWindow`]: one window, carrying its zero-based `sequence`, its
//!   token coordinates, and the byte range it occupies in the source text.
//!
//! # Tokenization
//!
//! Tokens are Unicode-whitespace-delimited spans located with a regex. Each
//! token's span is extended through its trailing whitespace (and the first
//! token absorbs any leading whitespace), so token spans tile the input
//! exactly. That makes the windows reconstructable: window 0 taken whole,
//! followed by each later window's bytes past the previous window's end,
//! reproduces the input byte-for-byte.
//!
//! Whitespace tokens are a stand-in for the embedding model's own subword
//! tokenizer; see the note on [`ChunkerConfig`] for the implications.
//!
//! # Usage
//!
//! ```
//! use regqa_chunk::{ChunkerConfig, WindowChunker};
//!
//! let chunker = WindowChunker::new(ChunkerConfig::new(8, 2)).unwrap();
//! let text = "one two three four five six seven eight nine ten";
//! let windows: Vec<_> = chunker.windows(text).collect();
//!
//! assert_eq!(windows.len(), 2);
//! assert_eq!(windows[0].sequence, 0);
//! assert_eq!(windows[1].start_token, 6); // stride = window - overlap
//! assert!(windows[1].text.starts_with("seven"));
//! ```

use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use std::sync::OnceLock;

/// Default window size in tokens.
///
/// Matches the context budget of the multilingual embedding models this
/// pipeline targets; see [`ChunkerConfig`].
pub const DEFAULT_WINDOW_TOKENS: usize = 1024;

/// Default overlap between consecutive windows, in tokens.
pub const DEFAULT_OVERLAP_TOKENS: usize = 100;

/// Error raised for chunking misconfiguration.
///
/// Invalid window/overlap parameters are a caller bug: they are reported
/// once at construction time and never retried.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("invalid chunking configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl ChunkError {
    pub(crate) fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }
}

/// Configuration for the token-window chunker.
///
/// `window_tokens` must be positive and `overlap_tokens` strictly smaller
/// than `window_tokens`; [`WindowChunker::new`] rejects anything else with
/// [`ChunkError::InvalidConfiguration`].
///
/// Token counts here are whitespace tokens, not the embedding model's
/// subword tokens. A model that truncates at a smaller subword limit will
/// silently drop the tail of an oversized window, so deployments pairing
/// this chunker with a short-context model should shrink `window_tokens`
/// accordingly.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkerConfig {
    /// Size of each window in tokens.
    pub window_tokens: usize,
    /// Number of tokens shared between consecutive windows.
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            window_tokens: DEFAULT_WINDOW_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
        }
    }
}

impl ChunkerConfig {
    pub fn new(window_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            window_tokens,
            overlap_tokens,
        }
    }

    fn validate(&self) -> Result<(), ChunkError> {
        if self.window_tokens == 0 {
            return Err(ChunkError::invalid("window_tokens must be positive"));
        }
        if self.overlap_tokens >= self.window_tokens {
            return Err(ChunkError::invalid(format!(
                "overlap_tokens ({}) must be smaller than window_tokens ({})",
                self.overlap_tokens, self.window_tokens
            )));
        }
        Ok(())
    }
}

/// One token window of a source text.
///
/// Windows of one text are totally ordered by `sequence` and never overlap
/// in sequence-space, even though their `byte_range`s overlap by
/// construction. The final window may be shorter than the configured size;
/// it is never padded and never dropped.
#[derive(Debug, Clone, Serialize)]
pub struct TokenWindow {
    /// Zero-based position of this window in the sequence.
    pub sequence: usize,
    /// Index of the first token in this window.
    pub start_token: usize,
    /// Number of tokens in this window.
    pub token_count: usize,
    /// Byte range this window occupies in the source text.
    pub byte_range: Range<usize>,
    /// The window's text, sliced from the source.
    pub text: String,
}

/// Splits text into overlapping token windows.
///
/// Construction validates the configuration once; [`windows`](Self::windows)
/// can then be called any number of times (the produced iterator is lazy,
/// finite, and a fresh one restarts from sequence 0).
#[derive(Debug, Clone)]
pub struct WindowChunker {
    config: ChunkerConfig,
}

impl WindowChunker {
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Produce the ordered window sequence for `text`.
    ///
    /// Input containing no tokens (empty or all-whitespace) yields an empty
    /// sequence. Windows advance by `window_tokens - overlap_tokens` and the
    /// iteration stops once a window reaches the final token.
    pub fn windows<'a>(&self, text: &'a str) -> TokenWindows<'a> {
        TokenWindows {
            text,
            spans: token_spans(text),
            window: self.config.window_tokens,
            stride: self.config.window_tokens - self.config.overlap_tokens,
            next_start: 0,
            done: false,
        }
    }
}

/// Lazy iterator over [`TokenWindow`]s. Created by [`WindowChunker::windows`].
pub struct TokenWindows<'a> {
    text: &'a str,
    spans: Vec<Range<usize>>,
    window: usize,
    stride: usize,
    next_start: usize,
    done: bool,
}

impl Iterator for TokenWindows<'_> {
    type Item = TokenWindow;

    fn next(&mut self) -> Option<TokenWindow> {
        if self.done || self.spans.is_empty() {
            return None;
        }

        let start = self.next_start;
        let end = (start + self.window).min(self.spans.len());
        let byte_start = self.spans[start].start;
        let byte_end = self.spans[end - 1].end;

        let window = TokenWindow {
            sequence: start / self.stride,
            start_token: start,
            token_count: end - start,
            byte_range: byte_start..byte_end,
            text: self.text[byte_start..byte_end].to_string(),
        };

        if end == self.spans.len() {
            self.done = true;
        } else {
            self.next_start = start + self.stride;
        }

        Some(window)
    }
}

/// Count whitespace tokens in `text`.
///
/// Shared with the answer-assembly context budget so both sides of the
/// pipeline measure text in the same unit.
pub fn count_tokens(text: &str) -> usize {
    token_regex().find_iter(text).count()
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\S+").expect("static token pattern"))
}

// Token spans tile the text: each span runs from its token's first byte to
// the next token's first byte (the last extends to the end of the text, the
// first absorbs leading whitespace).
fn token_spans(text: &str) -> Vec<Range<usize>> {
    let marks: Vec<usize> = token_regex().find_iter(text).map(|m| m.start()).collect();

    marks
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let span_start = if i == 0 { 0 } else { start };
            let span_end = marks.get(i + 1).copied().unwrap_or(text.len());
            span_start..span_end
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_text(tokens: usize) -> String {
        (0..tokens)
            .map(|i| format!("tok{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn chunker(window: usize, overlap: usize) -> WindowChunker {
        WindowChunker::new(ChunkerConfig::new(window, overlap)).unwrap()
    }

    #[test]
    fn test_invalid_configurations() {
        assert!(matches!(
            WindowChunker::new(ChunkerConfig::new(0, 0)),
            Err(ChunkError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            WindowChunker::new(ChunkerConfig::new(100, 100)),
            Err(ChunkError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            WindowChunker::new(ChunkerConfig::new(100, 150)),
            Err(ChunkError::InvalidConfiguration { .. })
        ));
        assert!(WindowChunker::new(ChunkerConfig::default()).is_ok());
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        let chunker = chunker(8, 2);
        assert_eq!(chunker.windows("").count(), 0);
        assert_eq!(chunker.windows("   \n\t  ").count(), 0);
    }

    #[test]
    fn test_single_short_window() {
        let chunker = chunker(1024, 100);
        let text = numbered_text(10);
        let windows: Vec<_> = chunker.windows(&text).collect();

        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].sequence, 0);
        assert_eq!(windows[0].start_token, 0);
        assert_eq!(windows[0].token_count, 10);
        assert_eq!(windows[0].text, text);
    }

    /// 2500 tokens at window=1024/overlap=100: three windows with sequence
    /// indices 0, 1, 2 and the second starting at token 924.
    #[test]
    fn test_default_geometry_over_2500_tokens() {
        let chunker = chunker(1024, 100);
        let text = numbered_text(2500);
        let windows: Vec<_> = chunker.windows(&text).collect();

        assert_eq!(windows.len(), 3);
        assert_eq!(
            windows.iter().map(|w| w.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(windows[0].start_token, 0);
        assert_eq!(windows[1].start_token, 924);
        assert_eq!(windows[2].start_token, 1848);
        assert_eq!(windows[0].token_count, 1024);
        assert_eq!(windows[1].token_count, 1024);
        // Last window holds the remainder, unpadded.
        assert_eq!(windows[2].token_count, 2500 - 1848);
        assert!(windows[1].text.starts_with("tok924"));
    }

    #[test]
    fn test_exact_window_boundary_emits_no_empty_tail() {
        let chunker = chunker(8, 2);
        let text = numbered_text(8);
        let windows: Vec<_> = chunker.windows(&text).collect();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].token_count, 8);
    }

    #[test]
    fn test_determinism_and_restartability() {
        let chunker = chunker(16, 4);
        let text = numbered_text(100);

        let first: Vec<_> = chunker.windows(&text).collect();
        let second: Vec<_> = chunker.windows(&text).collect();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.sequence, b.sequence);
            assert_eq!(a.start_token, b.start_token);
            assert_eq!(a.byte_range, b.byte_range);
            assert_eq!(a.text, b.text);
        }
    }

    #[test]
    fn test_non_overlapping_portions_reconstruct_input() {
        let chunker = chunker(16, 4);
        // Mixed whitespace so the byte spans are doing real work.
        let text = format!("  {}\n", numbered_text(100).replace("tok5 ", "tok5\n\t"));

        let windows: Vec<_> = chunker.windows(&text).collect();
        assert!(windows.len() > 1);

        let mut rebuilt = String::new();
        let mut covered = 0usize;
        for w in &windows {
            assert!(w.byte_range.start <= covered, "gap before window");
            rebuilt.push_str(&text[covered..w.byte_range.end]);
            covered = w.byte_range.end;
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_overlap_region_is_shared_text() {
        let chunker = chunker(10, 3);
        let text = numbered_text(30);
        let windows: Vec<_> = chunker.windows(&text).collect();

        for pair in windows.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert_eq!(prev.start_token + 7, next.start_token); // stride
            assert!(prev.byte_range.end > next.byte_range.start);
        }
    }

    #[test]
    fn test_count_tokens_matches_window_totals() {
        let text = " alpha\tbeta  gamma\ndelta ";
        assert_eq!(count_tokens(text), 4);
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("   "), 0);
    }
}
