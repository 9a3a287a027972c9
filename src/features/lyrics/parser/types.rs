//! Lyrics data types

use serde::{Deserialize, Serialize};

/// Text shown when a track has no usable lyrics
pub const PLACEHOLDER_TEXT: &str = "no lyrics available";

/// Duration of the placeholder line and of each line-timestamp entry
pub const DEFAULT_LINE_DURATION_MS: u64 = 5_000;

/// Lyrics format enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LyricsFormat {
    /// Line-level `[mm:ss.cc]text`
    LineTimestamp,
    /// Token-level `[start,duration](start,duration,0)text...`
    TokenLevel,
    /// Nothing parseable; the document holds the placeholder line
    Placeholder,
}

/// A single timed text fragment (word or syllable)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricToken {
    pub text: String,
    /// Start time in milliseconds
    pub start_ms: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl LyricToken {
    pub fn end_ms(&self) -> u64 {
        self.start_ms.saturating_add(self.duration_ms)
    }
}

/// A single line of lyrics
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricLine {
    pub start_ms: u64,
    pub duration_ms: u64,
    pub tokens: Vec<LyricToken>,
}

impl LyricLine {
    /// Line with one token spanning the whole line
    pub fn single(text: impl Into<String>, start_ms: u64, duration_ms: u64) -> Self {
        Self {
            start_ms,
            duration_ms,
            tokens: vec![LyricToken {
                text: text.into(),
                start_ms,
                duration_ms,
            }],
        }
    }

    /// Get the full line text by joining all tokens
    pub fn text(&self) -> String {
        self.tokens.iter().map(|t| t.text.as_str()).collect()
    }

    pub fn end_ms(&self) -> u64 {
        self.start_ms.saturating_add(self.duration_ms)
    }
}

/// Untimed annotation such as credits (`{"t":0,"c":[{"tx":"..."}]}`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataLine {
    /// Display time in milliseconds
    pub time_ms: u64,
    pub fragments: Vec<String>,
}

impl MetadataLine {
    pub fn text(&self) -> String {
        self.fragments.concat()
    }
}

/// Parsed lyrics for one track. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricDocument {
    pub format: LyricsFormat,
    /// Timed lines ordered by start time
    pub lines: Vec<LyricLine>,
    pub metadata: Vec<MetadataLine>,
}

impl LyricDocument {
    /// Single "no lyrics" line spanning the default duration
    pub fn placeholder() -> Self {
        Self {
            format: LyricsFormat::Placeholder,
            lines: vec![LyricLine::single(
                PLACEHOLDER_TEXT,
                0,
                DEFAULT_LINE_DURATION_MS,
            )],
            metadata: Vec::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.format == LyricsFormat::Placeholder
    }

    pub fn line_text(&self, index: usize) -> Option<String> {
        self.lines.get(index).map(LyricLine::text)
    }
}

impl Default for LyricDocument {
    fn default() -> Self {
        Self::placeholder()
    }
}
