//! Lyrics parsing module
//!
//! Supports the two formats delivered by the content provider:
//! - Line-timestamp: `[mm:ss.cc]text`
//! - Token-level: `[start,duration](start,duration,0)text...` with `{...}` annotations
//!
//! Parsing never fails. Malformed entries are dropped one by one and a
//! document with no timed lines degrades to the placeholder.

mod lrc;
mod types;
mod yrc;

pub use types::*;

use once_cell::sync::Lazy;
use regex::Regex;

static LINE_TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\d{2}:\d{2}\.\d{2,3}\]").unwrap());

/// Detect lyrics format from content
///
/// Any line carrying a leading `[mm:ss.cc]` marker selects the line-timestamp
/// format; otherwise token-level parsing is attempted.
pub fn detect_format(content: &str) -> LyricsFormat {
    if content.trim().is_empty() {
        return LyricsFormat::Placeholder;
    }

    if content
        .lines()
        .any(|line| LINE_TIMESTAMP.is_match(line.trim_start()))
    {
        LyricsFormat::LineTimestamp
    } else {
        LyricsFormat::TokenLevel
    }
}

/// Parse lyrics with the default line duration
pub fn parse_lyrics(content: Option<&str>) -> LyricDocument {
    parse_lyrics_with_duration(content, DEFAULT_LINE_DURATION_MS)
}

/// Parse lyrics, giving line-timestamp entries `line_duration_ms` each
pub fn parse_lyrics_with_duration(content: Option<&str>, line_duration_ms: u64) -> LyricDocument {
    let Some(content) = content else {
        return LyricDocument::placeholder();
    };

    let format = detect_format(content);
    let (lines, metadata) = match format {
        LyricsFormat::LineTimestamp => (lrc::parse_lrc(content, line_duration_ms), Vec::new()),
        LyricsFormat::TokenLevel => yrc::parse_yrc(content),
        LyricsFormat::Placeholder => return LyricDocument::placeholder(),
    };

    if lines.is_empty() {
        tracing::debug!("No timed lyric lines in {:?} content, using placeholder", format);
        return LyricDocument {
            metadata,
            ..LyricDocument::placeholder()
        };
    }

    tracing::debug!(
        "Parsed {} lyric lines ({} annotations) as {:?}",
        lines.len(),
        metadata.len(),
        format
    );

    LyricDocument {
        format,
        lines,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_line_timestamp() {
        let content = "[00:01.12]First line\n[00:05.00]Second line";
        assert_eq!(detect_format(content), LyricsFormat::LineTimestamp);
    }

    #[test]
    fn test_detect_scans_all_lines() {
        let content = "{\"t\":0,\"c\":[]}\n[ti:Title]\n[00:05.00]Late marker";
        assert_eq!(detect_format(content), LyricsFormat::LineTimestamp);
    }

    #[test]
    fn test_detect_token_level() {
        let content = "[0,1000](0,500,0)Hello(500,500,0)World";
        assert_eq!(detect_format(content), LyricsFormat::TokenLevel);
    }

    #[test]
    fn test_absent_and_empty_input_yield_placeholder() {
        for doc in [parse_lyrics(None), parse_lyrics(Some("")), parse_lyrics(Some("  \n"))] {
            assert!(doc.is_placeholder());
            assert_eq!(doc.lines.len(), 1);
            assert_eq!(doc.lines[0].text(), PLACEHOLDER_TEXT);
            assert_eq!(doc.lines[0].duration_ms, 5000);
        }
    }

    #[test]
    fn test_garbage_degrades_to_placeholder() {
        let doc = parse_lyrics(Some("just some words\n(not timed)"));
        assert!(doc.is_placeholder());
    }

    #[test]
    fn test_parse_line_timestamp_document() {
        let doc = parse_lyrics(Some("[00:01.00]One\n[00:03.50]Two"));
        assert_eq!(doc.format, LyricsFormat::LineTimestamp);
        assert_eq!(doc.lines.len(), 2);
        assert_eq!(doc.lines[1].start_ms, 3500);
        assert_eq!(doc.lines[1].tokens[0].duration_ms, DEFAULT_LINE_DURATION_MS);
    }

    #[test]
    fn test_custom_line_duration() {
        let doc = parse_lyrics_with_duration(Some("[00:01.00]One"), 3000);
        assert_eq!(doc.lines[0].duration_ms, 3000);
    }
}
