//! Token-level format parser
//!
//! Format: `[start,duration](token_start,token_duration,0)text(token_start,token_duration,0)text...`
//! Lines starting with `{` are JSON annotations: `{"t":0,"c":[{"tx":"credit"}]}`.

use serde::Deserialize;
use tracing::debug;

use super::types::{LyricLine, LyricToken, MetadataLine};

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(default)]
    t: u64,
    #[serde(default)]
    c: Vec<RawFragment>,
}

#[derive(Deserialize)]
struct RawFragment {
    #[serde(default)]
    tx: String,
}

/// Parse line timestamp: [start_time,duration]
fn parse_line_time(src: &str) -> Option<(usize, u64, u64)> {
    if !src.starts_with('[') {
        return None;
    }

    let end_bracket = src.find(']')?;
    let (start, duration) = src[1..end_bracket].split_once(',')?;

    Some((
        end_bracket + 1,
        start.trim().parse().ok()?,
        duration.trim().parse().ok()?,
    ))
}

/// Parse token timestamp: (start_time,duration,flag)
fn parse_token_time(src: &str) -> Option<(usize, u64, u64)> {
    if !src.starts_with('(') {
        return None;
    }

    let end_paren = src.find(')')?;
    let parts: Vec<&str> = src[1..end_paren].split(',').collect();

    if parts.len() != 3 {
        return None;
    }

    let start_time: u64 = parts[0].parse().ok()?;
    let duration: u64 = parts[1].parse().ok()?;
    // third field is unused but must be numeric
    parts[2].parse::<u64>().ok()?;

    Some((end_paren + 1, start_time, duration))
}

/// Parse tokens from the part of a line after its timestamp
fn parse_tokens(src: &str) -> Vec<LyricToken> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < src.len() {
        if let Some((consumed, start_ms, duration_ms)) = parse_token_time(&src[pos..]) {
            pos += consumed;

            // Token text runs until the next '(' or end of line
            let text_end = src[pos..].find('(').map(|i| pos + i).unwrap_or(src.len());
            let text = &src[pos..text_end];

            if !text.is_empty() {
                tokens.push(LyricToken {
                    text: text.to_string(),
                    start_ms,
                    duration_ms,
                });
            }

            pos = text_end;
        } else {
            // Skip one character, staying on a char boundary
            pos += src[pos..].chars().next().map(char::len_utf8).unwrap_or(1);
        }
    }

    tokens
}

/// Parse a single timed line
fn parse_line(line: &str) -> Option<LyricLine> {
    let (consumed, start_ms, duration_ms) = parse_line_time(line)?;
    let tokens = parse_tokens(&line[consumed..]);

    if tokens.is_empty() {
        return None;
    }

    Some(LyricLine {
        start_ms,
        duration_ms,
        tokens,
    })
}

/// Parse an annotation line
fn parse_metadata(line: &str) -> Option<MetadataLine> {
    match serde_json::from_str::<RawMetadata>(line) {
        Ok(raw) => Some(MetadataLine {
            time_ms: raw.t,
            fragments: raw.c.into_iter().map(|f| f.tx).collect(),
        }),
        Err(e) => {
            debug!("Dropping malformed lyric annotation: {}", e);
            None
        }
    }
}

/// Parse token-level content into timed lines and annotations
pub fn parse_yrc(src: &str) -> (Vec<LyricLine>, Vec<MetadataLine>) {
    let mut lines = Vec::new();
    let mut metadata = Vec::new();

    for line in src.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('{') {
            metadata.extend(parse_metadata(line));
        } else if line.starts_with('[') {
            lines.extend(parse_line(line));
        }
    }

    lines.sort_by_key(|l| l.start_ms);
    (lines, metadata)
}
