//! Line-timestamp format parser
//!
//! `[mm:ss.cc]text`, one line per timestamp. Several timestamps in front of
//! the same text produce several lines.

use super::types::LyricLine;

/// Parse timestamp: [mm:ss.cc] or [mm:ss.ccc]
fn parse_time(src: &str) -> Option<(usize, u64)> {
    if !src.starts_with('[') {
        return None;
    }

    let end_bracket = src.find(']')?;
    let time_str = &src[1..end_bracket];

    let (min_str, rest) = time_str.split_once(':')?;
    let (sec_str, frac_str) = rest.split_once('.')?;

    if min_str.len() != 2 || sec_str.len() != 2 {
        return None;
    }

    let min: u64 = min_str.parse().ok()?;
    let sec: u64 = sec_str.parse().ok()?;
    let mut frac: u64 = frac_str.parse().ok()?;

    // Centiseconds vs milliseconds
    match frac_str.len() {
        2 => frac *= 10,
        3 => {}
        _ => return None,
    }

    Some((end_bracket + 1, min * 60 * 1000 + sec * 1000 + frac))
}

/// Parse a single line, which may carry multiple timestamps
fn parse_line(line: &str, line_duration_ms: u64) -> Vec<LyricLine> {
    let line = line.trim();
    let mut timestamps = Vec::new();
    let mut pos = 0;

    while pos < line.len() {
        match parse_time(&line[pos..]) {
            Some((consumed, time)) => {
                timestamps.push(time);
                pos += consumed;
            }
            None => break,
        }
    }

    let text = line[pos..].trim();
    timestamps
        .into_iter()
        .map(|start| LyricLine::single(text, start, line_duration_ms))
        .collect()
}

/// Parse line-timestamp content into lyric lines
pub fn parse_lrc(src: &str, line_duration_ms: u64) -> Vec<LyricLine> {
    let mut result: Vec<LyricLine> = src
        .lines()
        .filter(|line| !line.trim().is_empty())
        .flat_map(|line| parse_line(line, line_duration_ms))
        .collect();

    result.sort_by_key(|line| line.start_ms);
    result
}
