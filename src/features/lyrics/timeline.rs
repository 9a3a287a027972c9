//! Lyric timeline - displayed lyric state as a pure function of time
//!
//! `compute_state(document, time_ms)` classifies every token, picks the active
//! line and lays out its neighbours. Nothing is carried between calls, so the
//! result after a seek is exactly what a fresh call at that time returns.

use serde::Serialize;

use super::parser::LyricDocument;

/// Lines shown on each side of the centred line
pub const VISIBLE_NEIGHBOURS: usize = 3;

/// Vertical offsets for neighbours at distance 1, 2, 3 (logical px)
const NEIGHBOUR_OFFSETS_PX: [f32; VISIBLE_NEIGHBOURS] = [60.0, 110.0, 160.0];

/// Reveal delays for neighbours at distance 1, 2, 3
const NEIGHBOUR_DELAYS_MS: [u32; VISIBLE_NEIGHBOURS] = [50, 100, 150];

/// Parking offset and delay for hidden lines
const DISTANT_OFFSET_PX: f32 = 200.0;
const DISTANT_DELAY_MS: u32 = 200;

/// Playback phase of a single token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPhase {
    /// `time < start`
    Future,
    /// `start <= time <= start + duration`
    Active,
    /// `time > start + duration`
    Completed,
}

impl TokenPhase {
    pub fn at(start_ms: u64, duration_ms: u64, time_ms: u64) -> Self {
        if time_ms < start_ms {
            TokenPhase::Future
        } else if time_ms <= start_ms.saturating_add(duration_ms) {
            TokenPhase::Active
        } else {
            TokenPhase::Completed
        }
    }
}

/// Position of a line relative to the centred one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LineSlot {
    Center,
    /// 1..=3 lines above the centre
    Before(u8),
    /// 1..=3 lines below the centre
    After(u8),
    /// Outside the visible window
    Distant,
}

/// Layout of one line
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineLayout {
    pub slot: LineSlot,
    /// Vertical offset from the centre; negative is above
    pub offset_px: f32,
    /// Delay before the line moves to its offset
    pub reveal_delay_ms: u32,
    pub visible: bool,
}

impl LineLayout {
    /// Layout for a line `index` when `anchor` is centred
    fn relative_to(index: usize, anchor: usize) -> Self {
        let distance = index.abs_diff(anchor);
        let above = index < anchor;
        let sign = if above { -1.0 } else { 1.0 };

        if distance == 0 {
            return Self {
                slot: LineSlot::Center,
                offset_px: 0.0,
                reveal_delay_ms: 0,
                visible: true,
            };
        }

        if distance <= VISIBLE_NEIGHBOURS {
            let step = distance as u8;
            return Self {
                slot: if above {
                    LineSlot::Before(step)
                } else {
                    LineSlot::After(step)
                },
                offset_px: sign * NEIGHBOUR_OFFSETS_PX[distance - 1],
                reveal_delay_ms: NEIGHBOUR_DELAYS_MS[distance - 1],
                visible: true,
            };
        }

        Self {
            slot: LineSlot::Distant,
            offset_px: sign * DISTANT_OFFSET_PX,
            reveal_delay_ms: DISTANT_DELAY_MS,
            visible: false,
        }
    }
}

/// Derived state of one line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineState {
    pub tokens: Vec<TokenPhase>,
    /// Any token is active
    pub active: bool,
    /// Every token has completed
    pub completed: bool,
    pub layout: LineLayout,
}

/// Everything the renderer needs for one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineState {
    pub time_ms: u64,
    /// Line with an active token (the last such line if several overlap)
    pub active_line: Option<usize>,
    /// Line placed at the centre: the active line, otherwise the latest line
    /// that has started, otherwise the first line
    pub anchor_line: Option<usize>,
    pub lines: Vec<LineState>,
}

impl TimelineState {
    /// Line following the anchor, if any
    pub fn next_line(&self) -> Option<usize> {
        self.anchor_line
            .map(|i| i + 1)
            .filter(|&i| i < self.lines.len())
    }
}

/// Compute the displayed lyric state at `time_ms`
pub fn compute_state(document: &LyricDocument, time_ms: u64) -> TimelineState {
    let mut active_line = None;
    let mut latest_started = None;

    let phases: Vec<Vec<TokenPhase>> = document
        .lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            let tokens: Vec<TokenPhase> = line
                .tokens
                .iter()
                .map(|t| TokenPhase::at(t.start_ms, t.duration_ms, time_ms))
                .collect();

            if tokens.contains(&TokenPhase::Active) {
                active_line = Some(index);
            }
            if line.start_ms <= time_ms {
                latest_started = Some(index);
            }
            tokens
        })
        .collect();

    let anchor_line = active_line
        .or(latest_started)
        .or(if document.lines.is_empty() { None } else { Some(0) });

    let lines = phases
        .into_iter()
        .enumerate()
        .map(|(index, tokens)| {
            let active = tokens.contains(&TokenPhase::Active);
            let completed = !tokens.is_empty() && tokens.iter().all(|p| *p == TokenPhase::Completed);
            let layout = match anchor_line {
                Some(anchor) => LineLayout::relative_to(index, anchor),
                None => LineLayout::relative_to(index, usize::MAX),
            };
            LineState {
                tokens,
                active,
                completed,
                layout,
            }
        })
        .collect();

    TimelineState {
        time_ms,
        active_line,
        anchor_line,
        lines,
    }
}

/// Text of the centred line and the one after it
pub fn current_and_next_text(
    document: &LyricDocument,
    state: &TimelineState,
) -> (Option<String>, Option<String>) {
    let current = state.anchor_line.and_then(|i| document.line_text(i));
    let next = state.next_line().and_then(|i| document.line_text(i));
    (current, next)
}
