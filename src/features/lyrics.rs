//! Lyrics module - parsing and timing
//!
//! - `parser`: line-timestamp and token-level lyric text into a `LyricDocument`
//! - `timeline`: displayed state of a document at a given playback time

pub mod parser;
pub mod timeline;

// Re-export commonly used items
pub use parser::*;
pub use timeline::{
    LineLayout, LineSlot, LineState, TimelineState, TokenPhase, compute_state,
    current_and_next_text,
};
