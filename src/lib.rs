//! Rhapsode - playback orchestration for a streaming playlist player
//!
//! Resolves expiring stream URLs with caching and fallback, keeps a
//! background video in step with the audio clock, and drives a time-synced
//! lyric timeline from the same clock.

pub mod api;
pub mod cache;
pub mod database;
pub mod features;
pub mod playback;
pub mod utils;
