//! Persistent storage for playlists and session state
//! Uses a JSON key/value document for playlists, resume positions and play mode

mod models;
mod store;

pub use models::*;
pub use store::{JsonFileStore, MemoryStore, StateStore, StoreError, load, save};
