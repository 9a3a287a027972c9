//! Feature modules - business logic separated from the player driver
//!
//! Each feature module contains the core logic for a specific functionality.

pub mod lyrics;
pub mod settings;

pub use settings::{PlayMode, Settings};
