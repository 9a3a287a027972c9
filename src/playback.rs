//! Playback orchestration
//!
//! `PlaybackSession` owns every piece of playback state and mutates it
//! synchronously. `Player` is the async driver around it: it runs resolution
//! work off the session, feeds results back, and ticks the lyric timeline.

mod events;
mod library;
mod media;
mod navigator;
mod player;
mod resolver;
mod session;
mod shuffle;
mod sync_bridge;

pub use events::{
    EventReceiver, EventSender, NowPlaying, PlaylistEvent, SessionEvent, SessionState,
};
pub use library::{DEFAULT_PLAYLIST_NAME, Library, LibraryError};
pub use media::{MediaElement, MediaError, MediaEvent, SimulatedMedia};
pub use navigator::{Advance, QueueNavigator};
pub use player::{Player, PlayerCommand, PlayerHandle};
pub use resolver::{Resolution, ResolveError, ResolveRequest, Resolver, RetryPolicy};
pub use session::{Completion, PlaybackSession, SessionError};
pub use shuffle::ShuffleBag;
pub use sync_bridge::{
    DriftCorrection, OverlayCommand, OverlaySender, OverlaySnapshot, SyncBridge, TransportState,
};
