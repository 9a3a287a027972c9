//! Queue navigation - index calculations for every play mode
//!
//! All code that needs to know which track comes next or previous goes
//! through `QueueNavigator`.

use super::shuffle::ShuffleBag;
use crate::features::PlayMode;

/// Why the session is moving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The current track finished on its own
    TrackEnded,
    /// Transport "next" button
    UserNext,
    /// Transport "previous" button
    UserPrev,
}

/// Computes the target index for an advance
pub struct QueueNavigator<'a> {
    queue_len: usize,
    current_idx: Option<usize>,
    play_mode: PlayMode,
    shuffle_bag: Option<&'a mut ShuffleBag>,
}

impl<'a> QueueNavigator<'a> {
    pub fn new(
        queue_len: usize,
        current_idx: Option<usize>,
        play_mode: PlayMode,
        shuffle_bag: Option<&'a mut ShuffleBag>,
    ) -> Self {
        Self {
            queue_len,
            current_idx,
            play_mode,
            shuffle_bag,
        }
    }

    /// Target index, or `None` for an empty queue
    pub fn target(&mut self, advance: Advance) -> Option<usize> {
        let len = self.queue_len;
        if len == 0 {
            return None;
        }

        let Some(current) = self.current_idx.filter(|&i| i < len) else {
            return Some(0);
        };

        match (self.play_mode, advance) {
            (PlayMode::Shuffle, _) => match self.shuffle_bag.as_deref_mut() {
                Some(bag) => bag.draw(len),
                None => ShuffleBag::after(current).draw(len),
            },
            (PlayMode::RepeatOne, Advance::TrackEnded) => Some(current),
            (_, Advance::TrackEnded | Advance::UserNext) => Some((current + 1) % len),
            (_, Advance::UserPrev) => Some((current + len - 1) % len),
        }
    }
}
