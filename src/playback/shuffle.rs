//! Shuffle bag - non-repeating random draw order
//!
//! Serves a Fisher–Yates permutation of `[0, n)` one index at a time and
//! regenerates it when exhausted. A regenerated bag never opens with the index
//! that closed the previous one.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct ShuffleBag {
    order: Vec<usize>,
    cursor: usize,
    last_served: Option<usize>,
    rng: StdRng,
}

impl Default for ShuffleBag {
    fn default() -> Self {
        Self::new()
    }
}

impl ShuffleBag {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// Bag whose first draw never serves `current`
    pub fn after(current: usize) -> Self {
        let mut bag = Self::new();
        bag.last_served = Some(current);
        bag
    }

    /// Deterministic bag for reproducible orders
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            order: Vec::new(),
            cursor: 0,
            last_served: None,
            rng,
        }
    }

    /// Next index in `[0, n)`, or `None` when `n == 0`
    pub fn draw(&mut self, n: usize) -> Option<usize> {
        match n {
            0 => None,
            1 => {
                self.last_served = Some(0);
                Some(0)
            }
            _ => {
                if self.order.len() != n || self.cursor >= self.order.len() {
                    self.regenerate(n);
                }
                let index = self.order[self.cursor];
                self.cursor += 1;
                self.last_served = Some(index);
                Some(index)
            }
        }
    }

    /// Indices left before the bag regenerates
    pub fn remaining(&self) -> usize {
        self.order.len() - self.cursor
    }

    /// Track an index that was picked outside the bag. Unless the bag just
    /// served it, the permutation restarts with `index` held off the front.
    pub fn follow(&mut self, index: usize) {
        if self.last_served != Some(index) {
            self.last_served = Some(index);
            self.order.clear();
            self.cursor = 0;
        }
    }

    fn regenerate(&mut self, n: usize) {
        // Shuffle everything except the last served index, then place it
        // anywhere but the front.
        let held = self.last_served.filter(|&i| i < n);
        let mut order: Vec<usize> = (0..n).filter(|&i| Some(i) != held).collect();
        order.shuffle(&mut self.rng);

        if let Some(held) = held {
            let slot = self.rng.random_range(1..=order.len());
            order.insert(slot, held);
        }

        tracing::debug!("Shuffle bag regenerated for {} tracks", n);
        self.order = order;
        self.cursor = 0;
    }
}
