//! Expiry tracking on a wrapping 32-bit millisecond clock.
//!
//! Deadlines live in one of two ordered buckets. `current` holds deadlines
//! reached before the tick counter next wraps; `next` holds deadlines that
//! land after the wrap. When [`TimeBuckets::observe`] sees the counter move
//! from the upper half of its range back into the lower half, everything left
//! in `current` is overdue and `next` takes its place.
//!
//! This only works if the counter is sampled at least once while in the upper
//! half, and if no timeout spans more than half the range. Both are guaranteed
//! by clamping timeouts and wait delays to [`MAX_DELAY`].

use std::collections::BTreeSet;

/// Longest timeout and longest gap between samples, a quarter of the range.
pub const MAX_DELAY: u32 = u32::MAX / 4;

const UPPER_HALF: u32 = 1 << 31;

/// A pair of deadline-ordered sets of keys.
#[derive(Debug)]
pub struct TimeBuckets<K> {
    current: BTreeSet<(u32, K)>,
    next: BTreeSet<(u32, K)>,
    upper_half: bool,
}

impl<K: Ord + Copy> TimeBuckets<K> {
    /// Empty buckets, with `now` as the first sample.
    pub fn new(now: u32) -> Self {
        Self {
            current: BTreeSet::new(),
            next: BTreeSet::new(),
            upper_half: now >= UPPER_HALF,
        }
    }

    /// Record a tick sample, returning keys retired by a wraparound.
    pub fn observe(&mut self, now: u32) -> Vec<K> {
        let upper = now >= UPPER_HALF;
        let wrapped = self.upper_half && !upper;
        self.upper_half = upper;
        if !wrapped {
            return Vec::new();
        }

        let retired = std::mem::take(&mut self.current);
        std::mem::swap(&mut self.current, &mut self.next);
        retired.into_iter().map(|(_, key)| key).collect()
    }

    /// Track `key` until `now + timeout` and return that deadline.
    ///
    /// `now` must be the latest value passed to [`observe`](Self::observe).
    pub fn insert(&mut self, now: u32, timeout: u32, key: K) -> u32 {
        let expiry = now.wrapping_add(timeout.min(MAX_DELAY));
        if expiry >= now {
            self.current.insert((expiry, key));
        } else {
            self.next.insert((expiry, key));
        }
        expiry
    }

    /// Stop tracking `key`. Returns false if it was not present.
    pub fn remove(&mut self, expiry: u32, key: K) -> bool {
        self.current.remove(&(expiry, key)) || self.next.remove(&(expiry, key))
    }

    /// Remove and return every key whose deadline is at or before `now`, in
    /// deadline order.
    pub fn expired(&mut self, now: u32) -> Vec<K> {
        let mut expired = Vec::new();
        while let Some(&(expiry, key)) = self.current.first() {
            if expiry > now {
                break;
            }
            self.current.pop_first();
            expired.push(key);
        }
        expired
    }

    /// Milliseconds until the worker must sample the clock again.
    pub fn next_delay(&self, now: u32) -> u32 {
        let delay = match self.current.first() {
            Some(&(expiry, _)) => expiry.saturating_sub(now),
            // Wake at the wrap so `next` can be promoted.
            None if !self.next.is_empty() => 0u32.wrapping_sub(now),
            None => MAX_DELAY,
        };
        delay.min(MAX_DELAY)
    }

    pub fn len(&self) -> usize {
        self.current.len() + self.next.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.next.is_empty()
    }
}
