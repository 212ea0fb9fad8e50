//! Millisecond tick sources.
//!
//! Request deadlines are tracked as 32-bit millisecond ticks that wrap about
//! every 49.7 days. [`TimeBuckets`](crate::buckets::TimeBuckets) copes with
//! the wraparound as long as the worker samples the tick often enough.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// A monotonic, wrapping millisecond counter.
pub trait TickSource: fmt::Debug + Send + Sync + 'static {
    fn now(&self) -> u32;
}

/// Milliseconds since the source was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemTicks {
    origin: Instant,
}

impl SystemTicks {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for SystemTicks {
    fn now(&self) -> u32 {
        // Truncation is the wraparound.
        self.origin.elapsed().as_millis() as u32
    }
}

/// A tick counter advanced by hand, for driving timeouts in tests.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualTicks {
    ticks: Arc<AtomicU32>,
}

impl ManualTicks {
    pub fn new(start: u32) -> Self {
        Self {
            ticks: Arc::new(AtomicU32::new(start)),
        }
    }

    pub fn set(&self, ticks: u32) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }

    /// Move the counter forward, wrapping past `u32::MAX`.
    pub fn advance(&self, millis: u32) {
        self.ticks.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TickSource for ManualTicks {
    fn now(&self) -> u32 {
        self.ticks.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_ticks_wrap() {
        let ticks = ManualTicks::new(u32::MAX - 5);
        let shared = ticks.clone();
        shared.advance(10);
        assert_eq!(ticks.now(), 4);
        ticks.set(100);
        assert_eq!(shared.now(), 100);
    }

    #[test]
    fn test_system_ticks_advance() {
        let ticks = SystemTicks::new();
        let first = ticks.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(ticks.now().wrapping_sub(first) >= 5);
    }
}
