//! The capability shared by everything a [`WaitSet`](crate::WaitSet) can watch.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::sys::RawHandle;

/// Readiness reported for a waitable by the last wait that included it.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Readiness(u8);

impl Readiness {
    /// Nothing reported.
    pub const NOT_READY: Self = Self(0);
    /// Data (or a pending connection, or end of stream) can be read.
    pub const READ: Self = Self(0b001);
    /// Data can be written, or a connect finished.
    pub const WRITE: Self = Self(0b010);
    /// The native facility reported an error condition.
    pub const ERROR: Self = Self(0b100);

    const ALL: u8 = 0b111;

    /// Rebuild from [`bits`](Self::bits), dropping unknown bits.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL)
    }

    /// Raw flag bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_readable(self) -> bool {
        self.contains(Self::READ)
    }

    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITE)
    }

    pub const fn is_error(self) -> bool {
        self.contains(Self::ERROR)
    }
}

impl BitOr for Readiness {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Readiness {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NOT_READY");
        }
        let mut first = true;
        for (flag, name) in [(Self::READ, "READ"), (Self::WRITE, "WRITE"), (Self::ERROR, "ERROR")] {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// The events a registration asks the native facility to watch for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    /// Watch for readability.
    pub const READ: Self = Self(0b01);
    /// Watch for writability.
    pub const WRITE: Self = Self(0b10);
    /// Watch for both.
    pub const BOTH: Self = Self(0b11);

    pub const fn is_readable(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    /// Combine with another interest.
    pub const fn add(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Remove `other`, returning `None` if nothing would be left.
    pub const fn remove(self, other: Self) -> Option<Self> {
        let bits = self.0 & !other.0;
        if bits == 0 { None } else { Some(Self(bits)) }
    }

    /// The readiness flags this interest can produce, plus [`Readiness::ERROR`].
    pub(crate) const fn reportable(self) -> Readiness {
        let mut bits = Readiness::ERROR.0;
        if self.is_readable() {
            bits |= Readiness::READ.0;
        }
        if self.is_writable() {
            bits |= Readiness::WRITE.0;
        }
        Readiness(bits)
    }
}

impl BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.add(rhs)
    }
}

/// Per-object state the wait set updates.
///
/// Shared between the owning object and the wait set it is registered with,
/// so a wait can publish readiness without borrowing the object.
#[derive(Debug, Default)]
pub struct WaitState {
    flags: AtomicU8,
    registered: AtomicBool,
    user_data: AtomicUsize,
}

impl WaitState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Flags published by the last wait that reported this object.
    pub fn readiness(&self) -> Readiness {
        Readiness::from_bits(self.flags.load(Ordering::Acquire))
    }

    pub(crate) fn set_readiness(&self, readiness: Readiness) {
        self.flags.store(readiness.bits(), Ordering::Release);
    }

    pub(crate) fn clear_readiness(&self) {
        self.flags.store(0, Ordering::Release);
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Claim the registered bit; `false` if it was already set.
    pub(crate) fn try_register(&self) -> bool {
        self.registered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn unregister(&self) {
        self.registered.store(false, Ordering::Release);
    }

    pub fn user_data(&self) -> usize {
        self.user_data.load(Ordering::Relaxed)
    }

    pub fn set_user_data(&self, value: usize) {
        self.user_data.store(value, Ordering::Relaxed);
    }
}

/// An object that exposes a native handle and can be registered with a
/// [`WaitSet`](crate::WaitSet).
///
/// An object belongs to at most one wait set at a time, and must be removed
/// from it before its handle is closed. Readiness is only meaningful after a
/// wait reported the object as triggered; waits never touch the flags of
/// objects they did not report.
pub trait Waitable {
    /// The native descriptor or socket handle.
    fn raw_handle(&self) -> RawHandle;

    /// The shared state the wait set publishes into.
    fn wait_state(&self) -> &Arc<WaitState>;

    /// Flags from the last wait that reported this object.
    fn readiness(&self) -> Readiness {
        self.wait_state().readiness()
    }

    /// Whether the object currently belongs to a wait set.
    fn is_registered(&self) -> bool {
        self.wait_state().is_registered()
    }

    /// Opaque value the owner may attach.
    fn user_data(&self) -> usize {
        self.wait_state().user_data()
    }

    fn set_user_data(&self, value: usize) {
        self.wait_state().set_user_data(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_flags() {
        let both = Readiness::READ | Readiness::WRITE;
        assert!(both.is_readable());
        assert!(both.is_writable());
        assert!(!both.is_error());
        assert!(Readiness::NOT_READY.is_empty());
        assert_eq!(format!("{both:?}"), "READ | WRITE");
        assert_eq!(format!("{:?}", Readiness::NOT_READY), "NOT_READY");
    }

    #[test]
    fn test_interest_add_remove() {
        let interest = Interest::READ.add(Interest::WRITE);
        assert_eq!(interest, Interest::BOTH);
        assert_eq!(interest.remove(Interest::WRITE), Some(Interest::READ));
        assert_eq!(Interest::READ.remove(Interest::READ), None);
        assert!(Interest::READ.reportable().is_error());
        assert!(!Interest::READ.reportable().is_writable());
    }

    #[test]
    fn test_register_bit_is_exclusive() {
        let state = WaitState::new();
        assert!(state.try_register());
        assert!(!state.try_register());
        state.unregister();
        assert!(!state.is_registered());
    }
}
