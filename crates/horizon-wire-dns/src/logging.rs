//! Log targets used by this crate.
//!
//! Like `horizon-wire-io`, this crate only emits `tracing` events; installing
//! a subscriber is up to the application.

/// Target names for log filtering.
pub mod targets {
    /// Submission, cancellation and service lifecycle.
    pub const RESOLVER: &str = "horizon_wire_dns::resolver";
    /// The lookup worker thread.
    pub const WORKER: &str = "horizon_wire_dns::worker";
    /// DNS server discovery.
    pub const CONFIG: &str = "horizon_wire_dns::config";
}
