//! Log targets used by this crate.
//!
//! Horizon Wire instruments with the `tracing` crate and never installs a
//! subscriber itself. Filter on these targets to isolate a subsystem:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_wire_io::wait_set=trace")
//!     .init();
//! ```

/// Target names for log filtering.
pub mod targets {
    /// Crate-wide target.
    pub const IO: &str = "horizon_wire_io";
    /// Wait set registration and polling.
    pub const WAIT_SET: &str = "horizon_wire_io::wait_set";
    /// Socket lifecycle.
    pub const SOCKET: &str = "horizon_wire_io::socket";
    /// Cross-thread wake channel.
    pub const NOTIFY: &str = "horizon_wire_io::notify";
}
