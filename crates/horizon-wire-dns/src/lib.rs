//! Asynchronous DNS address lookups for Horizon Wire.
//!
//! Lookups run on a dedicated worker thread that speaks DNS over UDP
//! directly: it sends A/AAAA queries, matches replies by transaction id and
//! question, and enforces a per-lookup timeout. Callers submit work through a
//! [`HostNameResolver`] handle and get exactly one callback per lookup.
//!
//! ```no_run
//! use horizon_wire_dns::{HostNameResolver, ResolveStatus};
//!
//! let resolver = HostNameResolver::new();
//! match resolver.resolve_blocking("example.com", 2_000, None)? {
//!     ResolveStatus::Resolved(host) => println!("{}", host.address),
//!     status => println!("{status}"),
//! }
//! # Ok::<(), horizon_wire_dns::ResolveError>(())
//! ```
//!
//! # Lookup policy
//!
//! Each lookup first asks for an AAAA record. If the server answers NXDOMAIN
//! the same name is queried once more for an A record. Replies whose question
//! does not match the request are ignored. There is no caching and no
//! retransmission; a lookup that sees no usable reply before its deadline
//! completes with [`ResolveStatus::Timeout`].
//!
//! # Threading
//!
//! The worker starts on the first submission and exits when nothing is left
//! to do. Callbacks run on the worker thread, one at a time, and must not
//! block for long. [`HostNameResolver::cancel`] is safe to call from any
//! thread; if the callback is already running elsewhere it waits for it.

pub mod buckets;
pub mod config;
pub mod error;
pub mod logging;
pub mod lookup;
pub mod message;
mod request;
pub mod resolver;
pub mod tick;

pub use config::{DNS_PORT, ResolverConfig};
pub use error::{MessageError, ResolveError, Result};
pub use lookup::LookupService;
pub use message::RecordType;
pub use request::ResolveStatus;
pub use resolver::HostNameResolver;
pub use tick::{ManualTicks, SystemTicks, TickSource};
