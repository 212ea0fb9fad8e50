//! Resolver configuration and DNS server discovery.

use std::path::Path;
use std::sync::Arc;

use horizon_wire_io::{Host, IpAddress};

use crate::logging::targets;
use crate::tick::{SystemTicks, TickSource};

/// The DNS port.
pub const DNS_PORT: u16 = 53;

/// Configuration for a [`LookupService`](crate::LookupService).
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Server used by requests that do not name one.
    pub dns_server: Option<Host>,

    /// Ask the OS for a server when `dns_server` is not set.
    /// Unix reads /etc/resolv.conf; Windows queries the adapter settings.
    pub use_system_config: bool,

    /// Name of the worker thread.
    pub thread_name: String,

    /// Stack size for the worker thread in bytes. `None` uses the default.
    pub stack_size: Option<usize>,

    /// Clock used for request deadlines.
    pub tick_source: Arc<dyn TickSource>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            dns_server: None,
            use_system_config: true,
            thread_name: "horizon-wire-dns".to_string(),
            stack_size: None,
            tick_source: Arc::new(SystemTicks::new()),
        }
    }
}

impl ResolverConfig {
    /// Create a configuration that discovers the server from the OS.
    pub fn system() -> Self {
        Self::default()
    }

    /// Create a configuration with a fixed default server.
    pub fn with_dns_server(server: Host) -> Self {
        Self {
            dns_server: Some(server),
            use_system_config: false,
            ..Default::default()
        }
    }

    /// Use Google's public DNS server.
    pub fn google() -> Self {
        Self::with_dns_server(Host::new(IpAddress::from_ipv4_octets([8, 8, 8, 8]), DNS_PORT))
    }

    /// Use Cloudflare's public DNS server.
    pub fn cloudflare() -> Self {
        Self::with_dns_server(Host::new(IpAddress::from_ipv4_octets([1, 1, 1, 1]), DNS_PORT))
    }

    /// Set the default server.
    pub fn dns_server(mut self, server: Host) -> Self {
        self.dns_server = Some(server);
        self
    }

    /// Set whether to fall back to the OS configuration.
    pub fn use_system_config(mut self, enabled: bool) -> Self {
        self.use_system_config = enabled;
        self
    }

    /// Set the worker thread name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the worker thread stack size.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Replace the deadline clock.
    pub fn tick_source(mut self, source: impl TickSource) -> Self {
        self.tick_source = Arc::new(source);
        self
    }

    /// The server for requests that do not name one, discovering it if allowed.
    pub(crate) fn resolve_default_server(&self) -> Option<Host> {
        if self.dns_server.is_some() || !self.use_system_config {
            return self.dns_server;
        }
        let server = system_dns_server();
        match server {
            Some(server) => tracing::debug!(target: targets::CONFIG, %server, "discovered DNS server"),
            None => tracing::debug!(target: targets::CONFIG, "no system DNS server configured"),
        }
        server
    }
}

/// The first DNS server configured in the OS, if any.
#[cfg(unix)]
pub fn system_dns_server() -> Option<Host> {
    resolv_conf_server(Path::new("/etc/resolv.conf"))
}

/// The first DNS server configured in the OS, if any.
#[cfg(windows)]
pub fn system_dns_server() -> Option<Host> {
    windows::first_dns_server()
}

/// The first DNS server configured in the OS, if any.
#[cfg(not(any(unix, windows)))]
pub fn system_dns_server() -> Option<Host> {
    None
}

/// The first usable `nameserver` in a resolv.conf file.
pub fn resolv_conf_server(path: &Path) -> Option<Host> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_resolv_conf(&contents),
        Err(err) => {
            tracing::debug!(
                target: targets::CONFIG,
                path = %path.display(),
                error = %err,
                "cannot read resolver configuration"
            );
            None
        }
    }
}

/// The first usable `nameserver` in resolv.conf contents.
pub fn parse_resolv_conf(contents: &str) -> Option<Host> {
    contents.lines().find_map(|line| {
        let line = match line.find(['#', ';']) {
            Some(comment) => &line[..comment],
            None => line,
        };
        let mut fields = line.split_whitespace();
        if fields.next() != Some("nameserver") {
            return None;
        }
        let address = fields.next()?;
        // Zone indices are not supported; keep the bare address.
        let address = address.split('%').next()?;
        address
            .parse::<IpAddress>()
            .ok()
            .map(|address| Host::new(address, DNS_PORT))
    })
}

#[cfg(windows)]
mod windows {
    use std::ptr;

    use horizon_wire_io::{Host, IpAddress};
    use windows_sys::Win32::Foundation::{ERROR_BUFFER_OVERFLOW, NO_ERROR};
    use windows_sys::Win32::NetworkManagement::IpHelper::{
        FIXED_INFO_W2KSP1, GetNetworkParams, IP_ADDR_STRING,
    };

    use super::DNS_PORT;
    use crate::logging::targets;

    pub(super) fn first_dns_server() -> Option<Host> {
        let mut len: u32 = 0;
        let rc = unsafe { GetNetworkParams(ptr::null_mut(), &mut len) };
        if rc != ERROR_BUFFER_OVERFLOW {
            tracing::debug!(target: targets::CONFIG, rc, "GetNetworkParams size query failed");
            return None;
        }

        // u64 storage keeps the structure suitably aligned.
        let mut buffer = vec![0u64; (len as usize).div_ceil(8)];
        let info = buffer.as_mut_ptr().cast::<FIXED_INFO_W2KSP1>();
        let rc = unsafe { GetNetworkParams(info, &mut len) };
        if rc != NO_ERROR {
            tracing::debug!(target: targets::CONFIG, rc, "GetNetworkParams failed");
            return None;
        }

        let mut entry: *const IP_ADDR_STRING = unsafe { &(*info).DnsServerList };
        while !entry.is_null() {
            let raw = unsafe { &(*entry).IpAddress.String };
            let text: Vec<u8> = raw
                .iter()
                .map(|&c| c as u8)
                .take_while(|&c| c != 0)
                .collect();
            if let Some(address) = std::str::from_utf8(&text)
                .ok()
                .and_then(|s| s.parse::<IpAddress>().ok())
                .filter(|a| !a.is_unspecified())
            {
                return Some(Host::new(address, DNS_PORT));
            }
            entry = unsafe { (*entry).Next };
        }
        None
    }
}
