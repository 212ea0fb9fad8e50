//! Windows backend built on `WSAEventSelect`.
//!
//! Each registered socket gets its own event object. A wait blocks on all of
//! them with `WSAWaitForMultipleEvents`, then collects what fired with
//! `WSAEnumNetworkEvents`, which also resets the event.

use std::time::Duration;
use std::{io, ptr, thread};

use windows_sys::Win32::Networking::WinSock::{
    FD_ACCEPT, FD_ACCEPT_BIT, FD_CLOSE, FD_CLOSE_BIT, FD_CONNECT, FD_CONNECT_BIT, FD_READ,
    FD_READ_BIT, FD_WRITE, FD_WRITE_BIT, SOCKET, WSA_INFINITE, WSA_MAXIMUM_WAIT_EVENTS,
    WSA_WAIT_EVENT_0, WSA_WAIT_FAILED, WSA_WAIT_TIMEOUT, WSACloseEvent, WSACreateEvent,
    WSAEVENT, WSAEnumNetworkEvents, WSAEventSelect, WSANETWORKEVENTS, WSAWaitForMultipleEvents,
};

use super::{Multiplexer, timeout_millis};
use crate::sys::{RawHandle, ensure_winsock};
use crate::waitable::{Interest, Readiness};

struct Entry {
    token: u64,
    socket: SOCKET,
    event: WSAEVENT,
}

pub(crate) struct EventSelect {
    entries: Vec<Entry>,
    handles: Vec<WSAEVENT>,
}

// Event objects are process-wide kernel handles.
unsafe impl Send for EventSelect {}

fn network_events(interest: Interest) -> i32 {
    let mut mask = FD_CLOSE as i32;
    if interest.is_readable() {
        mask |= (FD_READ | FD_ACCEPT) as i32;
    }
    if interest.is_writable() {
        mask |= (FD_WRITE | FD_CONNECT) as i32;
    }
    mask
}

impl EventSelect {
    fn position(&self, token: u64) -> io::Result<usize> {
        self.entries
            .iter()
            .position(|e| e.token == token)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown registration"))
    }
}

impl Multiplexer for EventSelect {
    const MAX_CAPACITY: usize = WSA_MAXIMUM_WAIT_EVENTS as usize;

    fn new(capacity: usize) -> io::Result<Self> {
        ensure_winsock()?;
        Ok(Self {
            entries: Vec::with_capacity(capacity),
            handles: Vec::with_capacity(capacity),
        })
    }

    fn register(&mut self, handle: RawHandle, token: u64, interest: Interest) -> io::Result<()> {
        let socket = handle as SOCKET;
        let event = unsafe { WSACreateEvent() };
        if event.is_null() {
            return Err(io::Error::last_os_error());
        }

        if unsafe { WSAEventSelect(socket, event, network_events(interest)) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { WSACloseEvent(event) };
            return Err(err);
        }

        self.entries.push(Entry {
            token,
            socket,
            event,
        });
        Ok(())
    }

    fn reregister(&mut self, _handle: RawHandle, token: u64, interest: Interest) -> io::Result<()> {
        let entry = &self.entries[self.position(token)?];
        // Re-selecting records FD_READ / FD_WRITE again if the condition
        // already holds, which keeps readiness level-like.
        if unsafe { WSAEventSelect(entry.socket, entry.event, network_events(interest)) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn deregister(&mut self, _handle: RawHandle, token: u64) -> io::Result<()> {
        let index = self.position(token)?;
        let entry = self.entries.swap_remove(index);
        let rc = unsafe { WSAEventSelect(entry.socket, ptr::null_mut(), 0) };
        let err = (rc != 0).then(io::Error::last_os_error);
        unsafe { WSACloseEvent(entry.event) };
        err.map_or(Ok(()), Err)
    }

    fn poll(
        &mut self,
        timeout: Option<Duration>,
        events: &mut Vec<(u64, Readiness)>,
    ) -> io::Result<()> {
        if self.entries.is_empty() {
            // Nothing to wait on; the native call rejects an empty set.
            return match timeout {
                Some(timeout) => {
                    thread::sleep(timeout);
                    Ok(())
                }
                None => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "infinite wait on an empty wait set",
                )),
            };
        }

        let timeout_ms = match timeout {
            None => WSA_INFINITE,
            Some(timeout) => timeout_millis(timeout).min(u128::from(WSA_INFINITE - 1)) as u32,
        };

        self.handles.clear();
        self.handles.extend(self.entries.iter().map(|e| e.event));

        let rc = unsafe {
            WSAWaitForMultipleEvents(
                self.handles.len() as u32,
                self.handles.as_ptr(),
                0,
                timeout_ms,
                0,
            )
        } as u32;

        if rc == WSA_WAIT_FAILED as u32 {
            return Err(io::Error::last_os_error());
        }
        if rc == WSA_WAIT_TIMEOUT as u32 {
            return Ok(());
        }

        let first = rc.wrapping_sub(WSA_WAIT_EVENT_0 as u32) as usize;
        for entry in self.entries.iter().skip(first) {
            let mut network: WSANETWORKEVENTS = unsafe { std::mem::zeroed() };
            if unsafe { WSAEnumNetworkEvents(entry.socket, entry.event, &mut network) } != 0 {
                events.push((entry.token, Readiness::ERROR));
                continue;
            }

            let fired = network.lNetworkEvents;
            let failed = |bit: u32| network.iErrorCode[bit as usize] != 0;

            let mut readiness = Readiness::NOT_READY;
            if fired & (FD_READ | FD_ACCEPT | FD_CLOSE) as i32 != 0 {
                readiness |= Readiness::READ;
            }
            if fired & (FD_WRITE | FD_CONNECT) as i32 != 0 {
                readiness |= Readiness::WRITE;
            }
            if (fired & FD_READ as i32 != 0 && failed(FD_READ_BIT as u32))
                || (fired & FD_WRITE as i32 != 0 && failed(FD_WRITE_BIT as u32))
                || (fired & FD_ACCEPT as i32 != 0 && failed(FD_ACCEPT_BIT as u32))
                || (fired & FD_CONNECT as i32 != 0 && failed(FD_CONNECT_BIT as u32))
                || (fired & FD_CLOSE as i32 != 0 && failed(FD_CLOSE_BIT as u32))
            {
                readiness |= Readiness::ERROR;
            }

            if !readiness.is_empty() {
                events.push((entry.token, readiness));
            }
        }
        Ok(())
    }
}

impl Drop for EventSelect {
    fn drop(&mut self) {
        for entry in self.entries.drain(..) {
            unsafe {
                WSAEventSelect(entry.socket, ptr::null_mut(), 0);
                WSACloseEvent(entry.event);
            }
        }
    }
}
