//! BSD/macOS `kqueue` backend.
//!
//! Read and write interest map to separate `EVFILT_READ` / `EVFILT_WRITE`
//! filters, so a socket ready for both arrives as two events with the same
//! token. The wait set merges them.

use std::time::Duration;
use std::{io, mem, ptr};

use super::Multiplexer;
use crate::sys::RawHandle;
use crate::waitable::{Interest, Readiness};

pub(crate) struct Kqueue {
    kq: RawHandle,
    events: Vec<libc::kevent>,
}

// The event buffer holds raw `udata` pointers that only ever carry tokens.
unsafe impl Send for Kqueue {}

fn change(handle: RawHandle, filter: i16, flags: u16, token: u64) -> libc::kevent {
    let mut event: libc::kevent = unsafe { mem::zeroed() };
    event.ident = handle as libc::uintptr_t;
    event.filter = filter as _;
    event.flags = (flags | libc::EV_RECEIPT) as _;
    event.udata = token as usize as _;
    event
}

impl Kqueue {
    /// Apply changes, tolerating `ENOENT` for filters that were not installed.
    fn apply(&mut self, changes: &mut [libc::kevent]) -> io::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let n = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as _,
                changes.as_mut_ptr(),
                changes.len() as _,
                ptr::null(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        for receipt in &changes[..n as usize] {
            if receipt.flags & libc::EV_ERROR as u16 != 0 {
                let code = receipt.data as i32;
                if code != 0 && code != libc::ENOENT {
                    return Err(io::Error::from_raw_os_error(code));
                }
            }
        }
        Ok(())
    }

    fn filters(handle: RawHandle, token: u64, interest: Option<Interest>) -> [libc::kevent; 2] {
        let flag = |wanted: bool| {
            if wanted {
                libc::EV_ADD | libc::EV_ENABLE
            } else {
                libc::EV_DELETE
            }
        };
        let readable = interest.is_some_and(Interest::is_readable);
        let writable = interest.is_some_and(Interest::is_writable);
        [
            change(handle, libc::EVFILT_READ as i16, flag(readable) as u16, token),
            change(handle, libc::EVFILT_WRITE as i16, flag(writable) as u16, token),
        ]
    }
}

impl Multiplexer for Kqueue {
    const MAX_CAPACITY: usize = i32::MAX as usize / 2;

    fn new(capacity: usize) -> io::Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(kq) };
            return Err(err);
        }
        Ok(Self {
            kq,
            events: Vec::with_capacity(capacity.max(1) * 2),
        })
    }

    fn register(&mut self, handle: RawHandle, token: u64, interest: Interest) -> io::Result<()> {
        // A fresh registration has nothing to delete.
        let mut adds: Vec<libc::kevent> = Self::filters(handle, token, Some(interest))
            .into_iter()
            .filter(|c| c.flags & libc::EV_DELETE as u16 == 0)
            .collect();
        self.apply(&mut adds)
    }

    fn reregister(&mut self, handle: RawHandle, token: u64, interest: Interest) -> io::Result<()> {
        let mut changes = Self::filters(handle, token, Some(interest));
        self.apply(&mut changes)
    }

    fn deregister(&mut self, handle: RawHandle, token: u64) -> io::Result<()> {
        let mut changes = Self::filters(handle, token, None);
        self.apply(&mut changes)
    }

    fn poll(
        &mut self,
        timeout: Option<Duration>,
        events: &mut Vec<(u64, Readiness)>,
    ) -> io::Result<()> {
        let timespec = timeout.map(|t| libc::timespec {
            tv_sec: t.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: t.subsec_nanos() as _,
        });
        let timespec_ptr = timespec
            .as_ref()
            .map_or(ptr::null(), |t| t as *const libc::timespec);

        self.events.clear();
        let n = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as _,
                timespec_ptr,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { self.events.set_len(n as usize) };

        for event in &self.events {
            let token = event.udata as usize as u64;
            let mut readiness = Readiness::NOT_READY;

            if event.filter == libc::EVFILT_READ as _ {
                readiness |= Readiness::READ;
            } else if event.filter == libc::EVFILT_WRITE as _ {
                readiness |= Readiness::WRITE;
            }
            if event.flags & libc::EV_ERROR as u16 != 0
                || (event.flags & libc::EV_EOF as u16 != 0 && event.fflags != 0)
            {
                readiness |= Readiness::ERROR;
            }
            events.push((token, readiness));
        }
        Ok(())
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        unsafe { libc::close(self.kq) };
    }
}
