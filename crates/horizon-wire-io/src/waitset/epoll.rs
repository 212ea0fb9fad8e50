//! Linux `epoll` backend, used level-triggered.

use std::io;
use std::time::Duration;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, EPOLLRDHUP, epoll_event,
};

use super::{Multiplexer, timeout_millis};
use crate::sys::RawHandle;
use crate::waitable::{Interest, Readiness};

pub(crate) struct Epoll {
    epfd: RawHandle,
    events: Vec<epoll_event>,
}

fn event_mask(interest: Interest) -> u32 {
    let mut mask = 0;
    if interest.is_readable() {
        mask |= EPOLLIN | EPOLLRDHUP;
    }
    if interest.is_writable() {
        mask |= EPOLLOUT;
    }
    mask as u32
}

impl Epoll {
    fn ctl(&self, op: i32, handle: RawHandle, token: u64, interest: Option<Interest>) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest.map_or(0, event_mask),
            u64: token,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, handle, &mut event) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Multiplexer for Epoll {
    const MAX_CAPACITY: usize = i32::MAX as usize;

    fn new(capacity: usize) -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epfd,
            events: Vec::with_capacity(capacity.max(1)),
        })
    }

    fn register(&mut self, handle: RawHandle, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, handle, token, Some(interest))
    }

    fn reregister(&mut self, handle: RawHandle, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, handle, token, Some(interest))
    }

    fn deregister(&mut self, handle: RawHandle, token: u64) -> io::Result<()> {
        self.ctl(EPOLL_CTL_DEL, handle, token, None)
    }

    fn poll(
        &mut self,
        timeout: Option<Duration>,
        events: &mut Vec<(u64, Readiness)>,
    ) -> io::Result<()> {
        let timeout_ms = match timeout {
            None => -1,
            Some(timeout) => timeout_millis(timeout).min(i32::MAX as u128) as i32,
        };

        self.events.clear();
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { self.events.set_len(n as usize) };

        for event in &self.events {
            let bits = event.events as i32;
            let token = event.u64;

            let mut readiness = Readiness::NOT_READY;
            if bits & (EPOLLIN | EPOLLRDHUP | EPOLLHUP) != 0 {
                readiness |= Readiness::READ;
            }
            if bits & EPOLLOUT != 0 {
                readiness |= Readiness::WRITE;
            }
            if bits & EPOLLERR != 0 {
                readiness |= Readiness::ERROR;
            }
            events.push((token, readiness));
        }
        Ok(())
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}
