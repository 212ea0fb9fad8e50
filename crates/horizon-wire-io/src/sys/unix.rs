use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::{io, mem};

use libc::{c_int, c_void, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t};

use super::{Family, Kind};

/// Native descriptor type.
pub type RawHandle = std::os::fd::RawFd;

/// Descriptor value of a closed socket.
pub const INVALID_HANDLE: RawHandle = -1;

pub(crate) const IN_PROGRESS: i32 = libc::EINPROGRESS;

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
const SEND_FLAGS: c_int = 0;

fn check(rc: c_int) -> io::Result<()> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn check_len(rc: isize) -> io::Result<usize> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

fn set_flag(fd: RawHandle, get: c_int, set: c_int, flag: c_int) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, get) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    check(unsafe { libc::fcntl(fd, set, flags | flag) })
}

fn setsockopt_int(fd: RawHandle, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
    check(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const c_int as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    })
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn set_nosigpipe(fd: RawHandle) -> io::Result<()> {
    setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1)
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn set_nosigpipe(_fd: RawHandle) -> io::Result<()> {
    Ok(())
}

/// Create a non-blocking, close-on-exec socket.
pub(crate) fn sys_socket(family: Family, kind: Kind) -> io::Result<RawHandle> {
    let domain = match family {
        Family::V4 => libc::AF_INET,
        Family::V6 => libc::AF_INET6,
    };
    let ty = match kind {
        Kind::Stream => libc::SOCK_STREAM,
        Kind::Datagram => libc::SOCK_DGRAM,
    };

    let fd = unsafe { libc::socket(domain, ty, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let configured = set_flag(fd, libc::F_GETFL, libc::F_SETFL, libc::O_NONBLOCK)
        .and_then(|()| set_flag(fd, libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC))
        .and_then(|()| set_nosigpipe(fd));
    if let Err(err) = configured {
        sys_close(fd);
        return Err(err);
    }

    Ok(fd)
}

pub(crate) fn sys_close(fd: RawHandle) {
    unsafe { libc::close(fd) };
}

pub(crate) fn sys_connect(fd: RawHandle, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    check(unsafe { libc::connect(fd, &storage as *const _ as *const sockaddr, len) })
}

pub(crate) fn sys_bind(fd: RawHandle, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    check(unsafe { libc::bind(fd, &storage as *const _ as *const sockaddr, len) })
}

pub(crate) fn sys_listen(fd: RawHandle, backlog: i32) -> io::Result<()> {
    check(unsafe { libc::listen(fd, backlog) })
}

/// Accept a pending connection as a new non-blocking socket.
pub(crate) fn sys_accept(fd: RawHandle) -> io::Result<RawHandle> {
    let client = unsafe { libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) };
    if client < 0 {
        return Err(io::Error::last_os_error());
    }

    let configured = set_flag(client, libc::F_GETFL, libc::F_SETFL, libc::O_NONBLOCK)
        .and_then(|()| set_flag(client, libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC))
        .and_then(|()| set_nosigpipe(client));
    if let Err(err) = configured {
        sys_close(client);
        return Err(err);
    }

    Ok(client)
}

pub(crate) fn sys_send(fd: RawHandle, buffer: &[u8]) -> io::Result<usize> {
    check_len(unsafe { libc::send(fd, buffer.as_ptr() as *const c_void, buffer.len(), SEND_FLAGS) })
}

pub(crate) fn sys_recv(fd: RawHandle, buffer: &mut [u8]) -> io::Result<usize> {
    check_len(unsafe { libc::recv(fd, buffer.as_mut_ptr() as *mut c_void, buffer.len(), 0) })
}

pub(crate) fn sys_send_to(fd: RawHandle, buffer: &[u8], addr: &SocketAddr) -> io::Result<usize> {
    let (storage, len) = socketaddr_to_storage(addr);
    check_len(unsafe {
        libc::sendto(
            fd,
            buffer.as_ptr() as *const c_void,
            buffer.len(),
            SEND_FLAGS,
            &storage as *const _ as *const sockaddr,
            len,
        )
    })
}

/// Receive one datagram; a datagram larger than `buffer` is truncated.
pub(crate) fn sys_recv_from(fd: RawHandle, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let received = check_len(unsafe {
        libc::recvfrom(
            fd,
            buffer.as_mut_ptr() as *mut c_void,
            buffer.len(),
            0,
            &mut storage as *mut _ as *mut sockaddr,
            &mut len,
        )
    })?;

    Ok((received.min(buffer.len()), storage_to_socketaddr(&storage)?))
}

pub(crate) fn sys_local_addr(fd: RawHandle) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;
    check(unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    storage_to_socketaddr(&storage)
}

pub(crate) fn sys_peer_addr(fd: RawHandle) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;
    check(unsafe { libc::getpeername(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    storage_to_socketaddr(&storage)
}

pub(crate) fn sys_shutdown(fd: RawHandle, how: Shutdown) -> io::Result<()> {
    let how = match how {
        Shutdown::Read => libc::SHUT_RD,
        Shutdown::Write => libc::SHUT_WR,
        Shutdown::Both => libc::SHUT_RDWR,
    };
    check(unsafe { libc::shutdown(fd, how) })
}

/// Pending asynchronous error (`SO_ERROR`), cleared by reading it.
pub(crate) fn sys_take_error(fd: RawHandle) -> io::Result<Option<io::Error>> {
    let mut err: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;
    check(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut c_int as *mut c_void,
            &mut len,
        )
    })?;
    Ok((err != 0).then(|| io::Error::from_raw_os_error(err)))
}

pub(crate) fn sys_set_reuseaddr(fd: RawHandle) -> io::Result<()> {
    setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)
}

pub(crate) fn sys_set_broadcast(fd: RawHandle) -> io::Result<()> {
    setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_BROADCAST, 1)
}

pub(crate) fn sys_set_v6only(fd: RawHandle, v6only: bool) -> io::Result<()> {
    setsockopt_int(fd, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, c_int::from(v6only))
}

/// Send segments immediately and acknowledge eagerly where supported.
pub(crate) fn sys_disable_delayed_ack(fd: RawHandle) -> io::Result<()> {
    setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1)?;
    #[cfg(any(target_os = "linux", target_os = "android"))]
    setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_QUICKACK, 1)?;
    Ok(())
}

fn storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(addr.sin_port))))
        }
        libc::AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(addr.sin6_addr.s6_addr),
                u16::from_be(addr.sin6_port),
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = libc::AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();
            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }
        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = libc::AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();
            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}
