use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::OnceLock;
use std::{io, mem, ptr};

use windows_sys::Win32::Networking::WinSock::{
    AF_INET, AF_INET6, FIONBIO, INVALID_SOCKET, IPPROTO_IPV6, IPPROTO_TCP, IPV6_V6ONLY, SD_BOTH,
    SD_RECEIVE, SD_SEND, SO_BROADCAST, SO_ERROR, SO_REUSEADDR, SOCK_DGRAM, SOCK_STREAM, SOCKADDR,
    SOCKADDR_IN, SOCKADDR_IN6, SOCKADDR_STORAGE, SOCKET, SOCKET_ERROR, SOL_SOCKET, TCP_NODELAY,
    WSADATA, WSAECONNRESET, WSAEINPROGRESS, WSAEMSGSIZE, WSAEventSelect, WSAStartup, accept, bind, closesocket,
    connect, getpeername, getsockname, getsockopt, ioctlsocket, listen, recv, recvfrom, send,
    sendto, setsockopt, shutdown, socket,
};

use super::{Family, Kind};

/// Native socket handle type.
pub type RawHandle = std::os::windows::io::RawSocket;

/// Handle value of a closed socket.
pub const INVALID_HANDLE: RawHandle = INVALID_SOCKET as RawHandle;

pub(crate) const IN_PROGRESS: i32 = WSAEINPROGRESS as i32;

static WINSOCK: OnceLock<i32> = OnceLock::new();

/// Start WinSock 2.2 once per process.
pub(crate) fn ensure_winsock() -> io::Result<()> {
    let rc = *WINSOCK.get_or_init(|| unsafe {
        let mut data: WSADATA = mem::zeroed();
        WSAStartup(0x0202, &mut data)
    });
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

fn check(rc: i32) -> io::Result<()> {
    if rc == SOCKET_ERROR {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn check_len(rc: i32) -> io::Result<usize> {
    if rc == SOCKET_ERROR {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

fn clamp_len(len: usize) -> i32 {
    len.min(i32::MAX as usize) as i32
}

fn setsockopt_int(handle: RawHandle, level: i32, name: i32, value: i32) -> io::Result<()> {
    check(unsafe {
        setsockopt(
            handle as SOCKET,
            level,
            name,
            &value as *const i32 as *const u8,
            mem::size_of::<i32>() as i32,
        )
    })
}

fn set_nonblocking(handle: RawHandle) -> io::Result<()> {
    let mut nonblocking: u32 = 1;
    check(unsafe { ioctlsocket(handle as SOCKET, FIONBIO as i32, &mut nonblocking) })
}

pub(crate) fn sys_socket(family: Family, kind: Kind) -> io::Result<RawHandle> {
    ensure_winsock()?;
    let domain = match family {
        Family::V4 => AF_INET as i32,
        Family::V6 => AF_INET6 as i32,
    };
    let ty = match kind {
        Kind::Stream => SOCK_STREAM as i32,
        Kind::Datagram => SOCK_DGRAM as i32,
    };

    let handle = unsafe { socket(domain, ty, 0) };
    if handle == INVALID_SOCKET {
        return Err(io::Error::last_os_error());
    }
    let handle = handle as RawHandle;

    if let Err(err) = set_nonblocking(handle) {
        sys_close(handle);
        return Err(err);
    }
    Ok(handle)
}

pub(crate) fn sys_close(handle: RawHandle) {
    unsafe { closesocket(handle as SOCKET) };
}

pub(crate) fn sys_connect(handle: RawHandle, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    check(unsafe { connect(handle as SOCKET, &storage as *const _ as *const SOCKADDR, len) })
}

pub(crate) fn sys_bind(handle: RawHandle, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    check(unsafe { bind(handle as SOCKET, &storage as *const _ as *const SOCKADDR, len) })
}

pub(crate) fn sys_listen(handle: RawHandle, backlog: i32) -> io::Result<()> {
    check(unsafe { listen(handle as SOCKET, backlog) })
}

pub(crate) fn sys_accept(handle: RawHandle) -> io::Result<RawHandle> {
    let client = unsafe { accept(handle as SOCKET, ptr::null_mut(), ptr::null_mut()) };
    if client == INVALID_SOCKET {
        return Err(io::Error::last_os_error());
    }
    let client = client as RawHandle;

    // Accepted sockets inherit the listener's event selection; clear it so
    // the new socket can be registered with its own event object.
    unsafe { WSAEventSelect(client as SOCKET, ptr::null_mut(), 0) };
    if let Err(err) = set_nonblocking(client) {
        sys_close(client);
        return Err(err);
    }
    Ok(client)
}

pub(crate) fn sys_send(handle: RawHandle, buffer: &[u8]) -> io::Result<usize> {
    check_len(unsafe { send(handle as SOCKET, buffer.as_ptr(), clamp_len(buffer.len()), 0) })
}

pub(crate) fn sys_recv(handle: RawHandle, buffer: &mut [u8]) -> io::Result<usize> {
    check_len(unsafe {
        recv(
            handle as SOCKET,
            buffer.as_mut_ptr(),
            clamp_len(buffer.len()),
            0,
        )
    })
}

pub(crate) fn sys_send_to(
    handle: RawHandle,
    buffer: &[u8],
    addr: &SocketAddr,
) -> io::Result<usize> {
    let (storage, len) = socketaddr_to_storage(addr);
    check_len(unsafe {
        sendto(
            handle as SOCKET,
            buffer.as_ptr(),
            clamp_len(buffer.len()),
            0,
            &storage as *const _ as *const SOCKADDR,
            len,
        )
    })
}

/// Receive one datagram; a datagram larger than `buffer` is truncated.
///
/// An unconnected UDP socket reports ICMP port-unreachable for an earlier
/// send as `WSAECONNRESET`; that report carries no datagram and is skipped.
pub(crate) fn sys_recv_from(
    handle: RawHandle,
    buffer: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
    loop {
        let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;

        let rc = unsafe {
            recvfrom(
                handle as SOCKET,
                buffer.as_mut_ptr(),
                clamp_len(buffer.len()),
                0,
                &mut storage as *mut _ as *mut SOCKADDR,
                &mut len,
            )
        };

        if rc != SOCKET_ERROR {
            return Ok((rc as usize, storage_to_socketaddr(&storage)?));
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == WSAEMSGSIZE as i32 => {
                return Ok((buffer.len(), storage_to_socketaddr(&storage)?));
            }
            Some(code) if code == WSAECONNRESET as i32 => continue,
            _ => return Err(err),
        }
    }
}

pub(crate) fn sys_local_addr(handle: RawHandle) -> io::Result<SocketAddr> {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;
    check(unsafe {
        getsockname(
            handle as SOCKET,
            &mut storage as *mut _ as *mut SOCKADDR,
            &mut len,
        )
    })?;
    storage_to_socketaddr(&storage)
}

pub(crate) fn sys_peer_addr(handle: RawHandle) -> io::Result<SocketAddr> {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;
    check(unsafe {
        getpeername(
            handle as SOCKET,
            &mut storage as *mut _ as *mut SOCKADDR,
            &mut len,
        )
    })?;
    storage_to_socketaddr(&storage)
}

pub(crate) fn sys_shutdown(handle: RawHandle, how: Shutdown) -> io::Result<()> {
    let how = match how {
        Shutdown::Read => SD_RECEIVE,
        Shutdown::Write => SD_SEND,
        Shutdown::Both => SD_BOTH,
    };
    check(unsafe { shutdown(handle as SOCKET, how as _) })
}

pub(crate) fn sys_take_error(handle: RawHandle) -> io::Result<Option<io::Error>> {
    let mut err: i32 = 0;
    let mut len = mem::size_of::<i32>() as i32;
    check(unsafe {
        getsockopt(
            handle as SOCKET,
            SOL_SOCKET as i32,
            SO_ERROR as i32,
            &mut err as *mut i32 as *mut u8,
            &mut len,
        )
    })?;
    Ok((err != 0).then(|| io::Error::from_raw_os_error(err)))
}

pub(crate) fn sys_set_reuseaddr(handle: RawHandle) -> io::Result<()> {
    setsockopt_int(handle, SOL_SOCKET as i32, SO_REUSEADDR as i32, 1)
}

pub(crate) fn sys_set_broadcast(handle: RawHandle) -> io::Result<()> {
    setsockopt_int(handle, SOL_SOCKET as i32, SO_BROADCAST as i32, 1)
}

pub(crate) fn sys_set_v6only(handle: RawHandle, v6only: bool) -> io::Result<()> {
    setsockopt_int(
        handle,
        IPPROTO_IPV6 as i32,
        IPV6_V6ONLY as i32,
        i32::from(v6only),
    )
}

pub(crate) fn sys_disable_delayed_ack(handle: RawHandle) -> io::Result<()> {
    setsockopt_int(handle, IPPROTO_TCP as i32, TCP_NODELAY as i32, 1)
}

fn storage_to_socketaddr(storage: &SOCKADDR_STORAGE) -> io::Result<SocketAddr> {
    match storage.ss_family {
        AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const SOCKADDR_IN) };
            let ip = Ipv4Addr::from(u32::from_be(unsafe { sin.sin_addr.S_un.S_addr }));
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const SOCKADDR_IN6) };
            let ip = Ipv6Addr::from(unsafe { sin6.sin6_addr.u.Byte });
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                unsafe { sin6.Anonymous.sin6_scope_id },
            )))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

fn socketaddr_to_storage(addr: &SocketAddr) -> (SOCKADDR_STORAGE, i32) {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut SOCKADDR_IN) };
            sa.sin_family = AF_INET;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.S_un.S_addr = u32::from(*v4.ip()).to_be();
            (storage, mem::size_of::<SOCKADDR_IN>() as i32)
        }
        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut SOCKADDR_IN6) };
            sa.sin6_family = AF_INET6;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_addr.u.Byte = v6.ip().octets();
            sa.Anonymous.sin6_scope_id = v6.scope_id();
            (storage, mem::size_of::<SOCKADDR_IN6>() as i32)
        }
    }
}
