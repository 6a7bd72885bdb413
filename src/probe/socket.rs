use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::probe::ProbeError;

/// Create a raw ICMP socket for sending echo requests and receiving
/// Time Exceeded messages from intermediate routers
pub fn create_raw_icmp_socket(ipv6: bool) -> Result<Socket, ProbeError> {
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let protocol = if ipv6 {
        Protocol::ICMPV6
    } else {
        Protocol::ICMPV4
    };

    let socket = Socket::new(domain, Type::RAW, Some(protocol)).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            ProbeError::Socket(
                "raw sockets need root or CAP_NET_RAW (sudo setcap cap_net_raw+ep <binary>)"
                    .to_string(),
            )
        } else {
            ProbeError::Socket(format!("failed to create ICMP socket: {}", e))
        }
    })?;

    socket
        .set_nonblocking(false)
        .and_then(|_| socket.set_read_timeout(Some(Duration::from_millis(100))))
        .map_err(|e| ProbeError::Socket(format!("failed to configure ICMP socket: {}", e)))?;

    if let Err(e) = socket.set_recv_buffer_size(1024 * 1024) {
        tracing::debug!(error = %e, "could not enlarge ICMP receive buffer");
    }

    Ok(socket)
}

/// Set TTL (IPv4) or unicast hop limit (IPv6) for subsequent sends
pub fn set_ttl(socket: &Socket, ttl: u8, ipv6: bool) -> io::Result<()> {
    if ipv6 {
        socket.set_unicast_hops_v6(ttl as u32)
    } else {
        socket.set_ttl(ttl as u32)
    }
}

/// Send ICMP packet to target
pub fn send_icmp(socket: &Socket, packet: &[u8], target: IpAddr) -> io::Result<usize> {
    let addr = SockAddr::from(SocketAddr::new(target, 0));
    socket.send_to(packet, &addr)
}

/// Receive one ICMP packet, returning its length and sender
#[cfg(unix)]
pub fn recv_icmp(socket: &Socket, buffer: &mut [u8]) -> io::Result<(usize, IpAddr)> {
    use std::os::unix::io::AsRawFd;

    let mut src_storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut src_len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    let len = unsafe {
        libc::recvfrom(
            socket.as_raw_fd(),
            buffer.as_mut_ptr() as *mut libc::c_void,
            buffer.len(),
            0,
            &mut src_storage as *mut _ as *mut libc::sockaddr,
            &mut src_len,
        )
    };

    if len < 0 {
        return Err(io::Error::last_os_error());
    }

    let source = parse_sockaddr_storage(&src_storage)?;
    Ok((len as usize, source))
}

/// Parse sockaddr_storage to IpAddr
#[cfg(unix)]
fn parse_sockaddr_storage(storage: &libc::sockaddr_storage) -> io::Result<IpAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let addr: &libc::sockaddr_in = unsafe { &*(storage as *const _ as *const _) };
            let ip = std::net::Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            Ok(IpAddr::V4(ip))
        }
        libc::AF_INET6 => {
            let addr: &libc::sockaddr_in6 = unsafe { &*(storage as *const _ as *const _) };
            let ip = std::net::Ipv6Addr::from(addr.sin6_addr.s6_addr);
            Ok(IpAddr::V6(ip))
        }
        family => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown address family: {}", family),
        )),
    }
}

/// Whether a receive error only means "nothing arrived before the read timeout"
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
