
use std::net::SocketAddr;

use socket2::{Domain, SockAddr, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::{Error, Result};

/// Binds the front-end listening socket with `SO_REUSEADDR` and, where the OS supports it,
/// `SO_REUSEPORT` set before bind. Mirrors the original `net.go`'s `control` callback, which ran
/// both `setsockopt` calls inside `net.ListenConfig.Control` ahead of the kernel bind.
pub fn listen_udp(local: SocketAddr) -> Result<UdpSocket> {
    let addr = SockAddr::from(local);
    let domain = if local.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::DGRAM, None).map_err(|e| Error::ErrBind(e.into()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| Error::ErrSockopt(e.into()))?;

    // Reuse-port is a best-effort, platform-specific knob: the original only logs a failure here,
    // it never fails the bind.
    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("sfu-lb: SO_REUSEPORT unavailable, continuing without it: {e}");
    }

    socket.set_nonblocking(true).map_err(|e| Error::ErrBind(e.into()))?;
    socket.bind(&addr).map_err(|e| Error::ErrBind(e.into()))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(|e| Error::ErrBind(e.into()))
}

/// Dials a connected UDP socket to `remote`, with an OS-chosen ephemeral local port.
pub async fn dial_udp(remote: &str) -> Result<UdpSocket> {
    let addr: SocketAddr = remote.parse().map_err(|_| Error::ErrResolve)?;

    let local: SocketAddr = if addr.is_ipv6() {
        "[::]:0".parse().unwrap()
    } else {
        "0.0.0.0:0".parse().unwrap()
    };

    let socket = UdpSocket::bind(local)
        .await
        .map_err(|e| Error::ErrDial(e.into()))?;
    socket
        .connect(addr)
        .await
        .map_err(|e| Error::ErrDial(e.into()))?;

    Ok(socket)
}

/// Whether an I/O error is the kind of transient condition the original's
/// `net.Error.Timeout()/Temporary()` check swallows: a deadline expiry surfaces as
/// `tokio::time::error::Elapsed` (handled separately by callers), so this only needs to cover
/// what the raw read/write call itself can still report as transient.
pub(crate) fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
    )
}
