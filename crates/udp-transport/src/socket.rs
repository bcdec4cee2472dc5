use crate::{Result, TransportError};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

fn bind_error(role: &'static str, addr: SocketAddr, e: std::io::Error) -> TransportError {
    TransportError::Bind {
        role,
        addr: addr.to_string(),
        reason: e.to_string(),
    }
}

fn open(role: &'static str, addr: SocketAddr, reuse: bool) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| bind_error(role, addr, e))?;
    if reuse {
        socket
            .set_reuse_address(true)
            .map_err(|e| bind_error(role, addr, e))?;
    }
    socket
        .bind(&addr.into())
        .map_err(|e| bind_error(role, addr, e))?;
    Ok(socket.into())
}

/// Outbound socket on the configured local send port.
pub(crate) fn bind_send(addr: SocketAddr) -> Result<UdpSocket> {
    open("send", addr, false)
}

/// Inbound socket with address reuse and a read timeout, so a blocked receive
/// returns often enough to observe a stop request.
pub(crate) fn bind_receive(addr: SocketAddr, timeout: Duration) -> Result<UdpSocket> {
    let socket = open("receive", addr, true)?;
    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| bind_error("receive", addr, e))?;
    Ok(socket)
}
