use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;

use crate::transport::TransportError;

/// kernel buffer size requested for load sockets
pub const SOCKET_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Connected client socket on an ephemeral port.
pub fn connect(target: SocketAddr) -> Result<UdpSocket, TransportError> {
    let unspecified = match target.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let socket = new_socket(target)?;
    socket.bind(&SocketAddr::new(unspecified, 0).into())?;
    socket.connect(&target.into())?;
    into_tokio(socket)
}

/// Server socket bound to `addr`. Reuses the address so restarts don't wait
/// out old sockets.
pub fn bind(addr: SocketAddr) -> Result<UdpSocket, TransportError> {
    let socket = new_socket(addr)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    into_tokio(socket)
}

fn new_socket(addr: SocketAddr) -> Result<Socket, TransportError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, None)?;
    socket.set_nonblocking(true)?;
    // best effort, the kernel clamps to its configured maximum
    let _ = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE);
    let _ = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE);
    Ok(socket)
}

fn into_tokio(socket: Socket) -> Result<UdpSocket, TransportError> {
    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}
