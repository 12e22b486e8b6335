use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

pub use crate::config::Transport;

pub mod tcp;
pub mod udp;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("short packet received: {0} bytes")]
    ShortPacket(usize),
    #[error("bad magic number in response header: {0:#04x}")]
    BadMagic(u8),
    #[error("server returned non-zero status {0}")]
    Status(u16),
    #[error("connection closed by peer")]
    Eof,
}

/// A client connection split so one task can send while another receives.
#[derive(Debug)]
pub struct Connection {
    pub tx: SendHalf,
    pub rx: RecvHalf,
}

impl Connection {
    pub async fn connect(addr: SocketAddr, transport: Transport) -> Result<Self, TransportError> {
        match transport {
            Transport::Udp => {
                let socket = Arc::new(udp::connect(addr)?);
                Ok(Self {
                    tx: SendHalf::Udp(Arc::clone(&socket)),
                    rx: RecvHalf::Udp(socket),
                })
            }
            Transport::Tcp => {
                let stream = tcp::connect(addr).await?;
                let (rx, tx) = stream.into_split();
                Ok(Self {
                    tx: SendHalf::Tcp(tx),
                    rx: RecvHalf::Tcp(rx),
                })
            }
        }
    }
}

#[derive(Debug)]
pub enum SendHalf {
    Udp(Arc<UdpSocket>),
    Tcp(OwnedWriteHalf),
}

impl SendHalf {
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        match self {
            Self::Udp(socket) => {
                socket.send(payload).await?;
            }
            Self::Tcp(stream) => stream.write_all(payload).await?,
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        if let Self::Tcp(stream) = self {
            stream.shutdown().await?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum RecvHalf {
    Udp(Arc<UdpSocket>),
    Tcp(OwnedReadHalf),
}

impl RecvHalf {
    pub fn transport(&self) -> Transport {
        match self {
            Self::Udp(_) => Transport::Udp,
            Self::Tcp(_) => Transport::Tcp,
        }
    }

    /// Read whatever arrives next: one datagram, or whatever bytes the
    /// stream has ready.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let len = match self {
            Self::Udp(socket) => socket.recv(buf).await?,
            Self::Tcp(stream) => stream.read(buf).await?,
        };
        if len == 0 {
            return Err(TransportError::Eof);
        }
        Ok(len)
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        if let Self::Tcp(stream) = self {
            return match stream.read_exact(buf).await {
                Ok(_) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Err(TransportError::Eof),
                Err(err) => Err(err.into()),
            };
        }
        let len = self.recv(buf).await?;
        if len < buf.len() {
            return Err(TransportError::ShortPacket(len));
        }
        Ok(())
    }

    /// Read and drop `len` bytes from a stream.
    pub async fn skip(&mut self, mut len: usize, scratch: &mut [u8]) -> Result<(), TransportError> {
        while len > 0 {
            let chunk = len.min(scratch.len());
            self.read_exact(&mut scratch[..chunk]).await?;
            len -= chunk;
        }
        Ok(())
    }
}
