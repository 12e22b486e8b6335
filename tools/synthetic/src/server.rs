//! Reference server for `--mode linux-server`. It answers both protocols so a
//! runtime client can be pointed at it over loopback.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::config::{ProtocolKind, SyntheticConfig, Transport};
use crate::protocols::SCRATCH_LEN;
use crate::protocols::memcached::{self, HEADER_LEN, Magic, PacketHeader, UDP_FRAME_HEADER};
use crate::protocols::synthetic::{REQUEST_LEN, SyntheticRequest};
use crate::transport::{TransportError, tcp, udp};

/// upper bound on the work a single request can ask for
pub const MAX_WORK: Duration = Duration::from_secs(1);
/// pause before accepting again after a resource error such as EMFILE
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug)]
enum Listener {
    Udp(Arc<UdpSocket>),
    Tcp(TcpListener),
}

#[derive(Debug)]
pub struct Server {
    listener: Listener,
    protocol: ProtocolKind,
    threads: usize,
}

impl Server {
    pub fn bind(config: &SyntheticConfig) -> Result<Self> {
        Self::bind_addr(config.addr, config.transport, config.protocol, config.threads)
    }

    pub fn bind_addr(
        addr: SocketAddr,
        transport: Transport,
        protocol: ProtocolKind,
        threads: usize,
    ) -> Result<Self> {
        let listener = match transport {
            Transport::Udp => Listener::Udp(Arc::new(
                udp::bind(addr).with_context(|| format!("failed to bind udp {addr}"))?,
            )),
            Transport::Tcp => Listener::Tcp(
                tcp::listen(addr).with_context(|| format!("failed to listen on tcp {addr}"))?,
            ),
        };
        Ok(Self {
            listener,
            protocol,
            threads: threads.max(1),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.listener {
            Listener::Udp(socket) => socket.local_addr(),
            Listener::Tcp(listener) => listener.local_addr(),
        }
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(%addr, protocol = ?self.protocol, threads = self.threads, "server listening");

        tokio::select! {
            _ = shutdown => {
                info!("server shutting down");
                Ok(())
            }
            res = self.run() => res,
        }
    }

    async fn run(self) -> Result<()> {
        match self.listener {
            Listener::Udp(socket) => {
                // dropping the set on shutdown aborts the workers
                let mut tasks = JoinSet::new();
                for _ in 0..self.threads {
                    tasks.spawn(serve_udp(Arc::clone(&socket), self.protocol));
                }
                while let Some(joined) = tasks.join_next().await {
                    joined.context("udp worker panicked")??;
                }
                Ok(())
            }
            Listener::Tcp(listener) => loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        let backoff = accept_backoff(&err);
                        warn!(?err, ?backoff, "failed to accept connection");
                        if let Some(backoff) = backoff {
                            tokio::time::sleep(backoff).await;
                        }
                        continue;
                    }
                };
                trace!(%peer, "accepted connection");
                let protocol = self.protocol;
                tokio::spawn(async move {
                    if let Err(err) = serve_stream(stream, protocol).await {
                        debug!(%peer, ?err, "connection closed with error");
                    }
                });
            },
        }
    }
}

async fn serve_udp(socket: Arc<UdpSocket>, protocol: ProtocolKind) -> Result<()> {
    let mut buf = vec![0u8; SCRATCH_LEN];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let reply = match udp_reply(protocol, &buf[..len]) {
            Ok(reply) => reply,
            Err(err) => {
                debug!(%peer, ?err, "dropping malformed request");
                continue;
            }
        };
        if let Err(err) = socket.send_to(&reply, peer).await {
            warn!(%peer, ?err, "failed to send reply");
        }
    }
}

fn udp_reply(protocol: ProtocolKind, datagram: &[u8]) -> Result<Vec<u8>, TransportError> {
    match protocol {
        ProtocolKind::Synthetic => {
            let request = SyntheticRequest::decode(datagram)?;
            serve_work(Duration::from_nanos(request.work));
            Ok(datagram[..REQUEST_LEN].to_vec())
        }
        ProtocolKind::Memcached => {
            if datagram.len() < UDP_FRAME_HEADER.len() + HEADER_LEN {
                return Err(TransportError::ShortPacket(datagram.len()));
            }
            let (frame, rest) = datagram.split_at(UDP_FRAME_HEADER.len());
            let header = request_header(rest)?;
            let mut reply = frame.to_vec();
            reply.extend_from_slice(&memcached::response_for(&header));
            Ok(reply)
        }
    }
}

async fn serve_stream(mut stream: TcpStream, protocol: ProtocolKind) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut buf = vec![0u8; SCRATCH_LEN];
    loop {
        let reply = match protocol {
            ProtocolKind::Synthetic => {
                if !read_or_eof(&mut stream, &mut buf[..REQUEST_LEN]).await? {
                    return Ok(());
                }
                let request = SyntheticRequest::decode(&buf[..REQUEST_LEN])?;
                serve_work(Duration::from_nanos(request.work));
                buf[..REQUEST_LEN].to_vec()
            }
            ProtocolKind::Memcached => {
                if !read_or_eof(&mut stream, &mut buf[..HEADER_LEN]).await? {
                    return Ok(());
                }
                let header = request_header(&buf[..HEADER_LEN])?;
                let mut body = header.total_body_length as usize;
                while body > 0 {
                    let chunk = body.min(buf.len());
                    stream.read_exact(&mut buf[..chunk]).await?;
                    body -= chunk;
                }
                memcached::response_for(&header)
            }
        };
        stream.write_all(&reply).await?;
    }
}

/// Errors that only concern the connection being accepted are retried
/// immediately; anything else (usually fd exhaustion) waits a moment first.
fn accept_backoff(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

fn request_header(bytes: &[u8]) -> Result<PacketHeader, TransportError> {
    let header = PacketHeader::read(bytes)?;
    if header.magic != Magic::Request as u8 {
        return Err(TransportError::BadMagic(header.magic));
    }
    Ok(header)
}

/// `false` on a clean close before the first byte.
async fn read_or_eof(stream: &mut TcpStream, buf: &mut [u8]) -> Result<bool> {
    match stream.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Spin for `work`. On a multi-threaded runtime the worker hands its other
/// tasks off first so accepts and other connections keep running.
fn serve_work(work: Duration) {
    if work.is_zero() {
        return;
    }
    let multi_thread = Handle::try_current()
        .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
        .unwrap_or(false);
    if multi_thread {
        tokio::task::block_in_place(|| spin_for(work));
    } else {
        spin_for(work);
    }
}

/// Burn CPU for `work` on the calling thread.
fn spin_for(work: Duration) {
    if work.is_zero() {
        return;
    }
    let work = work.min(MAX_WORK);
    let start = Instant::now();
    while start.elapsed() < work {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::{Duration, Instant};

    use super::{ACCEPT_BACKOFF, accept_backoff, serve_work, spin_for, udp_reply};
    use crate::config::ProtocolKind;
    use crate::protocols::memcached::{Magic, Opcode, PacketHeader, UDP_FRAME_HEADER};
    use crate::protocols::synthetic::SyntheticRequest;

    #[test]
    fn synthetic_reply_echoes_request() {
        let mut buf = Vec::new();
        SyntheticRequest {
            work: 0,
            index: 12,
            randomness: 3,
        }
        .encode(&mut buf);

        assert_eq!(udp_reply(ProtocolKind::Synthetic, &buf).expect("reply"), buf);
    }

    #[test]
    fn memcached_reply_keeps_frame_and_opaque() {
        let mut buf = UDP_FRAME_HEADER.to_vec();
        PacketHeader {
            magic: Magic::Request as u8,
            opcode: Opcode::Set as u8,
            opaque: 31,
            ..Default::default()
        }
        .write(&mut buf);

        let reply = udp_reply(ProtocolKind::Memcached, &buf).expect("reply");
        assert_eq!(&reply[..8], &UDP_FRAME_HEADER);
        let header = PacketHeader::read_response(&reply[8..]).expect("response header");
        assert_eq!(header.opaque, 31);
        assert_eq!(header.total_body_length, 0);
    }

    #[test]
    fn memcached_reply_rejects_responses() {
        let mut buf = UDP_FRAME_HEADER.to_vec();
        PacketHeader {
            magic: Magic::Response as u8,
            ..Default::default()
        }
        .write(&mut buf);

        assert!(udp_reply(ProtocolKind::Memcached, &buf).is_err());
    }

    #[test]
    fn spin_waits_at_least_work() {
        let start = Instant::now();
        spin_for(Duration::from_micros(200));
        assert!(start.elapsed() >= Duration::from_micros(200));
    }

    #[test]
    fn accept_errors_keep_serving() {
        let aborted = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert_eq!(accept_backoff(&aborted), None);
        // EMFILE surfaces as an uncategorized os error
        let exhausted = io::Error::other("too many open files");
        assert_eq!(accept_backoff(&exhausted), Some(ACCEPT_BACKOFF));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn long_work_leaves_other_tasks_running() {
        let ticker = tokio::spawn(async {
            let start = Instant::now();
            tokio::time::sleep(Duration::from_millis(5)).await;
            start.elapsed()
        });
        // a spin far longer than the ticker's sleep, on a worker thread
        tokio::spawn(async { serve_work(Duration::from_millis(300)) });
        tokio::spawn(async { serve_work(Duration::from_millis(300)) });

        let waited = ticker.await.expect("ticker");
        assert!(waited < Duration::from_millis(250), "{waited:?}");
    }

    #[tokio::test]
    async fn work_runs_on_current_thread_runtime() {
        let start = Instant::now();
        serve_work(Duration::from_micros(200));
        assert!(start.elapsed() >= Duration::from_micros(200));
    }
}
