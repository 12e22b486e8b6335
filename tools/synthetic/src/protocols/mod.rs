use bytes::BufMut;
use rand::Rng;

use crate::config::{ProtocolKind, Transport, Workload};
use crate::schedule::Packet;
use crate::transport::{RecvHalf, TransportError};

pub mod memcached;
pub mod synthetic;

/// largest response any protocol reads into its scratch buffer at once
pub const SCRATCH_LEN: usize = 4096;

#[derive(Debug, Clone)]
pub enum Protocol {
    Synthetic,
    Memcached(memcached::MemcachedProtocol),
}

impl Protocol {
    pub fn new(kind: ProtocolKind, workload: Workload) -> Self {
        match kind {
            ProtocolKind::Synthetic => Self::Synthetic,
            ProtocolKind::Memcached => Self::Memcached(memcached::MemcachedProtocol::new(workload)),
        }
    }

    pub fn kind(&self) -> ProtocolKind {
        match self {
            Self::Synthetic => ProtocolKind::Synthetic,
            Self::Memcached(_) => ProtocolKind::Memcached,
        }
    }

    pub fn gen_request<R, B>(&self, packet: &Packet, transport: Transport, rng: &mut R, buf: &mut B)
    where
        R: Rng + ?Sized,
        B: BufMut,
    {
        match self {
            Self::Synthetic => synthetic::gen_request(packet, buf),
            Self::Memcached(proto) => proto.gen_request(packet, transport, rng, buf),
        }
    }

    /// Wait for the next response and return the packet index it answers.
    pub async fn read_response(
        &self,
        rx: &mut RecvHalf,
        scratch: &mut [u8],
    ) -> Result<u64, TransportError> {
        match self {
            Self::Synthetic => synthetic::read_response(rx, scratch).await,
            Self::Memcached(_) => memcached::MemcachedProtocol::read_response(rx, scratch).await,
        }
    }
}
