//! Memcached binary protocol requests for the USR and ETC key/value mixes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use bytes::{Buf, BufMut};
use rand::Rng;

use crate::config::{Transport, Workload};
use crate::distribution::Distribution;
use crate::schedule::Packet;
use crate::transport::{RecvHalf, TransportError};

pub const HEADER_LEN: usize = 24;
/// request id 0, sequence 0, 1 datagram, reserved
pub const UDP_FRAME_HEADER: [u8; 8] = [0, 0, 0, 0, 0, 1, 0, 0];
pub const NVALUES: u64 = 100_000;

// USR
/// out of 1000
const USR_PCT_SET: u64 = 2;
const USR_VALUE_SIZE: usize = 2;
const KEY_SIZE: usize = 20;

// ETC
/// out of 1000
const ETC_PCT_SET: u64 = 30;
const ETC_MAX_KEY_SIZE: usize = 256;
const ETC_KEY_DIST: Distribution = Distribution::Gev {
    loc: 30.7984,
    scale: 8.20449,
    shape: 0.078688,
};
const ETC_VALUE_BUCKETS: [(f64, usize); 15] = [
    (0.00536, 0),
    (0.00047, 1),
    (0.17820, 2),
    (0.09239, 3),
    (0.00018, 4),
    (0.02740, 5),
    (0.00065, 6),
    (0.00606, 7),
    (0.00023, 8),
    (0.00837, 9),
    (0.00837, 10),
    (0.08989, 11),
    (0.00092, 12),
    (0.00326, 13),
    (0.01980, 14),
];
const ETC_VALUE_TAIL: Distribution = Distribution::GPareto {
    loc: 15.0,
    scale: 214.476,
    shape: 0.348238,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Noop = 0x0a,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Magic {
    Request = 0x80,
    Response = 0x81,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ResponseStatus {
    NoError = 0x00,
    UnknownCommand = 0x81,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub magic: u8,
    pub opcode: u8,
    pub key_length: u16,
    pub extras_length: u8,
    pub data_type: u8,
    pub vbucket_id_or_status: u16,
    pub total_body_length: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl PacketHeader {
    pub fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.magic);
        buf.put_u8(self.opcode);
        buf.put_u16(self.key_length);
        buf.put_u8(self.extras_length);
        buf.put_u8(self.data_type);
        buf.put_u16(self.vbucket_id_or_status);
        buf.put_u32(self.total_body_length);
        buf.put_u32(self.opaque);
        buf.put_u64(self.cas);
    }

    /// Decode a header without checking the magic byte.
    pub fn read(mut bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < HEADER_LEN {
            return Err(TransportError::ShortPacket(bytes.len()));
        }
        Ok(Self {
            magic: bytes.get_u8(),
            opcode: bytes.get_u8(),
            key_length: bytes.get_u16(),
            extras_length: bytes.get_u8(),
            data_type: bytes.get_u8(),
            vbucket_id_or_status: bytes.get_u16(),
            total_body_length: bytes.get_u32(),
            opaque: bytes.get_u32(),
            cas: bytes.get_u64(),
        })
    }

    pub fn read_response(bytes: &[u8]) -> Result<Self, TransportError> {
        let header = Self::read(bytes)?;
        if header.magic != Magic::Response as u8 {
            return Err(TransportError::BadMagic(header.magic));
        }
        Ok(header)
    }
}

/// Key sizes chosen by ETC sets, so later gets ask for the same key.
#[derive(Debug, Clone)]
pub struct EtcKeySizes(Arc<[AtomicU16]>);

impl EtcKeySizes {
    pub fn new() -> Self {
        Self(
            (0..NVALUES)
                .map(|_| AtomicU16::new(KEY_SIZE as u16))
                .collect(),
        )
    }

    pub fn get(&self, key: u64) -> usize {
        self.0[(key % NVALUES) as usize].load(Ordering::Relaxed) as usize
    }

    fn set(&self, key: u64, size: usize) {
        self.0[(key % NVALUES) as usize].store(size as u16, Ordering::Relaxed);
    }
}

impl Default for EtcKeySizes {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MemcachedProtocol {
    workload: Workload,
    key_sizes: EtcKeySizes,
}

impl MemcachedProtocol {
    pub fn new(workload: Workload) -> Self {
        Self {
            workload,
            key_sizes: EtcKeySizes::new(),
        }
    }

    pub fn gen_request<R, B>(&self, packet: &Packet, transport: Transport, rng: &mut R, buf: &mut B)
    where
        R: Rng + ?Sized,
        B: BufMut,
    {
        // low 32 bits pick GET or SET, high 32 bits pick the key
        let low32 = packet.randomness & 0xffff_ffff;
        let key = (packet.randomness >> 32) % NVALUES;
        let opaque = packet.index;

        if transport == Transport::Udp {
            buf.put_slice(&UDP_FRAME_HEADER);
        }

        match self.workload {
            Workload::Usr if low32 % 1000 < USR_PCT_SET => {
                set_request(key, opaque, KEY_SIZE, USR_VALUE_SIZE, buf)
            }
            Workload::Usr => get_request(key, opaque, KEY_SIZE, buf),
            Workload::Etc if low32 % 1000 < ETC_PCT_SET => {
                let key_size = (ETC_KEY_DIST.sample_u64(rng) as usize).clamp(KEY_SIZE, ETC_MAX_KEY_SIZE);
                self.key_sizes.set(key, key_size);
                set_request(key, opaque, key_size, etc_value_size(rng), buf)
            }
            Workload::Etc => get_request(key, opaque, self.key_sizes.get(key), buf),
        }
    }

    /// Returns the opaque (packet index) of a successful response.
    pub async fn read_response(rx: &mut RecvHalf, scratch: &mut [u8]) -> Result<u64, TransportError> {
        let header = match rx.transport() {
            Transport::Udp => {
                let len = rx.recv(scratch).await?;
                if len < UDP_FRAME_HEADER.len() + HEADER_LEN {
                    return Err(TransportError::ShortPacket(len));
                }
                PacketHeader::read_response(&scratch[UDP_FRAME_HEADER.len()..len])?
            }
            Transport::Tcp => {
                rx.read_exact(&mut scratch[..HEADER_LEN]).await?;
                let header = PacketHeader::read_response(&scratch[..HEADER_LEN])?;
                rx.skip(header.total_body_length as usize, scratch).await?;
                header
            }
        };

        if header.vbucket_id_or_status != ResponseStatus::NoError as u16 {
            return Err(TransportError::Status(header.vbucket_id_or_status));
        }
        Ok(header.opaque as u64)
    }
}

/// Response a minimal server sends for `request`: gets answer with empty
/// flags and an empty value, everything else with an empty body.
pub fn response_for(request: &PacketHeader) -> Vec<u8> {
    let (status, extras) = match request.opcode {
        op if op == Opcode::Get as u8 => (ResponseStatus::NoError, 4u8),
        op if op == Opcode::Set as u8 || op == Opcode::Noop as u8 => (ResponseStatus::NoError, 0),
        _ => (ResponseStatus::UnknownCommand, 0),
    };
    let mut buf = Vec::with_capacity(HEADER_LEN + extras as usize);
    PacketHeader {
        magic: Magic::Response as u8,
        opcode: request.opcode,
        extras_length: extras,
        vbucket_id_or_status: status as u16,
        total_body_length: extras as u32,
        opaque: request.opaque,
        ..Default::default()
    }
    .write(&mut buf);
    buf.put_bytes(0, extras as usize);
    buf
}

fn set_request<B: BufMut>(key: u64, opaque: u32, key_size: usize, value_size: usize, buf: &mut B) {
    PacketHeader {
        magic: Magic::Request as u8,
        opcode: Opcode::Set as u8,
        key_length: key_size as u16,
        extras_length: 8,
        total_body_length: (8 + key_size + value_size) as u32,
        opaque,
        ..Default::default()
    }
    .write(buf);
    // flags and expiration
    buf.put_u64(0);
    write_key(buf, key, key_size);
    for i in 0..value_size as u64 {
        buf.put_u8(((key.wrapping_mul(i) >> (i % 4)) & 0xff) as u8);
    }
}

fn get_request<B: BufMut>(key: u64, opaque: u32, key_size: usize, buf: &mut B) {
    PacketHeader {
        magic: Magic::Request as u8,
        opcode: Opcode::Get as u8,
        key_length: key_size as u16,
        total_body_length: key_size as u32,
        opaque,
        ..Default::default()
    }
    .write(buf);
    write_key(buf, key, key_size);
}

/// Decimal digits, least significant first, padded with `A` to `key_size`.
fn write_key<B: BufMut>(buf: &mut B, key: u64, key_size: usize) {
    let mut pushed = 0;
    let mut k = key;
    loop {
        buf.put_u8(b'0' + (k % 10) as u8);
        k /= 10;
        pushed += 1;
        if k == 0 {
            break;
        }
    }
    for _ in pushed..key_size {
        buf.put_u8(b'A');
    }
}

fn etc_value_size<R: Rng + ?Sized>(rng: &mut R) -> usize {
    let roll = rng.r#gen::<f64>();
    let mut sum = 0.0;
    for (p, size) in ETC_VALUE_BUCKETS {
        sum += p;
        if roll < sum {
            return size;
        }
    }
    ETC_VALUE_TAIL.sample_u64(rng) as usize
}
