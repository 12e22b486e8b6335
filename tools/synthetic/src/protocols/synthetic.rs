//! Fixed-size spin request: the server burns `work` nanoseconds and echoes
//! the request back.

use bytes::{Buf, BufMut};

use crate::schedule::Packet;
use crate::transport::{RecvHalf, TransportError};

/// `work | index | randomness`, big-endian u64s
pub const REQUEST_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticRequest {
    pub work: u64,
    pub index: u64,
    pub randomness: u64,
}

impl SyntheticRequest {
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.work);
        buf.put_u64(self.index);
        buf.put_u64(self.randomness);
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < REQUEST_LEN {
            return Err(TransportError::ShortPacket(bytes.len()));
        }
        Ok(Self {
            work: bytes.get_u64(),
            index: bytes.get_u64(),
            randomness: bytes.get_u64(),
        })
    }
}

impl From<&Packet> for SyntheticRequest {
    fn from(packet: &Packet) -> Self {
        Self {
            work: packet.work,
            index: packet.index as u64,
            randomness: packet.randomness,
        }
    }
}

pub fn gen_request<B: BufMut>(packet: &Packet, buf: &mut B) {
    SyntheticRequest::from(packet).encode(buf);
}

/// Returns the index carried by the response.
pub async fn read_response(rx: &mut RecvHalf, scratch: &mut [u8]) -> Result<u64, TransportError> {
    let buf = &mut scratch[..REQUEST_LEN];
    rx.read_exact(buf).await?;
    Ok(SyntheticRequest::decode(buf)?.index)
}

#[cfg(test)]
mod tests {
    use super::{REQUEST_LEN, SyntheticRequest, gen_request};
    use crate::schedule::Packet;
    use crate::transport::TransportError;

    #[test]
    fn request_layout() {
        let packet = Packet {
            index: 7,
            target_start: 100,
            work: 0x0102,
            randomness: 0xaabb_ccdd_eeff_0011,
        };
        let mut buf = Vec::new();
        gen_request(&packet, &mut buf);

        assert_eq!(buf.len(), REQUEST_LEN);
        assert_eq!(&buf[..8], &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
        assert_eq!(&buf[8..16], &[0, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(
            SyntheticRequest::decode(&buf).expect("decode"),
            SyntheticRequest {
                work: 0x0102,
                index: 7,
                randomness: 0xaabb_ccdd_eeff_0011,
            }
        );
    }

    #[test]
    fn short_request_rejected() {
        let err = SyntheticRequest::decode(&[0u8; 10]).expect_err("short");
        assert!(matches!(err, TransportError::ShortPacket(10)));
    }
}
