// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Transport, UnpackedOffset};
use crc32fast::Hasher;

/// The basic MTProto transport protocol. This is an implementation of the
/// [full transport].
///
/// * Overhead: medium
/// * Minimum envelope length: 12 bytes.
/// * Maximum envelope length: 12 bytes.
///
/// It serializes the input payload as follows:
///
/// ```text
/// +----+----+----...----+----+
/// | len| seq|  payload  | crc|
/// +----+----+----...----+----+
///  ^^^^ 4 bytes
/// ```
///
/// [full transport]: https://core.telegram.org/mtproto/mtproto-transports#full
pub struct Full {
    send_seq: i32,
    recv_seq: i32,
}

#[allow(clippy::new_without_default)]
impl Full {
    pub fn new() -> Self {
        Self {
            send_seq: 0,
            recv_seq: 0,
        }
    }
}

impl Transport for Full {
    fn pack(&mut self, payload: &[u8], buffer: &mut Vec<u8>) {
        assert_eq!(payload.len() % 4, 0);

        // payload len + length itself (4 bytes) + send counter (4 bytes) + crc32 (4 bytes)
        let len = (payload.len() as i32) + 4 + 4 + 4;

        let start = buffer.len();
        buffer.extend(len.to_le_bytes());
        buffer.extend(self.send_seq.to_le_bytes());
        buffer.extend(payload);

        let crc = {
            let mut hasher = Hasher::new();
            hasher.update(&buffer[start..]);
            hasher.finalize()
        };
        buffer.extend(crc.to_le_bytes());

        self.send_seq += 1;
    }

    fn unpack(&mut self, buffer: &[u8]) -> Result<UnpackedOffset, Error> {
        // Need 4 bytes for the initial length
        if buffer.len() < 4 {
            return Err(Error::MissingBytes);
        }

        let total_len = buffer.len() as i32;

        // payload len
        let len = i32::from_le_bytes(buffer[0..4].try_into().unwrap());
        if len < 12 {
            return Err(Error::BadLen { got: len });
        }

        if total_len < len {
            return Err(Error::MissingBytes);
        }

        // receive counter
        let seq = i32::from_le_bytes(buffer[4..8].try_into().unwrap());
        if seq != self.recv_seq {
            return Err(Error::BadSeq {
                expected: self.recv_seq,
                got: seq,
            });
        }

        let len = len as usize;

        // crc32
        let crc = u32::from_le_bytes(buffer[len - 4..len].try_into().unwrap());

        let valid_crc = {
            let mut hasher = Hasher::new();
            hasher.update(&buffer[0..len - 4]);
            hasher.finalize()
        };
        if crc != valid_crc {
            return Err(Error::BadCrc {
                expected: valid_crc,
                got: crc,
            });
        }

        self.recv_seq += 1;
        Ok(UnpackedOffset {
            data_start: 8,
            data_end: len - 4,
            next_offset: len,
        })
    }

    fn reset(&mut self) {
        self.recv_seq = 0;
        self.send_seq = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a full transport and `n` bytes of input payload for it.
    fn setup_pack(n: usize) -> (Full, Vec<u8>) {
        let payload = (0..n).map(|x| (x & 0xff) as u8).collect();
        (Full::new(), payload)
    }

    #[test]
    fn pack_empty() {
        let (mut transport, payload) = setup_pack(0);
        let mut buffer = Vec::new();
        transport.pack(&payload, &mut buffer);

        assert_eq!(&buffer[..], &[12, 0, 0, 0, 0, 0, 0, 0, 38, 202, 141, 50]);
    }

    #[test]
    #[should_panic]
    fn pack_non_padded() {
        let (mut transport, payload) = setup_pack(7);
        let mut buffer = Vec::new();
        transport.pack(&payload, &mut buffer);
    }

    #[test]
    fn pack_normal() {
        let (mut transport, payload) = setup_pack(128);
        let mut buffer = Vec::new();
        transport.pack(&payload, &mut buffer);

        assert_eq!(&buffer[..4], &[140, 0, 0, 0]);
        assert_eq!(&buffer[4..8], &[0, 0, 0, 0]);
        assert_eq!(&buffer[8..8 + payload.len()], &payload[..]);
        assert_eq!(&buffer[8 + payload.len()..], &[134, 115, 149, 55]);
    }

    #[test]
    fn pack_twice() {
        let (mut transport, payload) = setup_pack(128);
        let mut buffer = Vec::new();
        transport.pack(&payload, &mut buffer);
        buffer.clear();
        transport.pack(&payload, &mut buffer);

        assert_eq!(&buffer[..4], &[140, 0, 0, 0]);
        assert_eq!(&buffer[4..8], &[1, 0, 0, 0]);
        assert_eq!(&buffer[8..8 + payload.len()], &payload[..]);
        assert_eq!(&buffer[8 + payload.len()..], &[150, 9, 240, 74]);
    }

    #[test]
    fn unpack_small() {
        let mut transport = Full::new();
        assert_eq!(transport.unpack(&[0, 1, 3]), Err(Error::MissingBytes));
    }

    #[test]
    fn unpack_normal() {
        let (mut transport, payload) = setup_pack(128);
        let mut buffer = Vec::new();
        transport.pack(&payload, &mut buffer);
        let offset = transport.unpack(&buffer).unwrap();
        assert_eq!(&buffer[offset.data_start..offset.data_end], &payload[..]);
    }

    #[test]
    fn unpack_two_at_once() {
        let (mut transport, payload) = setup_pack(128);
        let mut buffer = Vec::new();
        transport.pack(&payload, &mut buffer);
        let single_size = buffer.len();
        transport.pack(&payload, &mut buffer);

        let offset = transport.unpack(&buffer).unwrap();
        assert_eq!(&buffer[offset.data_start..offset.data_end], &payload[..]);
        assert_eq!(offset.next_offset, single_size);

        let offset = transport.unpack(&buffer[single_size..]).unwrap();
        assert_eq!(
            &buffer[single_size..][offset.data_start..offset.data_end],
            &payload[..]
        );
    }

    #[test]
    fn unpack_bad_seq() {
        let (mut transport, payload) = setup_pack(128);
        let mut buffer = Vec::new();
        transport.pack(&payload, &mut buffer);
        buffer[4] = 1;

        assert_eq!(
            transport.unpack(&buffer),
            Err(Error::BadSeq {
                expected: 0,
                got: 1,
            })
        );
    }

    #[test]
    fn unpack_bad_crc() {
        let (mut transport, payload) = setup_pack(128);
        let mut buffer = Vec::new();
        transport.pack(&payload, &mut buffer);
        let len = buffer.len();
        buffer[len - 1] ^= 0xff;

        assert_eq!(
            transport.unpack(&buffer),
            Err(Error::BadCrc {
                expected: 932541318,
                got: 3365237638,
            })
        );
    }

    #[test]
    fn reset_rewinds_counters() {
        let (mut transport, payload) = setup_pack(16);
        let mut buffer = Vec::new();
        transport.pack(&payload, &mut buffer);
        transport.reset();

        let mut again = Vec::new();
        transport.pack(&payload, &mut again);
        assert_eq!(buffer, again);
        assert!(transport.unpack(&again).is_ok());
    }
}
