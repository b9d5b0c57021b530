// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Assignment of message identifiers and sequence numbers.
use crate::manual_tl::{GzipPacked, Message, MessageContainer};
use crate::DEFAULT_COMPRESSION_THRESHOLD;
use ferrogram_tl::{functions, types, Identifiable, Serializable};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Pure service constructors, which do not affect the sequence number
/// and use an even one. Everything else is content-related.
const NOT_CONTENT_RELATED: [u32; 5] = [
    types::MsgsAck::CONSTRUCTOR_ID,
    functions::Ping::CONSTRUCTOR_ID,
    functions::PingDelayDisconnect::CONSTRUCTOR_ID,
    types::HttpWait::CONSTRUCTOR_ID,
    MessageContainer::CONSTRUCTOR_ID,
];

/// Produces unique, strictly increasing message identifiers.
///
/// Identifiers are derived from the current unix time (seconds in the
/// high 32 bits, scaled nanoseconds below) with the two lowest bits
/// forced to zero, as the protocol requires of client messages.
pub struct MsgIdGenerator {
    last_msg_id: AtomicI64,
}

impl MsgIdGenerator {
    pub fn new() -> Self {
        Self {
            last_msg_id: AtomicI64::new(0),
        }
    }

    /// Generates the next message identifier.
    ///
    /// Safe to call concurrently; every caller observes a distinct,
    /// strictly greater value.
    pub fn next(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before epoch");

        let seconds = now.as_secs();
        let nanoseconds = now.subsec_nanos() as u64;
        let candidate = ((seconds << 32) | (nanoseconds << 2)) as i64;

        let mut last = self.last_msg_id.load(Ordering::SeqCst);
        loop {
            let new = if last >= candidate { last + 4 } else { candidate };
            match self
                .last_msg_id
                .compare_exchange(last, new, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break new,
                Err(observed) => last = observed,
            }
        }
    }
}

impl Default for MsgIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps serialized bodies into protocol [`Message`]s, maintaining the
/// per-session sequence state.
///
/// Content-related messages get `counter * 2 + 1` and advance the
/// counter; pure service messages get `counter * 2` and leave it alone.
pub struct MsgFactory {
    msg_ids: MsgIdGenerator,
    sequence: Mutex<i32>,
}

impl MsgFactory {
    pub fn new() -> Self {
        Self {
            msg_ids: MsgIdGenerator::new(),
            sequence: Mutex::new(0),
        }
    }

    /// Frames a serialized body whose leading 4 bytes are the TL
    /// constructor identifier of `constructor_id`.
    ///
    /// Large content-related bodies travel as `gzip_packed` when that
    /// actually shrinks them.
    pub fn wrap(&self, constructor_id: u32, mut body: Vec<u8>) -> Message {
        let content_related = !NOT_CONTENT_RELATED.contains(&constructor_id);
        if content_related && body.len() >= DEFAULT_COMPRESSION_THRESHOLD {
            let compressed = GzipPacked::new(&body).to_bytes();
            if compressed.len() < body.len() {
                body = compressed;
            }
        }

        // Both counters advance in one critical section: of two racing
        // messages, the one with the greater msg_id also carries the
        // greater seq_no.
        let (msg_id, seq_no) = {
            let mut sequence = self.sequence.lock().unwrap();
            let msg_id = self.msg_ids.next();
            let seq_no = if content_related {
                let seq_no = *sequence * 2 + 1;
                *sequence += 1;
                seq_no
            } else {
                *sequence * 2
            };
            (msg_id, seq_no)
        };

        Message {
            msg_id,
            seq_no,
            body,
        }
    }
}

impl Default for MsgFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrogram_tl::Deserializable;

    #[test]
    fn msg_ids_are_strictly_increasing_and_divisible_by_four() {
        let generator = MsgIdGenerator::new();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = generator.next();
            assert!(id > last);
            assert_eq!(id % 4, 0);
            last = id;
        }
    }

    #[test]
    fn msg_ids_embed_current_time() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let id = MsgIdGenerator::new().next();
        assert!(((id >> 32) - now).abs() <= 1);
    }

    #[test]
    fn content_messages_step_sequence_by_two() {
        let factory = MsgFactory::new();
        let body = || functions::GetFutureSalts { num: 1 }.to_bytes();

        let first = factory.wrap(functions::GetFutureSalts::CONSTRUCTOR_ID, body());
        let second = factory.wrap(functions::GetFutureSalts::CONSTRUCTOR_ID, body());
        assert_eq!(first.seq_no, 1);
        assert_eq!(second.seq_no, 3);
        assert!(first.requires_ack() && second.requires_ack());
    }

    #[test]
    fn service_messages_use_even_sequence_without_step() {
        let factory = MsgFactory::new();

        let ack = factory.wrap(
            types::MsgsAck::CONSTRUCTOR_ID,
            types::MsgsAck { msg_ids: vec![1] }.to_bytes(),
        );
        assert_eq!(ack.seq_no, 0);
        assert!(!ack.requires_ack());

        // One content message bumps the counter; the next service
        // message observes it without stepping further.
        factory.wrap(
            functions::GetFutureSalts::CONSTRUCTOR_ID,
            functions::GetFutureSalts { num: 1 }.to_bytes(),
        );
        let ping = factory.wrap(
            functions::Ping::CONSTRUCTOR_ID,
            functions::Ping { ping_id: 1 }.to_bytes(),
        );
        assert_eq!(ping.seq_no, 2);
        let ping = factory.wrap(
            functions::PingDelayDisconnect::CONSTRUCTOR_ID,
            functions::PingDelayDisconnect {
                ping_id: 2,
                disconnect_delay: 75,
            }
            .to_bytes(),
        );
        assert_eq!(ping.seq_no, 2);
    }

    #[test]
    fn racing_wrappers_keep_msg_id_and_seq_no_paired() {
        use std::sync::Arc;
        use std::thread;

        let factory = Arc::new(MsgFactory::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = factory.clone();
                thread::spawn(move || {
                    (0..500)
                        .map(|_| {
                            let message = factory.wrap(
                                functions::GetFutureSalts::CONSTRUCTOR_ID,
                                functions::GetFutureSalts { num: 1 }.to_bytes(),
                            );
                            (message.msg_id, message.seq_no)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut assigned: Vec<(i64, i32)> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();

        // Ordering the ids must also order the sequence numbers.
        assigned.sort_unstable();
        for pair in assigned.windows(2) {
            assert!(pair[0].0 < pair[1].0);
            assert!(pair[0].1 < pair[1].1);
        }
    }

    #[test]
    fn large_content_bodies_travel_compressed() {
        let factory = MsgFactory::new();

        // Compressible and above the threshold: wrapped in gzip_packed.
        let mut body = functions::GetFutureSalts { num: 1 }.to_bytes();
        body.extend(std::iter::repeat(0u8).take(4 * 1024));
        let message = factory.wrap(functions::GetFutureSalts::CONSTRUCTOR_ID, body.clone());
        assert_eq!(
            &message.body[..4],
            &GzipPacked::CONSTRUCTOR_ID.to_le_bytes()
        );
        let unpacked = GzipPacked::from_bytes(&message.body).unwrap();
        assert_eq!(unpacked.decompress().unwrap(), body);

        // Service messages are never compressed.
        let ack_ids = types::MsgsAck {
            msg_ids: (0..1024).collect(),
        };
        let message = factory.wrap(types::MsgsAck::CONSTRUCTOR_ID, ack_ids.to_bytes());
        assert_eq!(
            &message.body[..4],
            &types::MsgsAck::CONSTRUCTOR_ID.to_le_bytes()
        );
    }

    #[test]
    fn wrapped_messages_carry_body_length() {
        let factory = MsgFactory::new();
        let body = functions::GetFutureSalts { num: 1 }.to_bytes();
        let message = factory.wrap(functions::GetFutureSalts::CONSTRUCTOR_ID, body.clone());
        assert_eq!(message.body, body);
        let serialized = message.to_bytes();
        assert_eq!(
            &serialized[12..16],
            &(body.len() as i32).to_le_bytes(),
        );
    }
}
