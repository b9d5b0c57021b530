// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Helpers to impersonate the server side of the codec.
//!
//! Test suites need to fabricate valid inbound payloads (and read the
//! ones a session emits) without a real server. [`ServerCodec`] mirrors
//! [`crate::Codec`] with the sides swapped: it decrypts client-origin
//! payloads and encrypts server-origin ones, assigning message ids with
//! the server parity.
use crate::errors::DeserializeError;
use crate::manual_tl::{Message, MessageContainer};
use ferrogram_crypto::{decrypt_data_v2, encrypt_data_v2, AuthKey, Side};
use ferrogram_tl::{Cursor, Deserializable, Serializable};
use std::time::{SystemTime, UNIX_EPOCH};

/// The remote end of a [`crate::Codec`].
pub struct ServerCodec {
    auth_key: AuthKey,
    session_id: i64,
    last_msg_id: i64,
    sequence: i32,
}

impl ServerCodec {
    pub fn new(auth_key: [u8; 256], session_id: i64) -> Self {
        Self {
            auth_key: AuthKey::from_bytes(auth_key),
            session_id,
            last_msg_id: 0,
            sequence: 0,
        }
    }

    /// Decrypts a client-origin payload, returning the salt the client
    /// used and the message it carried.
    pub fn decrypt_client_payload(
        &self,
        payload: &[u8],
    ) -> Result<(i64, Message), DeserializeError> {
        let plaintext = decrypt_data_v2(payload, &self.auth_key, Side::Client)?;
        let mut buffer = Cursor::from_slice(&plaintext);

        let salt = i64::deserialize(&mut buffer)?;
        let session_id = i64::deserialize(&mut buffer)?;
        if session_id != self.session_id {
            return Err(DeserializeError::SessionIdMismatch {
                got: session_id,
                expected: self.session_id,
            });
        }

        Ok((salt, Message::deserialize(&mut buffer)?))
    }

    /// Next server-assigned message id: time-based, strictly increasing,
    /// low bit set (server-to-client parity).
    pub fn next_msg_id(&mut self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before epoch");
        let candidate = (((now.as_secs()) << 32) | ((now.subsec_nanos() as u64) << 2)) as i64 | 1;

        self.last_msg_id = if self.last_msg_id >= candidate {
            self.last_msg_id + 4
        } else {
            candidate
        };
        self.last_msg_id
    }

    fn next_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            self.sequence += 1;
            self.sequence * 2 - 1
        } else {
            self.sequence * 2
        }
    }

    /// Encrypts an exact [`Message`], bypassing id and seq assignment.
    /// Useful to replay duplicates or craft invalid ids.
    pub fn encrypt_raw(&self, salt: i64, message: &Message) -> Vec<u8> {
        let mut plaintext =
            Vec::with_capacity(8 + 8 + Message::SIZE_OVERHEAD + message.body.len());
        salt.serialize(&mut plaintext);
        self.session_id.serialize(&mut plaintext);
        message.serialize(&mut plaintext);

        encrypt_data_v2(&plaintext, &self.auth_key, Side::Server)
    }

    /// Wraps a body into a server-origin message and encrypts it.
    pub fn encrypt_message(&mut self, salt: i64, body: &[u8], content_related: bool) -> Vec<u8> {
        let message = self.wrap(body, content_related);
        self.encrypt_raw(salt, &message)
    }

    /// Wraps a body into a server-origin message without encrypting it.
    pub fn wrap(&mut self, body: &[u8], content_related: bool) -> Message {
        Message {
            msg_id: self.next_msg_id(),
            seq_no: self.next_seq_no(content_related),
            body: body.to_vec(),
        }
    }

    /// Batches several bodies into a `msg_container` payload. Each entry
    /// carries the body and whether it is content-related.
    pub fn encrypt_container(&mut self, salt: i64, bodies: &[(Vec<u8>, bool)]) -> Vec<u8> {
        let messages = bodies
            .iter()
            .map(|(body, content_related)| self.wrap(body, *content_related))
            .collect();
        let container = MessageContainer { messages };

        let outer = Message {
            msg_id: self.next_msg_id(),
            seq_no: self.next_seq_no(false),
            body: container.to_bytes(),
        };
        self.encrypt_raw(salt, &outer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_msg_ids_keep_server_parity() {
        let mut server = ServerCodec::new([0; 256], 1);
        let mut last = 0;
        for _ in 0..100 {
            let id = server.next_msg_id();
            assert_eq!(id % 2, 1);
            assert!(id > last);
            last = id;
        }
    }
}
