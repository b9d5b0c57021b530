// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The encrypted message codec.
//!
//! [`Codec::pack`] and [`Codec::unpack`] are the only two operations:
//! both are pure with respect to the session state, parameterized on the
//! authorization key and session identifier fixed at construction and
//! the salt passed per call (outbound) or read from the envelope
//! (inbound).
use crate::errors::DeserializeError;
use crate::manual_tl::{GzipPacked, Message, MessageContainer};
use ferrogram_crypto::{decrypt_data_v2, encrypt_data_v2, AuthKey, Side};
use ferrogram_tl::{Cursor, Deserializable, Identifiable, Serializable};

/// A decrypted inbound payload.
///
/// `messages` is the ordered list of protocol messages the payload
/// carried: a single one for plain messages, or every inner message in
/// order when the payload was a container. Compressed bodies arrive
/// already decompressed.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// The salt the server attached to this payload.
    pub salt: i64,
    pub messages: Vec<Message>,
}

/// Encrypts outbound messages and decrypts inbound payloads for one
/// session.
pub struct Codec {
    auth_key: AuthKey,
    session_id: i64,
}

impl Codec {
    pub fn new(auth_key: [u8; 256], session_id: i64) -> Self {
        Self {
            auth_key: AuthKey::from_bytes(auth_key),
            session_id,
        }
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    /// Serializes and encrypts a single outbound message under the given
    /// salt, emitting `auth_key_id || msg_key || ciphertext`.
    pub fn pack(&self, message: &Message, salt: i64) -> Vec<u8> {
        let mut plaintext =
            Vec::with_capacity(8 + 8 + Message::SIZE_OVERHEAD + message.body.len());
        salt.serialize(&mut plaintext);
        self.session_id.serialize(&mut plaintext);
        message.serialize(&mut plaintext);

        encrypt_data_v2(&plaintext, &self.auth_key, Side::Client)
    }

    /// Decrypts, authenticates and demultiplexes an inbound payload.
    ///
    /// Rejects payloads whose authorization key id, session id or
    /// message key do not match, and server message ids without the
    /// server-origin parity (low bit set).
    pub fn unpack(&self, payload: &[u8]) -> Result<Envelope, DeserializeError> {
        if payload.len() < 24 {
            return Err(DeserializeError::MessageBufferTooSmall);
        }

        let plaintext = decrypt_data_v2(payload, &self.auth_key, Side::Server)?;
        let mut buffer = Cursor::from_slice(&plaintext);

        let salt = i64::deserialize(&mut buffer)?;
        let session_id = i64::deserialize(&mut buffer)?;
        if session_id != self.session_id {
            return Err(DeserializeError::SessionIdMismatch {
                got: session_id,
                expected: self.session_id,
            });
        }

        let message = Message::deserialize(&mut buffer)?;
        if message.msg_id % 2 == 0 {
            return Err(DeserializeError::BadMessageId {
                got: message.msg_id,
            });
        }

        Ok(Envelope {
            salt,
            messages: expand_message(message)?,
        })
    }
}

/// Flattens a container into its inner messages and peels any
/// `gzip_packed` wrappers, preserving order.
fn expand_message(message: Message) -> Result<Vec<Message>, DeserializeError> {
    let message = decompress_body(message)?;
    match message.constructor_id() {
        Ok(MessageContainer::CONSTRUCTOR_ID) => {
            let container = MessageContainer::from_bytes(&message.body)?;
            log::debug!("expanding container with {} messages", container.messages.len());
            container
                .messages
                .into_iter()
                .map(decompress_body)
                .collect()
        }
        _ => Ok(vec![message]),
    }
}

fn decompress_body(message: Message) -> Result<Message, DeserializeError> {
    match message.constructor_id() {
        Ok(GzipPacked::CONSTRUCTOR_ID) => {
            let body = GzipPacked::from_bytes(&message.body)?.decompress()?;
            Ok(Message { body, ..message })
        }
        _ => Ok(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg_factory::MsgFactory;
    use crate::testing::ServerCodec;
    use ferrogram_tl::{functions, types};

    const SESSION_ID: i64 = 0x1234567890abcdef_u64 as i64;

    fn test_auth_key() -> [u8; 256] {
        let mut buffer = [0u8; 256];
        buffer
            .iter_mut()
            .enumerate()
            .for_each(|(i, x)| *x = i as u8);
        buffer
    }

    #[test]
    fn packed_messages_decrypt_on_the_server_side() {
        let codec = Codec::new(test_auth_key(), SESSION_ID);
        let server = ServerCodec::new(test_auth_key(), SESSION_ID);
        let factory = MsgFactory::new();

        let body = functions::Ping { ping_id: 7 }.to_bytes();
        let message = factory.wrap(functions::Ping::CONSTRUCTOR_ID, body);
        let payload = codec.pack(&message, 0x11223344);

        let (salt, got) = server.decrypt_client_payload(&payload).unwrap();
        assert_eq!(salt, 0x11223344);
        assert_eq!(got, message);
    }

    #[test]
    fn unpack_restores_server_message() {
        let codec = Codec::new(test_auth_key(), SESSION_ID);
        let mut server = ServerCodec::new(test_auth_key(), SESSION_ID);

        let pong = types::Pong {
            msg_id: 4,
            ping_id: 7,
        };
        let payload = server.encrypt_message(99, &pong.to_bytes(), false);
        let envelope = codec.unpack(&payload).unwrap();

        assert_eq!(envelope.salt, 99);
        assert_eq!(envelope.messages.len(), 1);
        assert_eq!(envelope.messages[0].body, pong.to_bytes());
        assert_eq!(envelope.messages[0].msg_id % 2, 1);
    }

    #[test]
    fn unpack_flattens_containers_in_order() {
        let codec = Codec::new(test_auth_key(), SESSION_ID);
        let mut server = ServerCodec::new(test_auth_key(), SESSION_ID);

        let bodies: Vec<Vec<u8>> = (0..3)
            .map(|i| {
                types::Pong {
                    msg_id: i,
                    ping_id: i,
                }
                .to_bytes()
            })
            .collect();
        let with_flags: Vec<(Vec<u8>, bool)> =
            bodies.iter().map(|b| (b.clone(), true)).collect();
        let payload = server.encrypt_container(1, &with_flags);

        let envelope = codec.unpack(&payload).unwrap();
        let got: Vec<Vec<u8>> = envelope.messages.into_iter().map(|m| m.body).collect();
        assert_eq!(got, bodies);
    }

    #[test]
    fn unpack_decompresses_gzipped_bodies() {
        let codec = Codec::new(test_auth_key(), SESSION_ID);
        let mut server = ServerCodec::new(test_auth_key(), SESSION_ID);

        let body = types::NewSessionCreated {
            first_msg_id: 1,
            unique_id: 2,
            server_salt: 3,
        }
        .to_bytes();
        let packed = GzipPacked::new(&body).to_bytes();
        let payload = server.encrypt_message(1, &packed, true);

        let envelope = codec.unpack(&payload).unwrap();
        assert_eq!(envelope.messages[0].body, body);
    }

    #[test]
    fn unpack_rejects_foreign_auth_key_id() {
        let codec = Codec::new(test_auth_key(), SESSION_ID);
        let mut server = ServerCodec::new(test_auth_key(), SESSION_ID);

        let mut payload = server.encrypt_message(0, &[0, 0, 0, 0], false);
        payload[3] ^= 0xff;
        assert_eq!(
            codec.unpack(&payload),
            Err(DeserializeError::AuthKeyMismatch)
        );
    }

    #[test]
    fn unpack_rejects_foreign_session_id() {
        let codec = Codec::new(test_auth_key(), SESSION_ID);
        let mut server = ServerCodec::new(test_auth_key(), SESSION_ID + 1);

        let payload = server.encrypt_message(0, &[0, 0, 0, 0], false);
        assert_eq!(
            codec.unpack(&payload),
            Err(DeserializeError::SessionIdMismatch {
                got: SESSION_ID + 1,
                expected: SESSION_ID,
            })
        );
    }

    #[test]
    fn unpack_rejects_tampered_ciphertext() {
        let codec = Codec::new(test_auth_key(), SESSION_ID);
        let mut server = ServerCodec::new(test_auth_key(), SESSION_ID);

        let mut payload = server.encrypt_message(0, &[0, 0, 0, 0], false);
        let last = payload.len() - 1;
        payload[last] ^= 0xff;
        assert_eq!(codec.unpack(&payload), Err(DeserializeError::MsgKeyMismatch));
    }

    #[test]
    fn unpack_rejects_client_parity_msg_id() {
        let codec = Codec::new(test_auth_key(), SESSION_ID);
        let mut server = ServerCodec::new(test_auth_key(), SESSION_ID);

        let message = Message {
            msg_id: 1 << 32, // low bit unset: not a server-assigned id
            seq_no: 1,
            body: vec![0, 0, 0, 0],
        };
        let payload = server.encrypt_raw(0, &message);
        assert_eq!(
            codec.unpack(&payload),
            Err(DeserializeError::BadMessageId { got: 1 << 32 })
        );
    }

    #[test]
    fn unpack_rejects_short_buffers() {
        let codec = Codec::new(test_auth_key(), SESSION_ID);
        assert_eq!(
            codec.unpack(&[0; 8]),
            Err(DeserializeError::MessageBufferTooSmall)
        );
    }
}
