// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Cryptographic utilities for the MTProto 2.0 transport.
//!
//! The main entry points are [`encrypt_data_v2`] and [`decrypt_data_v2`],
//! which turn an already-serialized message envelope into the outer
//! `auth_key_id || msg_key || ciphertext` payload and back. Both are
//! parameterized on the [`Side`] the message originates from, so the same
//! primitives serve the client and, in tests, an impersonated server.
pub mod aes;
mod auth_key;

pub use auth_key::AuthKey;
use getrandom::getrandom;
use std::fmt;

/// SHA-1 over the concatenation of `parts`.
pub(crate) fn sha1(parts: &[&[u8]]) -> [u8; 20] {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    parts.iter().for_each(|part| hasher.update(part));
    hasher.finalize().into()
}

/// SHA-256 over the concatenation of `parts`.
fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    parts.iter().for_each(|part| hasher.update(part));
    hasher.finalize().into()
}

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The ciphertext is either too small or not padded correctly.
    InvalidBuffer,

    /// The payload carries the ID of a different authorization key.
    AuthKeyMismatch,

    /// The key of the message did not match our expectations.
    MessageKeyMismatch,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Error::AuthKeyMismatch => write!(f, "authkey mismatches with ours"),
            Error::MessageKeyMismatch => write!(f, "msgkey mismatches with ours"),
        }
    }
}

/// The originating side of an encrypted message.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    // "where x = 0 for messages from client to server and x = 8 for those from server to client."
    fn x(&self) -> usize {
        match *self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

/// Calculate the key based on Telegram [guidelines for MTProto 2],
/// returning the pair `(key, iv)` for use in AES-IGE mode.
///
/// [guidelines for MTProto 2]: https://core.telegram.org/mtproto/description#defining-aes-key-and-initialization-vector
pub fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();

    // sha256_a = SHA256 (msg_key + substr (auth_key, x, 36));
    let sha256_a = sha256(&[&msg_key[..], &auth_key.data[x..x + 36]]);

    // sha256_b = SHA256 (substr (auth_key, 40+x, 36) + msg_key);
    let sha256_b = sha256(&[&auth_key.data[40 + x..40 + x + 36], &msg_key[..]]);

    // aes_key = substr (sha256_a, 0, 8) + substr (sha256_b, 8, 16) + substr (sha256_a, 24, 8);
    let aes_key = {
        let mut buffer = [0; 32];
        buffer[0..8].copy_from_slice(&sha256_a[0..8]);
        buffer[8..8 + 16].copy_from_slice(&sha256_b[8..8 + 16]);
        buffer[24..24 + 8].copy_from_slice(&sha256_a[24..24 + 8]);
        buffer
    };

    // aes_iv = substr (sha256_b, 0, 8) + substr (sha256_a, 8, 16) + substr (sha256_b, 24, 8);
    let aes_iv = {
        let mut buffer = [0; 32];
        buffer[0..8].copy_from_slice(&sha256_b[0..8]);
        buffer[8..8 + 16].copy_from_slice(&sha256_a[8..8 + 16]);
        buffer[24..24 + 8].copy_from_slice(&sha256_b[24..24 + 8]);
        buffer
    };

    (aes_key, aes_iv)
}

/// Determines the padding length needed for a plaintext of a certain length,
/// according to the following citation:
///
/// > Note that MTProto 2.0 requires from 12 to 1024 bytes of padding
/// > [...] the resulting message length be divisible by 16 bytes
fn determine_padding_v2_length(len: usize) -> usize {
    16 + (16 - (len % 16))
}

// Inner body of `encrypt_data_v2`, separated for testing purposes.
fn do_encrypt_data_v2(
    plaintext: &[u8],
    auth_key: &AuthKey,
    side: Side,
    random_padding: &[u8; 32],
) -> Vec<u8> {
    let padding_len = determine_padding_v2_length(plaintext.len());

    let mut padded = Vec::with_capacity(plaintext.len() + padding_len);
    padded.extend(plaintext);
    padded.extend(random_padding.iter().take(padding_len));

    let x = side.x();

    // msg_key_large = SHA256 (substr (auth_key, 88+x, 32) + plaintext + random_padding);
    let msg_key_large = sha256(&[&auth_key.data[88 + x..88 + x + 32], &padded[..]]);

    // msg_key = substr (msg_key_large, 8, 16);
    let msg_key = {
        let mut buffer = [0; 16];
        buffer.copy_from_slice(&msg_key_large[8..8 + 16]);
        buffer
    };

    let (key, iv) = calc_key(auth_key, &msg_key, side);
    aes::ige_encrypt(&mut padded, &key, &iv);

    let mut result = Vec::with_capacity(8 + 16 + padded.len());
    result.extend(auth_key.key_id);
    result.extend(msg_key);
    result.extend(padded);
    result
}

/// Encrypts the given message envelope following the
/// [MTProto 2.0 guidelines], emitting `auth_key_id || msg_key || ciphertext`.
///
/// [MTProto 2.0 guidelines]: https://core.telegram.org/mtproto/description
pub fn encrypt_data_v2(plaintext: &[u8], auth_key: &AuthKey, side: Side) -> Vec<u8> {
    let random_padding = {
        let mut rnd = [0; 32];
        getrandom(&mut rnd).expect("failed to generate a secure padding");
        rnd
    };

    do_encrypt_data_v2(plaintext, auth_key, side, &random_padding)
}

/// The inverse of [`encrypt_data_v2`]. `side` is the side the payload
/// originates from, which for a client session is [`Side::Server`].
///
/// Validates the leading authorization key ID and, once decrypted, that
/// the embedded message key matches the payload.
pub fn decrypt_data_v2(ciphertext: &[u8], auth_key: &AuthKey, side: Side) -> Result<Vec<u8>, Error> {
    let x = side.x();

    if ciphertext.len() < 24 || (ciphertext.len() - 24) % 16 != 0 {
        return Err(Error::InvalidBuffer);
    }

    let key_id = &ciphertext[..8];
    if auth_key.key_id != *key_id {
        return Err(Error::AuthKeyMismatch);
    }

    let msg_key = {
        let mut buffer = [0; 16];
        buffer.copy_from_slice(&ciphertext[8..8 + 16]);
        buffer
    };

    let (key, iv) = calc_key(auth_key, &msg_key, side);
    let plaintext = aes::ige_decrypt(&ciphertext[24..], &key, &iv);

    // https://core.telegram.org/mtproto/security_guidelines#mtproto-encrypted-messages
    let our_key = sha256(&[&auth_key.data[88 + x..88 + x + 32], &plaintext[..]]);

    if msg_key != our_key[8..8 + 16] {
        return Err(Error::MessageKeyMismatch);
    }

    Ok(plaintext)
}
