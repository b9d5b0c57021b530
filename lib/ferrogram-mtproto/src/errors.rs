// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Errors that can occur while processing server payloads.
use ferrogram_crypto as crypto;
use ferrogram_tl as tl;
use std::fmt;

/// The error type for the deserialization of server messages.
///
/// Failures of this kind are logged and the offending packet dropped;
/// they never abort the session.
#[derive(Clone, Debug, PartialEq)]
pub enum DeserializeError {
    /// The payload carries the ID of a different authorization key.
    AuthKeyMismatch,

    /// The decrypted envelope belongs to a different session.
    SessionIdMismatch { got: i64, expected: i64 },

    /// The embedded message key did not match the decrypted payload.
    MsgKeyMismatch,

    /// The server's message ID did not have the server-origin parity.
    BadMessageId { got: i64 },

    /// The received buffer is too small to contain a valid response message,
    /// or the response seemed valid at first but trying to deserialize it
    /// proved the buffer to be too small.
    MessageBufferTooSmall,

    /// The ciphertext is not padded as the cipher requires.
    InvalidBuffer,

    /// The server responded with compressed data which we failed to decompress.
    DecompressionFailed,

    /// While deserializing the response types one of them had a constructor
    /// that did not match our expectations. The invalid ID is contained
    /// within this variant.
    UnexpectedConstructor { id: u32 },
}

impl std::error::Error for DeserializeError {}

impl fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::AuthKeyMismatch => write!(f, "server authkey mismatches with ours"),
            Self::SessionIdMismatch { got, expected } => {
                write!(f, "bad session id (got {got}, expected {expected})")
            }
            Self::MsgKeyMismatch => write!(f, "server msgkey mismatches with ours"),
            Self::BadMessageId { got } => write!(f, "bad server message id (got {got})"),
            Self::MessageBufferTooSmall => write!(
                f,
                "server responded with a payload that's too small to fit a valid message"
            ),
            Self::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Self::DecompressionFailed => write!(f, "failed to decompress server's data"),
            Self::UnexpectedConstructor { id } => write!(f, "unexpected constructor: {id:08x}"),
        }
    }
}

impl From<crypto::Error> for DeserializeError {
    fn from(error: crypto::Error) -> Self {
        match error {
            crypto::Error::InvalidBuffer => Self::InvalidBuffer,
            crypto::Error::AuthKeyMismatch => Self::AuthKeyMismatch,
            crypto::Error::MessageKeyMismatch => Self::MsgKeyMismatch,
        }
    }
}

impl From<tl::deserialize::Error> for DeserializeError {
    fn from(error: tl::deserialize::Error) -> Self {
        use tl::deserialize::Error as Err;

        match error {
            Err::UnexpectedEof => Self::MessageBufferTooSmall,
            Err::UnexpectedConstructor { id } => Self::UnexpectedConstructor { id },
        }
    }
}
