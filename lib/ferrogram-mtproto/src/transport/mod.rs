// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Implementation of the byte-level transport frames that delimit
//! encrypted payloads on a raw stream.
mod full;

pub use full::Full;

use std::fmt;

/// The error type reported by the transport when a frame is malformed.
///
/// Unless the variant is `MissingBytes`, the connection should not
/// continue.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Not enough bytes have arrived yet to decode a full frame.
    MissingBytes,

    /// The length is either too short or too long to represent a valid packet.
    BadLen { got: i32 },

    /// The sequence number received does not match the expected value.
    BadSeq { expected: i32, got: i32 },

    /// The checksum of the packet does not match its expected value.
    BadCrc { expected: u32, got: u32 },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: ")?;
        match self {
            Error::MissingBytes => write!(f, "need more bytes"),
            Error::BadLen { got } => write!(f, "bad len (got {got})"),
            Error::BadSeq { expected, got } => {
                write!(f, "bad seq (expected {expected}, got {got})")
            }
            Error::BadCrc { expected, got } => {
                write!(f, "bad crc (expected {expected}, got {got})")
            }
        }
    }
}

/// Offsets into the input buffer after a successful [`Transport::unpack`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnpackedOffset {
    pub data_start: usize,
    pub data_end: usize,
    pub next_offset: usize,
}

/// A transport is able to pack outgoing payloads into frames and to
/// locate the payload inside frames read back from the stream.
pub trait Transport: Send {
    /// Appends a frame carrying `payload` to `buffer`.
    ///
    /// Panics if `payload` is not padded to 4 bytes.
    fn pack(&mut self, payload: &[u8], buffer: &mut Vec<u8>);

    /// Decodes one frame from the front of `buffer`, returning where the
    /// payload lives and where the next frame begins.
    fn unpack(&mut self, buffer: &[u8]) -> Result<UnpackedOffset, Error>;

    /// Resets the transport state, as done after a reconnection.
    fn reset(&mut self);
}
