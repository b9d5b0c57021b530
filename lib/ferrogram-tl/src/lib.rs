// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A minimal runtime for Telegram's [Type Language], along with the
//! mtproto service messages the session layer needs to speak.
//!
//! Concrete high-level API payloads are intentionally not modelled here;
//! responses whose schema this crate does not know are surfaced as a raw
//! [`Blob`] for an upper layer to interpret.
//!
//! [Type Language]: https://core.telegram.org/mtproto/TL
pub mod deserialize;
pub mod functions;
pub mod serialize;
pub mod types;

pub use deserialize::{Cursor, Deserializable};
pub use serialize::Serializable;

/// The API layer announced to the server via `invoke_with_layer`.
pub const LAYER: i32 = 158;

/// Anything implementing this trait is identifiable by its
/// 32-bit constructor identifier from the TL schema.
pub trait Identifiable {
    const CONSTRUCTOR_ID: u32;
}

/// Structures implementing this trait indicate that they are suitable for
/// use to perform Remote Procedure Calls, and know what the type of the
/// response will be.
pub trait RemoteCall: Serializable {
    /// The type of the "return" value coming from the other end of the
    /// connection.
    type Return: Deserializable;
}

/// An opaque, unparsed TL object.
///
/// Used as the return type of calls whose response schema is outside the
/// scope of this crate; the raw bytes are handed to the caller as-is.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob(pub Vec<u8>);

impl Deserializable for Blob {
    fn deserialize(buf: &mut Cursor) -> Result<Self, deserialize::Error> {
        let mut bytes = Vec::new();
        buf.read_to_end(&mut bytes);
        Ok(Self(bytes))
    }
}
