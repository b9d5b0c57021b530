// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The byte transport the session runs over.
//!
//! The session only ever sees whole framed packets; how they travel is
//! the [`Connection`]'s business. The production implementation is
//! [`TcpConnection`], but tests drive the session through scripted
//! in-memory connections implementing the same traits.
mod datacenter;
mod tcp;

pub use tcp::{TcpConnection, TcpConnector};

use std::future::Future;
use std::io;

/// A single established transport connection.
///
/// `send` and `recv` may be called concurrently (the session writes from
/// the send path while the receive task reads), but only one task reads
/// at a time. `close` must be idempotent and cause a pending or future
/// `recv` to resolve to `Ok(None)`.
pub trait Connection: Send + Sync + 'static {
    /// Transmits one framed packet.
    fn send(&self, payload: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Receives one framed packet; `Ok(None)` signals end of stream.
    fn recv(&self) -> impl Future<Output = io::Result<Option<Vec<u8>>>> + Send;

    /// Tears the connection down.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Produces fresh [`Connection`]s for a fixed destination.
///
/// The session holds one of these for its whole lifetime and dials a new
/// connection on every (re)start.
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Conn>> + Send;
}
