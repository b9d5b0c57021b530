// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The stateful conduit between a client and one datacenter.
//!
//! A [`Session`] multiplexes encrypted requests and responses over a
//! single long-lived connection: it frames and encrypts outbound
//! messages, decrypts and demultiplexes inbound ones, tracks server
//! salts, answers and emits service messages (pings, acknowledgments,
//! bad-message notifications, salt rotation), correlates requests with
//! their responses, and recovers from transport failure.
//!
//! Creating a session requires an already-established authorization key;
//! negotiating one is a concern of a lower layer.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ferrogram_session::{Session, TcpConnector, UpdateQueue};
//! use ferrogram_tl::functions;
//!
//! # async fn run(auth_key: [u8; 256]) -> Result<(), ferrogram_session::InvocationError> {
//! let (updates, _update_rx) = UpdateQueue::new();
//! let session = Session::new(
//!     TcpConnector::new(2, false, None),
//!     auth_key,
//!     12345,
//!     false,
//!     Some(updates),
//! );
//!
//! session.start().await?;
//! let pong = session.send(&functions::Ping { ping_id: 7 }).await?;
//! assert_eq!(pong.ping_id, 7);
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod errors;
mod net;
mod session;
mod updates;

pub use errors::{InvocationError, RpcError};
pub use net::{Connection, Connector, TcpConnection, TcpConnector};
pub use session::{Session, MAX_RETRIES, WAIT_TIMEOUT};
pub use updates::{UpdateQueue, UpdateSink};
