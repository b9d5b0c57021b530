// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Delivery of server-pushed updates to whoever consumes the session.
use std::sync::Arc;
use tokio::sync::mpsc;

/// The interface the session uses to talk back to its consumer.
///
/// Implemented by the client embedding a session. The session holds a
/// shared handle to the sink, never to the client itself, so no
/// reference cycle forms.
pub trait UpdateSink: Send + Sync + 'static {
    /// Receives the raw body of a server-pushed update.
    ///
    /// Called from the session's worker task; implementations should
    /// hand the body off rather than process it in place.
    fn deliver(&self, update: Vec<u8>);

    /// Invoked after the session has fully stopped.
    fn on_disconnect(&self) {}
}

/// The default [`UpdateSink`]: an unbounded queue of raw update bodies.
pub struct UpdateQueue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl UpdateQueue {
    /// Creates the sink and the receiving end the consumer reads from.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl UpdateSink for UpdateQueue {
    fn deliver(&self, update: Vec<u8>) {
        // The consumer having gone away is not the session's problem.
        let _ = self.tx.send(update);
    }
}
