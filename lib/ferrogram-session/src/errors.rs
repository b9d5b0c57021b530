// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use ferrogram_mtproto::DeserializeError;
use ferrogram_tl as tl;
use std::{fmt, io};

/// The error type reported by the server when a request is misused.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// A numerical value similar to HTTP status codes.
    pub code: i32,

    /// The ASCII error name, normally in screaming snake case.
    ///
    /// Digit words are removed from the name and put in the
    /// [`RpcError::value`] instead.
    pub name: String,

    /// If the error contained an additional integer value, it will be
    /// present here and removed from the [`RpcError::name`].
    pub value: Option<u32>,

    /// The constructor identifier of the request that triggered this error.
    /// Won't be present if the error was artificially constructed.
    pub caused_by: Option<u32>,
}

impl std::error::Error for RpcError {}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.name)?;
        if let Some(caused_by) = self.caused_by {
            write!(f, " caused by {caused_by:08x}")?;
        }
        if let Some(value) = self.value {
            write!(f, " (value: {value})")?;
        }
        Ok(())
    }
}

impl From<tl::types::RpcError> for RpcError {
    fn from(error: tl::types::RpcError) -> Self {
        // Extract the numeric value in the error, if any
        if let Some((value, parsed_value)) = error
            .error_message
            .split(|c: char| !c.is_ascii_digit())
            .flat_map(|value| {
                value
                    .parse::<u32>()
                    .map(|parsed_value| (value, parsed_value))
            })
            .next()
        {
            let mut to_remove = String::with_capacity(1 + value.len());
            to_remove.push('_');
            to_remove.push_str(value);
            Self {
                code: error.error_code,
                name: error.error_message.replace(&to_remove, ""),
                value: Some(parsed_value),
                caused_by: None,
            }
        } else {
            Self {
                code: error.error_code,
                name: error.error_message.clone(),
                value: None,
                caused_by: None,
            }
        }
    }
}

impl RpcError {
    /// Matches on the name of the RPC error (case-sensitive).
    ///
    /// Useful in `match` arm guards. A single trailing or leading
    /// asterisk (`'*'`) is allowed, and will instead check if the error
    /// name starts (or ends with) the input parameter.
    pub fn is(&self, rpc_error: &str) -> bool {
        if let Some(rpc_error) = rpc_error.strip_suffix('*') {
            self.name.starts_with(rpc_error)
        } else if let Some(rpc_error) = rpc_error.strip_prefix('*') {
            self.name.ends_with(rpc_error)
        } else {
            self.name == rpc_error
        }
    }

    /// Whether this error indicates a server-side failure (a 5xx code),
    /// which is transient and worth retrying.
    pub fn is_internal_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Attaches the constructor identifier of the request that caused
    /// this error to the error information.
    pub fn with_caused_by(mut self, constructor_id: u32) -> Self {
        self.caused_by = Some(constructor_id);
        self
    }
}

/// Human-readable explanation for a `bad_msg_notification` error code.
pub(crate) fn bad_message_description(code: i32) -> String {
    match code {
        16 => "msg_id too low, the client time has to be synchronized".into(),
        17 => "msg_id too high, the client time has to be synchronized".into(),
        18 => "incorrect two lower order msg_id bits, the server expects client message msg_id to be divisible by 4".into(),
        19 => "container msg_id is the same as msg_id of a previously received message".into(),
        20 => "message too old, it cannot be verified by the server".into(),
        32 => "msg_seqno too low".into(),
        33 => "msg_seqno too high".into(),
        34 => "an even msg_seqno expected, but odd received".into(),
        35 => "odd msg_seqno expected, but even received".into(),
        48 => "incorrect server salt".into(),
        64 => "invalid container".into(),
        other => format!("Error code {other}"),
    }
}

/// This error occurs when a Remote Procedure Call was unsuccessful.
#[derive(Debug)]
pub enum InvocationError {
    /// The request invocation failed because it was invalid or the server
    /// could not process it successfully.
    Rpc(RpcError),

    /// The message carrying the request violated the protocol (or the
    /// client's clock is skewed); the server ignored it.
    BadMessage { code: i32 },

    /// Standard I/O error while connecting, sending or receiving.
    Io(io::Error),

    /// No response arrived within the allotted wait, or the session was
    /// stopped while the request was in flight.
    Timeout,

    /// The response arrived but could not be deserialized.
    Deserialize(DeserializeError),

    /// The request was dropped and the result will never arrive.
    Dropped,
}

impl std::error::Error for InvocationError {}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(err) => write!(f, "request error: {err}"),
            Self::BadMessage { code } => {
                write!(f, "request error: [{code}] {}", bad_message_description(*code))
            }
            Self::Io(err) => write!(f, "request error: {err}"),
            Self::Timeout => write!(f, "request error: timed out"),
            Self::Deserialize(err) => write!(f, "request error: {err}"),
            Self::Dropped => write!(f, "request error: dropped (cancelled)"),
        }
    }
}

impl From<io::Error> for InvocationError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<DeserializeError> for InvocationError {
    fn from(error: DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

impl From<tl::deserialize::Error> for InvocationError {
    fn from(error: tl::deserialize::Error) -> Self {
        Self::Deserialize(error.into())
    }
}

impl InvocationError {
    /// Matches on the name of the RPC error (case-sensitive).
    ///
    /// If the error is not a RPC error, returns `false`.
    #[inline]
    pub fn is(&self, rpc_error: &str) -> bool {
        match self {
            Self::Rpc(rpc) => rpc.is(rpc_error),
            _ => false,
        }
    }

    /// Only transport-shaped failures (and server 5xx) are worth
    /// re-sending the exact same request for.
    pub(crate) fn should_retry(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout => true,
            Self::Rpc(rpc) => rpc.is_internal_server_error(),
            _ => false,
        }
    }

    /// Whether a failure during connection setup should simply be
    /// retried with a fresh connection.
    pub(crate) fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Deserialize(_) | Self::Dropped)
    }
}
