// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Concrete mtproto service types.
//!
//! Unlike generated schemas, each type here reads and writes its own
//! constructor identifier, since the session dispatches on the identifier
//! it peeks from the message body.
use crate::deserialize::{Cursor, Error};
use crate::{Deserializable, Identifiable, Serializable};

fn expect_constructor(buf: &mut Cursor, expected: u32) -> Result<(), Error> {
    let id = u32::deserialize(buf)?;
    if id != expected {
        return Err(Error::UnexpectedConstructor { id });
    }
    Ok(())
}

/// `pong#347773c5 msg_id:long ping_id:long = Pong;`
#[derive(Clone, Debug, PartialEq)]
pub struct Pong {
    pub msg_id: i64,
    pub ping_id: i64,
}

impl Identifiable for Pong {
    const CONSTRUCTOR_ID: u32 = 0x347773c5;
}

impl Serializable for Pong {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_id.serialize(buf);
        self.ping_id.serialize(buf);
    }
}

impl Deserializable for Pong {
    fn deserialize(buf: &mut Cursor) -> Result<Self, Error> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            msg_id: i64::deserialize(buf)?,
            ping_id: i64::deserialize(buf)?,
        })
    }
}

/// `bad_msg_notification#a7eff811 bad_msg_id:long bad_msg_seqno:int
/// error_code:int = BadMsgNotification;`
#[derive(Clone, Debug, PartialEq)]
pub struct BadMsgNotification {
    pub bad_msg_id: i64,
    pub bad_msg_seqno: i32,
    pub error_code: i32,
}

impl Identifiable for BadMsgNotification {
    const CONSTRUCTOR_ID: u32 = 0xa7eff811;
}

impl Serializable for BadMsgNotification {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.bad_msg_id.serialize(buf);
        self.bad_msg_seqno.serialize(buf);
        self.error_code.serialize(buf);
    }
}

impl Deserializable for BadMsgNotification {
    fn deserialize(buf: &mut Cursor) -> Result<Self, Error> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            bad_msg_id: i64::deserialize(buf)?,
            bad_msg_seqno: i32::deserialize(buf)?,
            error_code: i32::deserialize(buf)?,
        })
    }
}

/// `bad_server_salt#edab447b bad_msg_id:long bad_msg_seqno:int
/// error_code:int new_server_salt:long = BadMsgNotification;`
#[derive(Clone, Debug, PartialEq)]
pub struct BadServerSalt {
    pub bad_msg_id: i64,
    pub bad_msg_seqno: i32,
    pub error_code: i32,
    pub new_server_salt: i64,
}

impl Identifiable for BadServerSalt {
    const CONSTRUCTOR_ID: u32 = 0xedab447b;
}

impl Serializable for BadServerSalt {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.bad_msg_id.serialize(buf);
        self.bad_msg_seqno.serialize(buf);
        self.error_code.serialize(buf);
        self.new_server_salt.serialize(buf);
    }
}

impl Deserializable for BadServerSalt {
    fn deserialize(buf: &mut Cursor) -> Result<Self, Error> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            bad_msg_id: i64::deserialize(buf)?,
            bad_msg_seqno: i32::deserialize(buf)?,
            error_code: i32::deserialize(buf)?,
            new_server_salt: i64::deserialize(buf)?,
        })
    }
}

/// `new_session_created#9ec20908 first_msg_id:long unique_id:long
/// server_salt:long = NewSession;`
#[derive(Clone, Debug, PartialEq)]
pub struct NewSessionCreated {
    pub first_msg_id: i64,
    pub unique_id: i64,
    pub server_salt: i64,
}

impl Identifiable for NewSessionCreated {
    const CONSTRUCTOR_ID: u32 = 0x9ec20908;
}

impl Serializable for NewSessionCreated {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.first_msg_id.serialize(buf);
        self.unique_id.serialize(buf);
        self.server_salt.serialize(buf);
    }
}

impl Deserializable for NewSessionCreated {
    fn deserialize(buf: &mut Cursor) -> Result<Self, Error> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            first_msg_id: i64::deserialize(buf)?,
            unique_id: i64::deserialize(buf)?,
            server_salt: i64::deserialize(buf)?,
        })
    }
}

/// `msgs_ack#62d6b459 msg_ids:Vector<long> = MsgsAck;`
#[derive(Clone, Debug, PartialEq)]
pub struct MsgsAck {
    pub msg_ids: Vec<i64>,
}

impl Identifiable for MsgsAck {
    const CONSTRUCTOR_ID: u32 = 0x62d6b459;
}

impl Serializable for MsgsAck {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_ids.serialize(buf);
    }
}

impl Deserializable for MsgsAck {
    fn deserialize(buf: &mut Cursor) -> Result<Self, Error> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            msg_ids: Vec::<i64>::deserialize(buf)?,
        })
    }
}

/// `msg_detailed_info#276d3ec6 msg_id:long answer_msg_id:long bytes:int
/// status:int = MsgDetailedInfo;`
#[derive(Clone, Debug, PartialEq)]
pub struct MsgDetailedInfo {
    pub msg_id: i64,
    pub answer_msg_id: i64,
    pub bytes: i32,
    pub status: i32,
}

impl Identifiable for MsgDetailedInfo {
    const CONSTRUCTOR_ID: u32 = 0x276d3ec6;
}

impl Serializable for MsgDetailedInfo {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_id.serialize(buf);
        self.answer_msg_id.serialize(buf);
        self.bytes.serialize(buf);
        self.status.serialize(buf);
    }
}

impl Deserializable for MsgDetailedInfo {
    fn deserialize(buf: &mut Cursor) -> Result<Self, Error> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            msg_id: i64::deserialize(buf)?,
            answer_msg_id: i64::deserialize(buf)?,
            bytes: i32::deserialize(buf)?,
            status: i32::deserialize(buf)?,
        })
    }
}

/// `msg_new_detailed_info#809db6df answer_msg_id:long bytes:int
/// status:int = MsgDetailedInfo;`
#[derive(Clone, Debug, PartialEq)]
pub struct MsgNewDetailedInfo {
    pub answer_msg_id: i64,
    pub bytes: i32,
    pub status: i32,
}

impl Identifiable for MsgNewDetailedInfo {
    const CONSTRUCTOR_ID: u32 = 0x809db6df;
}

impl Serializable for MsgNewDetailedInfo {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.answer_msg_id.serialize(buf);
        self.bytes.serialize(buf);
        self.status.serialize(buf);
    }
}

impl Deserializable for MsgNewDetailedInfo {
    fn deserialize(buf: &mut Cursor) -> Result<Self, Error> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            answer_msg_id: i64::deserialize(buf)?,
            bytes: i32::deserialize(buf)?,
            status: i32::deserialize(buf)?,
        })
    }
}

/// `future_salt#0949d9dc valid_since:int valid_until:int salt:long = FutureSalt;`
///
/// Always bare on the wire: `future_salts` carries these without the
/// constructor identifier in front of each item.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FutureSalt {
    pub valid_since: i32,
    pub valid_until: i32,
    pub salt: i64,
}

impl Identifiable for FutureSalt {
    const CONSTRUCTOR_ID: u32 = 0x0949d9dc;
}

impl Serializable for FutureSalt {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.valid_since.serialize(buf);
        self.valid_until.serialize(buf);
        self.salt.serialize(buf);
    }
}

impl Deserializable for FutureSalt {
    fn deserialize(buf: &mut Cursor) -> Result<Self, Error> {
        Ok(Self {
            valid_since: i32::deserialize(buf)?,
            valid_until: i32::deserialize(buf)?,
            salt: i64::deserialize(buf)?,
        })
    }
}

/// `future_salts#ae500895 req_msg_id:long now:int
/// salts:vector<future_salt> = FutureSalts;`
///
/// Note the bare `vector`: the items are counted but carry no
/// constructor identifiers.
#[derive(Clone, Debug, PartialEq)]
pub struct FutureSalts {
    pub req_msg_id: i64,
    pub now: i32,
    pub salts: Vec<FutureSalt>,
}

impl Identifiable for FutureSalts {
    const CONSTRUCTOR_ID: u32 = 0xae500895;
}

impl Serializable for FutureSalts {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        self.now.serialize(buf);
        (self.salts.len() as i32).serialize(buf);
        self.salts.iter().for_each(|salt| salt.serialize(buf));
    }
}

impl Deserializable for FutureSalts {
    fn deserialize(buf: &mut Cursor) -> Result<Self, Error> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        let req_msg_id = i64::deserialize(buf)?;
        let now = i32::deserialize(buf)?;
        let len = i32::deserialize(buf)?.max(0) as usize;
        let mut salts = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            salts.push(FutureSalt::deserialize(buf)?);
        }
        Ok(Self {
            req_msg_id,
            now,
            salts,
        })
    }
}

/// `rpc_error#2144ca19 error_code:int error_message:string = RpcError;`
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    pub error_code: i32,
    pub error_message: String,
}

impl Identifiable for RpcError {
    const CONSTRUCTOR_ID: u32 = 0x2144ca19;
}

impl Serializable for RpcError {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.error_code.serialize(buf);
        self.error_message.serialize(buf);
    }
}

impl Deserializable for RpcError {
    fn deserialize(buf: &mut Cursor) -> Result<Self, Error> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            error_code: i32::deserialize(buf)?,
            error_message: String::deserialize(buf)?,
        })
    }
}

/// `http_wait#9299359f max_delay:int wait_after:int max_wait:int = HttpWait;`
#[derive(Clone, Debug, PartialEq)]
pub struct HttpWait {
    pub max_delay: i32,
    pub wait_after: i32,
    pub max_wait: i32,
}

impl Identifiable for HttpWait {
    const CONSTRUCTOR_ID: u32 = 0x9299359f;
}

impl Serializable for HttpWait {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.max_delay.serialize(buf);
        self.wait_after.serialize(buf);
        self.max_wait.serialize(buf);
    }
}

impl Deserializable for HttpWait {
    fn deserialize(buf: &mut Cursor) -> Result<Self, Error> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            max_delay: i32::deserialize(buf)?,
            wait_after: i32::deserialize(buf)?,
            max_wait: i32::deserialize(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_round_trip() {
        let pong = Pong {
            msg_id: 0x0102030405060708,
            ping_id: -1,
        };
        let bytes = pong.to_bytes();
        assert_eq!(&bytes[..4], &[0xc5, 0x73, 0x77, 0x34]);
        assert_eq!(Pong::from_bytes(&bytes).unwrap(), pong);
    }

    #[test]
    fn wrong_constructor_is_rejected() {
        let pong = Pong {
            msg_id: 1,
            ping_id: 2,
        };
        assert!(matches!(
            BadServerSalt::from_bytes(&pong.to_bytes()),
            Err(Error::UnexpectedConstructor {
                id: Pong::CONSTRUCTOR_ID
            })
        ));
    }

    #[test]
    fn future_salts_uses_bare_vector() {
        let salts = FutureSalts {
            req_msg_id: 7,
            now: 100,
            salts: vec![FutureSalt {
                valid_since: 100,
                valid_until: 200,
                salt: 42,
            }],
        };
        let bytes = salts.to_bytes();
        // constructor + req_msg_id + now + count, then the first bare salt.
        assert_eq!(&bytes[16..20], &[1, 0, 0, 0]);
        assert_eq!(&bytes[20..24], &[100, 0, 0, 0]);
        assert_eq!(FutureSalts::from_bytes(&bytes).unwrap(), salts);
    }
}
