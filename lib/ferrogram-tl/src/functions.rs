// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Functions (requests) the session layer issues on its own behalf.
use crate::{types, Blob, Identifiable, RemoteCall, Serializable};

/// `ping#7abe77ec ping_id:long = Pong;`
#[derive(Clone, Debug, PartialEq)]
pub struct Ping {
    pub ping_id: i64,
}

impl Identifiable for Ping {
    const CONSTRUCTOR_ID: u32 = 0x7abe77ec;
}

impl Serializable for Ping {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.ping_id.serialize(buf);
    }
}

impl RemoteCall for Ping {
    type Return = types::Pong;
}

/// `ping_delay_disconnect#f3427b8c ping_id:long disconnect_delay:int = Pong;`
#[derive(Clone, Debug, PartialEq)]
pub struct PingDelayDisconnect {
    pub ping_id: i64,
    pub disconnect_delay: i32,
}

impl Identifiable for PingDelayDisconnect {
    const CONSTRUCTOR_ID: u32 = 0xf3427b8c;
}

impl Serializable for PingDelayDisconnect {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.ping_id.serialize(buf);
        self.disconnect_delay.serialize(buf);
    }
}

impl RemoteCall for PingDelayDisconnect {
    type Return = types::Pong;
}

/// `get_future_salts#b921bd04 num:int = FutureSalts;`
#[derive(Clone, Debug, PartialEq)]
pub struct GetFutureSalts {
    pub num: i32,
}

impl Identifiable for GetFutureSalts {
    const CONSTRUCTOR_ID: u32 = 0xb921bd04;
}

impl Serializable for GetFutureSalts {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.num.serialize(buf);
    }
}

impl RemoteCall for GetFutureSalts {
    type Return = types::FutureSalts;
}

/// `invokeWithLayer#da9b0d0d layer:int query:!X = X;`
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeWithLayer<Q> {
    pub layer: i32,
    pub query: Q,
}

impl<Q> Identifiable for InvokeWithLayer<Q> {
    const CONSTRUCTOR_ID: u32 = 0xda9b0d0d;
}

impl<Q: RemoteCall> Serializable for InvokeWithLayer<Q> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.layer.serialize(buf);
        self.query.serialize(buf);
    }
}

impl<Q: RemoteCall> RemoteCall for InvokeWithLayer<Q> {
    type Return = Q::Return;
}

/// `initConnection#785188b8 api_id:int device_model:string
/// system_version:string app_version:string system_lang_code:string
/// lang_pack:string lang_code:string query:!X = X;`
#[derive(Clone, Debug, PartialEq)]
pub struct InitConnection<Q> {
    pub api_id: i32,
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    pub system_lang_code: String,
    pub lang_pack: String,
    pub lang_code: String,
    pub query: Q,
}

impl<Q> Identifiable for InitConnection<Q> {
    const CONSTRUCTOR_ID: u32 = 0x785188b8;
}

impl<Q: RemoteCall> Serializable for InitConnection<Q> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.api_id.serialize(buf);
        self.device_model.serialize(buf);
        self.system_version.serialize(buf);
        self.app_version.serialize(buf);
        self.system_lang_code.serialize(buf);
        self.lang_pack.serialize(buf);
        self.lang_code.serialize(buf);
        self.query.serialize(buf);
    }
}

impl<Q: RemoteCall> RemoteCall for InitConnection<Q> {
    type Return = Q::Return;
}

pub mod help {
    use super::*;

    /// `help.getConfig#c4f9186b = Config;`
    ///
    /// The configuration schema itself is outside of this crate's scope,
    /// so the response is surfaced as an opaque [`Blob`].
    #[derive(Clone, Debug, PartialEq)]
    pub struct GetConfig {}

    impl Identifiable for GetConfig {
        const CONSTRUCTOR_ID: u32 = 0xc4f9186b;
    }

    impl Serializable for GetConfig {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            Self::CONSTRUCTOR_ID.serialize(buf);
        }
    }

    impl RemoteCall for GetConfig {
        type Return = Blob;
    }
}
