// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{datacenter, Connection, Connector};
use ferrogram_mtproto::transport::{self, Full, Transport};
use log::info;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

const READ_CHUNK: usize = 8 * 1024;

/// Dials datacenters over TCP, optionally through a socks5 proxy.
pub struct TcpConnector {
    dc_id: i32,
    test_mode: bool,
    proxy: Option<String>,
}

impl TcpConnector {
    pub fn new(dc_id: i32, test_mode: bool, proxy: Option<String>) -> Self {
        Self {
            dc_id,
            test_mode,
            proxy,
        }
    }

    async fn connect_stream(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        match &self.proxy {
            None => TcpStream::connect(addr).await,
            #[cfg(feature = "proxy")]
            Some(proxy) => {
                let stream = tokio_socks::tcp::Socks5Stream::connect(proxy.as_str(), addr)
                    .await
                    .map_err(|err| io::Error::new(io::ErrorKind::ConnectionAborted, err))?;
                Ok(stream.into_inner())
            }
            #[cfg(not(feature = "proxy"))]
            Some(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "proxied connections require the `proxy` feature",
            )),
        }
    }
}

impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn connect(&self) -> io::Result<TcpConnection> {
        let addr = datacenter::address(self.dc_id, self.test_mode)?;
        info!(
            "connecting to dc {} at {addr}{}...",
            self.dc_id,
            if self.test_mode { " (test mode)" } else { "" }
        );
        let stream = self.connect_stream(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let (closed, _) = watch::channel(false);
        Ok(TcpConnection {
            reader: Mutex::new(ReadState {
                half: read_half,
                buffer: Vec::new(),
                filled: 0,
            }),
            writer: Mutex::new(write_half),
            transport: std::sync::Mutex::new(Full::new()),
            closed,
        })
    }
}

struct ReadState {
    half: OwnedReadHalf,
    buffer: Vec<u8>,
    filled: usize,
}

/// A framed TCP connection to one datacenter.
///
/// Frames carry whole encrypted payloads; partial reads are reassembled
/// internally and the session only ever observes complete packets.
pub struct TcpConnection {
    reader: Mutex<ReadState>,
    writer: Mutex<OwnedWriteHalf>,
    transport: std::sync::Mutex<Full>,
    closed: watch::Sender<bool>,
}

impl Connection for TcpConnection {
    async fn send(&self, payload: &[u8]) -> io::Result<()> {
        if *self.closed.borrow() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }

        let frame = {
            let mut transport = self.transport.lock().unwrap();
            let mut buffer = Vec::with_capacity(payload.len() + 12);
            transport.pack(payload, &mut buffer);
            buffer
        };

        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await
    }

    async fn recv(&self) -> io::Result<Option<Vec<u8>>> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Ok(None);
        }

        let mut reader = self.reader.lock().await;
        let ReadState {
            half,
            buffer,
            filled,
        } = &mut *reader;

        loop {
            let unpacked = {
                let mut transport = self.transport.lock().unwrap();
                transport.unpack(&buffer[..*filled])
            };
            match unpacked {
                Ok(offset) => {
                    let packet = buffer[offset.data_start..offset.data_end].to_vec();
                    buffer.copy_within(offset.next_offset..*filled, 0);
                    *filled -= offset.next_offset;
                    return Ok(Some(packet));
                }
                Err(transport::Error::MissingBytes) => {}
                Err(err) => return Err(io::Error::new(io::ErrorKind::InvalidData, err)),
            }

            if *filled == buffer.len() {
                buffer.resize(buffer.len() + READ_CHUNK, 0);
            }
            let n = tokio::select! {
                n = half.read(&mut buffer[*filled..]) => n?,
                _ = closed.changed() => return Ok(None),
            };
            if n == 0 {
                return Ok(None);
            }
            *filled += n;
        }
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
