// Copyright 2024 - developers of the `ferrogram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The session runtime proper: lifecycle, background tasks, request
//! correlation and inbound dispatch.
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ferrogram_mtproto::manual_tl::{Message, RpcResult};
use ferrogram_mtproto::{Codec, Envelope, MsgFactory, MsgId};
use ferrogram_tl::{functions, types, Deserializable, Identifiable, RemoteCall, Serializable, LAYER};
use getrandom::getrandom;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;

use crate::errors::{InvocationError, RpcError};
use crate::net::{Connection, Connector, TcpConnector};
use crate::updates::UpdateSink;

/// How long to wait for a response (or the connection latch) before a
/// request is considered timed out.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// How many times [`Session::send`] re-sends a request after a
/// transport-shaped failure.
pub const MAX_RETRIES: u32 = 5;

/// Pause between those re-sends.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Acknowledgments are flushed once this many are owed.
const ACKS_THRESHOLD: usize = 8;

/// Every how often the keepalive ping goes out.
const PING_INTERVAL: Duration = Duration::from_secs(5);

/// How long the server may go without hearing a keepalive before it
/// drops the connection on its own.
const PING_DISCONNECT_DELAY: i32 = WAIT_TIMEOUT.as_secs() as i32 + 10;

/// Salts are rotated this many seconds before the current one expires.
const SALT_ROTATION_MARGIN: i64 = 900;

/// Placeholder salt used only until the first server response rewrites it.
const INITIAL_SALT: i64 = 0x616e67656c696361;

/// A resolved response: the raw body, plus the salt the server attached
/// to the envelope that carried it.
pub(crate) struct Response {
    pub body: Vec<u8>,
    pub salt: i64,
}

type Resolution = Result<Response, InvocationError>;

/// State shared between the session handle and its background tasks.
struct Shared<C: Connection> {
    codec: Codec,
    msg_factory: MsgFactory,
    conn: Mutex<Option<Arc<C>>>,
    current_salt: Mutex<types::FutureSalt>,
    pending_acks: Mutex<HashSet<i64>>,
    pending_results: Mutex<HashMap<MsgId, oneshot::Sender<Resolution>>>,
    connected: watch::Sender<bool>,
    updates: Option<Arc<dyn UpdateSink>>,
}

/// Handles to whatever the current connection spawned. All `None` while
/// stopped.
#[derive(Default)]
struct Tasks {
    worker: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
    ping: Option<JoinHandle<()>>,
    salt: Option<JoinHandle<()>>,
    ping_cancel: Option<watch::Sender<bool>>,
    salt_cancel: Option<watch::Sender<bool>>,
    inbound: Option<mpsc::UnboundedSender<Option<Vec<u8>>>>,
}

/// A single client session over one logical connection to a datacenter.
///
/// The session owns four background tasks (receive, worker, keepalive
/// ping and salt rotation) which it starts and stops as a unit; requests
/// may be issued concurrently from any number of tasks holding the
/// `Arc<Session>`.
pub struct Session<C: Connector> {
    connector: C,
    api_id: i32,
    is_cdn: bool,
    // Handle to ourselves for the receive task, which restarts the
    // session on unsolicited disconnects.
    weak: Weak<Self>,
    shared: Arc<Shared<C::Conn>>,
    // Also serializes start/stop/restart: only one lifecycle transition
    // runs at any moment.
    tasks: tokio::sync::Mutex<Tasks>,
}

fn generate_session_id() -> i64 {
    let mut buffer = [0u8; 8];
    getrandom(&mut buffer).expect("failed to generate a secure session id");
    i64::from_le_bytes(buffer)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before epoch")
        .as_secs() as i64
}

/// Fills the `init_connection` metadata from the host system, leaving
/// the actual interesting query nested inside.
fn init_connection(api_id: i32) -> functions::InitConnection<functions::help::GetConfig> {
    let os = os_info::get();

    let mut system_lang_code = String::new();
    let mut lang_code = String::new();
    #[cfg(not(target_os = "android"))]
    {
        system_lang_code.push_str(&locate_locale::system());
        lang_code.push_str(&locate_locale::user());
    }
    if system_lang_code.is_empty() {
        system_lang_code.push_str("en");
    }
    if lang_code.is_empty() {
        lang_code.push_str("en");
    }

    functions::InitConnection {
        api_id,
        device_model: format!("{} {}", os.os_type(), os.bitness()),
        system_version: os.version().to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        system_lang_code,
        lang_pack: String::new(),
        lang_code,
        query: functions::help::GetConfig {},
    }
}

impl<C: Connector> Session<C> {
    /// Creates a new, disconnected session.
    ///
    /// The session identifier is random and stays fixed for the whole
    /// lifetime of this value, across restarts.
    pub fn new(
        connector: C,
        auth_key: [u8; 256],
        api_id: i32,
        is_cdn: bool,
        updates: Option<Arc<dyn UpdateSink>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            connector,
            api_id,
            is_cdn,
            weak: weak.clone(),
            shared: Arc::new(Shared {
                codec: Codec::new(auth_key, generate_session_id()),
                msg_factory: MsgFactory::new(),
                conn: Mutex::new(None),
                current_salt: Mutex::new(types::FutureSalt {
                    valid_since: 0,
                    valid_until: 0,
                    salt: INITIAL_SALT,
                }),
                pending_acks: Mutex::new(HashSet::new()),
                pending_results: Mutex::new(HashMap::new()),
                connected: watch::channel(false).0,
                updates,
            }),
            tasks: tokio::sync::Mutex::new(Tasks::default()),
        })
    }

    /// The random identifier for this session instance.
    ///
    /// The server echoes it inside every encrypted envelope; packets
    /// carrying any other value are rejected by the codec.
    pub fn session_id(&self) -> i64 {
        self.shared.codec.session_id()
    }

    /// Connects and performs the startup handshake, retrying with a
    /// fresh connection for as long as the failures look transient.
    ///
    /// Once this returns `Ok`, requests flow and the background tasks
    /// are running.
    pub async fn start(&self) -> Result<(), InvocationError> {
        let mut tasks = self.tasks.lock().await;
        self.start_locked(&mut tasks).await
    }

    /// Stops the background tasks, closes the transport and releases
    /// every caller still waiting on a response.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        self.stop_locked(&mut tasks).await;
    }

    /// Fully sequential `stop` followed by `start`.
    pub async fn restart(&self) -> Result<(), InvocationError> {
        let mut tasks = self.tasks.lock().await;
        self.stop_locked(&mut tasks).await;
        self.start_locked(&mut tasks).await
    }

    /// Variant of [`Session::restart`] used by the receive task on an
    /// unsolicited disconnect. If a deliberate `stop` won the race for
    /// the lifecycle lock, the restart is abandoned.
    ///
    /// Returns a boxed future rather than using `async fn` sugar: this
    /// function is reachable from `connect_and_init` via the receive
    /// task it spawns, and an opaque `async fn` return type here would
    /// make the Send check on that cycle unresolvable by the compiler.
    fn restart_after_disconnect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<(), InvocationError>> + Send + '_>> {
        Box::pin(async move {
            let mut tasks = self.tasks.lock().await;
            if !*self.shared.connected.borrow() {
                debug!("session was stopped before the restart could run");
                return Ok(());
            }
            self.stop_locked(&mut tasks).await;
            self.start_locked(&mut tasks).await
        })
    }

    /// Sends a request and returns its parsed response, re-sending up to
    /// [`MAX_RETRIES`] times on transport-shaped failures.
    pub async fn send<R: RemoteCall + Identifiable>(
        &self,
        request: &R,
    ) -> Result<R::Return, InvocationError> {
        self.send_with_retries(request, MAX_RETRIES).await
    }

    /// Like [`Session::send`] with an explicit retry budget.
    pub async fn send_with_retries<R: RemoteCall + Identifiable>(
        &self,
        request: &R,
        retries: u32,
    ) -> Result<R::Return, InvocationError> {
        // Wait for the connection latch; if it never comes up, the send
        // below will fail on its own terms.
        let mut connected = self.shared.connected.subscribe();
        let _ = time::timeout(WAIT_TIMEOUT, connected.wait_for(|up| *up)).await;

        let mut attempt = 0;
        loop {
            match self.invoke_raw(request).await {
                Ok(response) => {
                    return R::Return::from_bytes(&response.body).map_err(InvocationError::from)
                }
                Err(err) if err.should_retry() && attempt < retries => {
                    attempt += 1;
                    info!("retrying request (attempt {attempt}/{retries}): {err}");
                    time::sleep(RETRY_DELAY).await;
                }
                Err(InvocationError::Rpc(err)) => {
                    return Err(InvocationError::Rpc(
                        err.with_caused_by(R::CONSTRUCTOR_ID),
                    ))
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One send attempt, waiting for the correlated response.
    async fn invoke_raw<R: RemoteCall + Identifiable>(
        &self,
        request: &R,
    ) -> Result<Response, InvocationError> {
        self.shared
            .send_request(R::CONSTRUCTOR_ID, request.to_bytes(), true)
            .await
            .map(|response| response.expect("waited send always resolves"))
    }

    async fn start_locked(
        &self,
        tasks: &mut Tasks,
    ) -> Result<(), InvocationError> {
        loop {
            match self.connect_and_init(tasks).await {
                Ok(()) => break,
                Err(err) if err.is_recoverable() => {
                    warn!("connection setup failed, retrying: {err}");
                    self.stop_locked(tasks).await;
                    time::sleep(RETRY_DELAY).await;
                }
                Err(err) => {
                    self.stop_locked(tasks).await;
                    return Err(err);
                }
            }
        }

        self.shared.connected.send_replace(true);
        debug!("session started");
        Ok(())
    }

    /// Steps 1–8 of the connection setup. On failure the caller tears
    /// down whatever was spawned via `stop_locked`.
    async fn connect_and_init(
        &self,
        tasks: &mut Tasks,
    ) -> Result<(), InvocationError> {
        let conn = Arc::new(self.connector.connect().await?);
        *self.shared.conn.lock().unwrap() = Some(conn.clone());

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tasks.inbound = Some(inbound_tx.clone());
        tasks.worker = Some(tokio::spawn(worker_task(self.shared.clone(), inbound_rx)));
        tasks.receiver = Some(tokio::spawn(receive_task(
            self.weak.clone(),
            self.shared.clone(),
            conn,
            inbound_tx,
        )));

        self.shared.set_salt(types::FutureSalt {
            valid_since: 0,
            valid_until: 0,
            salt: INITIAL_SALT,
        });

        // The server attaches the salt it wants us to use to the pong's
        // envelope; it may also reject the placeholder outright with a
        // bad-salt notification, in which case the worker has already
        // adopted the attached value.
        match self.invoke_raw(&functions::Ping { ping_id: 0 }).await {
            Ok(response) => self.shared.set_salt(types::FutureSalt {
                valid_since: 0,
                valid_until: 0,
                salt: response.salt,
            }),
            Err(InvocationError::BadMessage { code: 48 }) => {}
            Err(err) => return Err(err),
        }

        let response = self
            .invoke_raw(&functions::GetFutureSalts { num: 1 })
            .await?;
        let salts = types::FutureSalts::from_bytes(&response.body)?;
        match salts.salts.first() {
            Some(first) => self.shared.set_salt(*first),
            None => warn!("server returned no future salts, keeping the pong salt"),
        }

        let (salt_cancel, salt_cancel_rx) = watch::channel(false);
        tasks.salt_cancel = Some(salt_cancel);
        tasks.salt = Some(tokio::spawn(salt_task(self.shared.clone(), salt_cancel_rx)));

        if !self.is_cdn {
            self.invoke_raw(&functions::InvokeWithLayer {
                layer: LAYER,
                query: init_connection(self.api_id),
            })
            .await?;
            info!("connection initialized with layer {LAYER}");
        }

        let (ping_cancel, ping_cancel_rx) = watch::channel(false);
        tasks.ping_cancel = Some(ping_cancel);
        tasks.ping = Some(tokio::spawn(ping_task(self.shared.clone(), ping_cancel_rx)));

        Ok(())
    }

    async fn stop_locked(&self, tasks: &mut Tasks) {
        self.shared.connected.send_replace(false);

        if let Some(cancel) = tasks.ping_cancel.take() {
            let _ = cancel.send(true);
        }
        if let Some(cancel) = tasks.salt_cancel.take() {
            let _ = cancel.send(true);
        }
        if let Some(handle) = tasks.ping.take() {
            let _ = handle.await;
        }
        if let Some(handle) = tasks.salt.take() {
            let _ = handle.await;
        }

        // Closing the transport makes the receive task observe EOF.
        let conn = self.shared.conn.lock().unwrap().take();
        if let Some(conn) = conn {
            conn.close().await;
        }
        if let Some(handle) = tasks.receiver.take() {
            let _ = handle.await;
        }

        if let Some(inbound) = tasks.inbound.take() {
            let _ = inbound.send(None);
        }
        if let Some(handle) = tasks.worker.take() {
            let _ = handle.await;
        }

        // Release every caller still waiting on a result; they observe
        // the released slot as a timeout.
        self.shared.pending_results.lock().unwrap().clear();

        if let Some(updates) = &self.shared.updates {
            if catch_unwind(AssertUnwindSafe(|| updates.on_disconnect())).is_err() {
                error!("disconnect handler panicked");
            }
        }

        debug!("session stopped");
    }
}

impl Session<TcpConnector> {
    /// Creates a session towards a known datacenter over TCP, with an
    /// optional socks5 proxy url.
    pub fn with_dc(
        dc_id: i32,
        test_mode: bool,
        proxy: Option<String>,
        auth_key: [u8; 256],
        api_id: i32,
        is_cdn: bool,
        updates: Option<Arc<dyn UpdateSink>>,
    ) -> Arc<Self> {
        Self::new(
            TcpConnector::new(dc_id, test_mode, proxy),
            auth_key,
            api_id,
            is_cdn,
            updates,
        )
    }
}

impl<C: Connection> Shared<C> {
    fn set_salt(&self, salt: types::FutureSalt) {
        *self.current_salt.lock().unwrap() = salt;
    }

    /// Frames, encrypts and transmits one request. With `wait` set, also
    /// parks the caller on a fresh result slot until the worker resolves
    /// it or [`WAIT_TIMEOUT`] passes.
    async fn send_request(
        &self,
        constructor_id: u32,
        body: Vec<u8>,
        wait: bool,
    ) -> Result<Option<Response>, InvocationError> {
        let message = self.msg_factory.wrap(constructor_id, body);
        let msg_id = MsgId(message.msg_id);

        let rx = if wait {
            let (tx, rx) = oneshot::channel();
            self.pending_results.lock().unwrap().insert(msg_id, tx);
            Some(rx)
        } else {
            None
        };

        let salt = self.current_salt.lock().unwrap().salt;
        let payload = self.codec.pack(&message, salt);

        let conn = self.conn.lock().unwrap().clone();
        let conn = match conn {
            Some(conn) => conn,
            None => {
                self.pending_results.lock().unwrap().remove(&msg_id);
                return Err(InvocationError::Io(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "not connected",
                )));
            }
        };
        if let Err(err) = conn.send(&payload).await {
            self.pending_results.lock().unwrap().remove(&msg_id);
            return Err(InvocationError::Io(err));
        }
        debug!("sent request {constructor_id:08x} as {msg_id}");

        let rx = match rx {
            Some(rx) => rx,
            None => return Ok(None),
        };
        match time::timeout(WAIT_TIMEOUT, rx).await {
            Ok(Ok(resolution)) => resolution.map(Some),
            // The slot was released while stopping; same outcome for the
            // caller as the response never arriving.
            Ok(Err(_)) => Err(InvocationError::Timeout),
            Err(_) => {
                self.pending_results.lock().unwrap().remove(&msg_id);
                Err(InvocationError::Timeout)
            }
        }
    }

    /// Routes one inbound message.
    fn dispatch_message(&self, message: Message, envelope_salt: i64) {
        let constructor_id = match message.constructor_id() {
            Ok(id) => id,
            Err(err) => {
                warn!("dropping message with truncated body: {err}");
                return;
            }
        };

        let (req_msg_id, resolution) = match constructor_id {
            types::MsgDetailedInfo::CONSTRUCTOR_ID => {
                match types::MsgDetailedInfo::from_bytes(&message.body) {
                    Ok(detailed) => {
                        self.pending_acks.lock().unwrap().insert(detailed.answer_msg_id);
                    }
                    Err(err) => warn!("bad msg_detailed_info: {err}"),
                }
                return;
            }
            types::MsgNewDetailedInfo::CONSTRUCTOR_ID => {
                match types::MsgNewDetailedInfo::from_bytes(&message.body) {
                    Ok(detailed) => {
                        self.pending_acks.lock().unwrap().insert(detailed.answer_msg_id);
                    }
                    Err(err) => warn!("bad msg_new_detailed_info: {err}"),
                }
                return;
            }
            types::NewSessionCreated::CONSTRUCTOR_ID => {
                debug!("server opened a new session over this connection");
                return;
            }
            types::BadMsgNotification::CONSTRUCTOR_ID => {
                match types::BadMsgNotification::from_bytes(&message.body) {
                    Ok(bad_msg) => (
                        bad_msg.bad_msg_id,
                        Err(InvocationError::BadMessage {
                            code: bad_msg.error_code,
                        }),
                    ),
                    Err(err) => {
                        warn!("bad bad_msg_notification: {err}");
                        return;
                    }
                }
            }
            types::BadServerSalt::CONSTRUCTOR_ID => {
                match types::BadServerSalt::from_bytes(&message.body) {
                    Ok(bad_salt) => {
                        debug!("adopting the server salt attached to bad_server_salt");
                        self.current_salt.lock().unwrap().salt = bad_salt.new_server_salt;
                        (
                            bad_salt.bad_msg_id,
                            Err(InvocationError::BadMessage {
                                code: bad_salt.error_code,
                            }),
                        )
                    }
                    Err(err) => {
                        warn!("bad bad_server_salt: {err}");
                        return;
                    }
                }
            }
            types::FutureSalts::CONSTRUCTOR_ID => {
                match types::FutureSalts::from_bytes(&message.body) {
                    Ok(salts) => (
                        salts.req_msg_id,
                        Ok(Response {
                            body: message.body,
                            salt: envelope_salt,
                        }),
                    ),
                    Err(err) => {
                        warn!("bad future_salts: {err}");
                        return;
                    }
                }
            }
            types::Pong::CONSTRUCTOR_ID => match types::Pong::from_bytes(&message.body) {
                Ok(pong) => (
                    pong.msg_id,
                    Ok(Response {
                        body: message.body,
                        salt: envelope_salt,
                    }),
                ),
                Err(err) => {
                    warn!("bad pong: {err}");
                    return;
                }
            },
            RpcResult::CONSTRUCTOR_ID => match RpcResult::from_bytes(&message.body) {
                Ok(result) => {
                    let req_msg_id = result.req_msg_id;
                    let resolution = match result.inner_constructor() {
                        Ok(types::RpcError::CONSTRUCTOR_ID) => {
                            match types::RpcError::from_bytes(&result.result) {
                                Ok(err) => Err(InvocationError::Rpc(RpcError::from(err))),
                                Err(err) => Err(InvocationError::from(err)),
                            }
                        }
                        _ => match result.decompressed_result() {
                            Ok(body) => Ok(Response {
                                body,
                                salt: envelope_salt,
                            }),
                            Err(err) => Err(InvocationError::Deserialize(err)),
                        },
                    };
                    (req_msg_id, resolution)
                }
                Err(err) => {
                    warn!("bad rpc_result: {err}");
                    return;
                }
            },
            _ => {
                // Not a service message we know: it's a server-pushed
                // update for the external client.
                match &self.updates {
                    Some(updates) => updates.deliver(message.body),
                    None => debug!("discarding update {constructor_id:08x} without a sink"),
                }
                return;
            }
        };

        // A missing slot is fine: the caller may have timed out already,
        // or this may be a late duplicate.
        match self.pending_results.lock().unwrap().remove(&MsgId(req_msg_id)) {
            Some(tx) => {
                let _ = tx.send(resolution);
            }
            None => debug!("no pending request for response to {req_msg_id}"),
        }
    }

    fn dispatch_envelope(&self, envelope: Envelope) {
        let salt = envelope.salt;
        for message in envelope.messages {
            if message.seq_no % 2 != 0 {
                let mut acks = self.pending_acks.lock().unwrap();
                if !acks.insert(message.msg_id) {
                    debug!("skipping duplicate message {}", message.msg_id);
                    continue;
                }
            }
            self.dispatch_message(message, salt);
        }
    }

    /// Sends one batched `msgs_ack` once enough acknowledgments are
    /// owed. On transport failure the set is left as-is for the next
    /// attempt.
    async fn flush_acks_if_due(&self) {
        let msg_ids: Vec<i64> = {
            let acks = self.pending_acks.lock().unwrap();
            if acks.len() < ACKS_THRESHOLD {
                return;
            }
            acks.iter().copied().collect()
        };

        info!("acknowledging {} messages", msg_ids.len());
        let ack = types::MsgsAck {
            msg_ids: msg_ids.clone(),
        };
        match self
            .send_request(types::MsgsAck::CONSTRUCTOR_ID, ack.to_bytes(), false)
            .await
        {
            Ok(_) => {
                let mut acks = self.pending_acks.lock().unwrap();
                for msg_id in &msg_ids {
                    acks.remove(msg_id);
                }
            }
            Err(err) => debug!("failed to send acks, keeping them for later: {err}"),
        }
    }

    async fn close_connection(&self) {
        let conn = self.conn.lock().unwrap().clone();
        if let Some(conn) = conn {
            conn.close().await;
        }
    }
}

/// Drains the inbound queue: decrypts each packet and dispatches every
/// message it carries. A `None` item is the stop sentinel.
async fn worker_task<C: Connection>(
    shared: Arc<Shared<C>>,
    mut inbound: mpsc::UnboundedReceiver<Option<Vec<u8>>>,
) {
    info!("worker task started");
    while let Some(item) = inbound.recv().await {
        let packet = match item {
            Some(packet) => packet,
            None => break,
        };

        let envelope = match shared.codec.unpack(&packet) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("dropping undecodable packet: {err}");
                continue;
            }
        };

        shared.dispatch_envelope(envelope);
        shared.flush_acks_if_due().await;
    }
    info!("worker task stopped");
}

/// Reads framed packets into the inbound queue until the transport ends.
/// An unsolicited end while connected triggers a background restart.
async fn receive_task<C: Connector>(
    session: Weak<Session<C>>,
    shared: Arc<Shared<C::Conn>>,
    conn: Arc<C::Conn>,
    inbound: mpsc::UnboundedSender<Option<Vec<u8>>>,
) {
    info!("receive task started");
    loop {
        let packet = match conn.recv().await {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                debug!("transport reached end of stream");
                break;
            }
            Err(err) => {
                warn!("transport read failed: {err}");
                break;
            }
        };

        if packet.len() == 4 {
            let code = i32::from_le_bytes(packet[..4].try_into().unwrap());
            warn!("server sent transport error {code}");
            break;
        }

        let _ = inbound.send(Some(packet));
    }

    if *shared.connected.borrow() {
        if let Some(session) = session.upgrade() {
            info!("connection lost, restarting session");
            tokio::spawn(async move {
                if let Err(err) = session.restart_after_disconnect().await {
                    error!("failed to restart session: {err}");
                }
            });
        }
    }
    info!("receive task stopped");
}

/// Fires a `ping_delay_disconnect` every [`PING_INTERVAL`] so the server
/// keeps the connection alive, until cancelled.
async fn ping_task<C: Connection>(shared: Arc<Shared<C>>, mut cancel: watch::Receiver<bool>) {
    info!("ping task started");
    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            _ = time::sleep(PING_INTERVAL) => {}
        }

        let ping = functions::PingDelayDisconnect {
            ping_id: 0,
            disconnect_delay: PING_DISCONNECT_DELAY,
        };
        if let Err(err) = shared
            .send_request(
                functions::PingDelayDisconnect::CONSTRUCTOR_ID,
                ping.to_bytes(),
                false,
            )
            .await
        {
            debug!("keepalive ping failed: {err}");
        }
    }
    info!("ping task stopped");
}

/// Replaces the current salt [`SALT_ROTATION_MARGIN`] seconds before it
/// expires. A rotation failure drops the connection, which in turn gets
/// the whole session restarted by the receive task.
async fn salt_task<C: Connection>(shared: Arc<Shared<C>>, mut cancel: watch::Receiver<bool>) {
    info!("salt task started");
    loop {
        let dt = {
            let salt = shared.current_salt.lock().unwrap();
            i64::from(salt.valid_until) - unix_now() - SALT_ROTATION_MARGIN
        };
        debug!("next salt rotation in {dt}s");

        tokio::select! {
            _ = cancel.changed() => break,
            _ = time::sleep(Duration::from_secs(dt.max(0) as u64)) => {}
        }

        let request = functions::GetFutureSalts { num: 1 };
        let rotated = match shared
            .send_request(
                functions::GetFutureSalts::CONSTRUCTOR_ID,
                request.to_bytes(),
                true,
            )
            .await
        {
            Ok(Some(response)) => match types::FutureSalts::from_bytes(&response.body) {
                Ok(salts) => match salts.salts.first() {
                    Some(first) => {
                        shared.set_salt(*first);
                        true
                    }
                    None => false,
                },
                Err(_) => false,
            },
            _ => false,
        };

        if !rotated {
            warn!("salt rotation failed, dropping the connection");
            shared.close_connection().await;
            break;
        }
    }
    info!("salt task stopped");
}
