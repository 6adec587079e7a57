//! Client connection to the message manager

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use codec::{
    read_message, write_frame, HeaderFormat, Message, MessagePayload, ProtocolError,
    ProtocolResult, SchemaRegistry, DEFAULT_MAX_PAYLOAD,
};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use types::{
    encode_text, ClientSetName, Connect, ModuleReady, PauseSubscription, ResumeSubscription,
    Subscribe, Unsubscribe, ALL_MESSAGE_TYPES, DYN_MOD_ID_START, HID_ALL_HOSTS,
    MAX_CONTIGUOUS_MESSAGE_DATA, MAX_HOSTS, MAX_MODULES, MT_ACKNOWLEDGE, MT_DISCONNECT,
};

use crate::error::{ClientError, Result};

pub const DEFAULT_MANAGER_ADDR: &str = "127.0.0.1:7111";

/// Inbound frames buffered by the reader task before it waits on the application
const INBOUND_QUEUE_DEPTH: usize = 4096;

/// Client settings fixed for the lifetime of a [`Client`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Requested static id; 0 asks the manager for a dynamic one
    pub module_id: i16,
    pub host_id: i16,
    /// Use the 56-byte timecode header (must match the manager)
    pub timecode: bool,
    pub ack_timeout: Duration,
    /// Validate inbound size and schema hash against `schemas`
    pub sync_check: bool,
    pub schemas: SchemaRegistry,
    pub max_payload_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            module_id: 0,
            host_id: 0,
            timecode: false,
            ack_timeout: Duration::from_secs(3),
            sync_check: false,
            schemas: SchemaRegistry::with_core_types(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// How the module presents itself in its CONNECT
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Receive every forwarded message
    pub logger: bool,
    pub daemon: bool,
    /// Refuse to share the id or name with another unique module
    pub unique: bool,
    pub name: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            logger: false,
            daemon: false,
            unique: true,
            name: None,
        }
    }
}

impl ConnectOptions {
    pub fn logger() -> Self {
        Self {
            logger: true,
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct Connection {
    peer: SocketAddr,
    writer: OwnedWriteHalf,
    inbound: mpsc::Receiver<ProtocolResult<Message>>,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn spawn_reader(
    mut stream: OwnedReadHalf,
    format: HeaderFormat,
    max_payload: usize,
    inbound: mpsc::Sender<ProtocolResult<Message>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let result = read_message(&mut stream, format, max_payload).await;
            let fatal = result.as_ref().is_err_and(ProtocolError::is_fatal);
            if inbound.send(result).await.is_err() || fatal {
                break;
            }
        }
    })
}

#[derive(Clone, Copy)]
enum SubscriptionControl {
    Subscribe,
    Unsubscribe,
    Pause,
    Resume,
}

/// A module's connection to the message manager
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    format: HeaderFormat,
    module_id: i16,
    dynamic_id: bool,
    logger: bool,
    msg_count: i32,
    connection: Option<Connection>,
    subscribed: BTreeSet<i32>,
    paused: BTreeSet<i32>,
    /// Messages read while waiting for an acknowledgement
    pending: VecDeque<Message>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if !(0..DYN_MOD_ID_START).contains(&config.module_id) {
            return Err(ClientError::InvalidModuleId(config.module_id, DYN_MOD_ID_START));
        }
        Ok(Self {
            format: HeaderFormat::from_timecode_flag(config.timecode),
            module_id: config.module_id,
            dynamic_id: config.module_id == 0,
            logger: false,
            msg_count: 0,
            connection: None,
            subscribed: BTreeSet::new(),
            paused: BTreeSet::new(),
            pending: VecDeque::new(),
            config,
        })
    }

    /// Open the connection and register with the manager
    ///
    /// Any previous connection is dropped first. Returns once the manager has
    /// acknowledged the CONNECT; a dynamic id is taken from that ACK.
    pub async fn connect(&mut self, addr: &str, options: ConnectOptions) -> Result<()> {
        self.connection = None;
        self.pending.clear();

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::ManagerNotFound {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read_half, writer) = stream.into_split();
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let reader = spawn_reader(read_half, self.format, self.config.max_payload_bytes, inbound_tx);
        self.connection = Some(Connection {
            peer,
            writer,
            inbound,
            reader,
        });

        if self.dynamic_id {
            self.module_id = 0;
        }
        self.logger = options.logger;

        let name = options.name.as_deref().unwrap_or_default();
        let request = Connect::new(
            options.logger,
            options.daemon,
            options.unique,
            std::process::id() as i32,
            name,
        )?;
        self.send_message(&request, 0, 0).await?;
        let ack = self.wait_for_acknowledgement(self.config.ack_timeout).await?;

        if self.module_id == 0 {
            self.module_id = ack.header.dest_mod_id;
        }
        self.subscribed.clear();
        self.paused.clear();
        info!("✅ Connected to message manager at {} as module {}", peer, self.module_id);
        Ok(())
    }

    /// Say goodbye and close the socket
    pub async fn disconnect(&mut self) -> Result<()> {
        let result = if self.connection.is_some() {
            self.send_signal(MT_DISCONNECT, 0, 0).await
        } else {
            Ok(())
        };
        if let Some(mut connection) = self.connection.take() {
            let _ = connection.writer.shutdown().await;
        }
        self.subscribed.clear();
        self.paused.clear();
        self.pending.clear();
        result
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn module_id(&self) -> i16 {
        self.module_id
    }

    pub fn host_id(&self) -> i16 {
        self.config.host_id
    }

    /// Sequence number the next outgoing message will carry
    pub fn msg_count(&self) -> i32 {
        self.msg_count
    }

    pub fn server(&self) -> Option<SocketAddr> {
        self.connection.as_ref().map(|connection| connection.peer)
    }

    pub fn subscribed_types(&self) -> &BTreeSet<i32> {
        &self.subscribed
    }

    pub fn paused_types(&self) -> &BTreeSet<i32> {
        &self.paused
    }

    pub async fn subscribe(&mut self, msg_types: &[i32]) -> Result<()> {
        self.subscription_control(msg_types, SubscriptionControl::Subscribe).await
    }

    pub async fn unsubscribe(&mut self, msg_types: &[i32]) -> Result<()> {
        self.subscription_control(msg_types, SubscriptionControl::Unsubscribe).await
    }

    /// Stop receiving `msg_types` while remembering them for [`Self::resume_subscription`]
    pub async fn pause_subscription(&mut self, msg_types: &[i32]) -> Result<()> {
        self.subscription_control(msg_types, SubscriptionControl::Pause).await
    }

    pub async fn resume_subscription(&mut self, msg_types: &[i32]) -> Result<()> {
        self.subscription_control(msg_types, SubscriptionControl::Resume).await
    }

    pub async fn unsubscribe_from_all(&mut self) -> Result<()> {
        let types: Vec<i32> = self.subscribed.union(&self.paused).copied().collect();
        self.unsubscribe(&types).await
    }

    async fn subscription_control(&mut self, msg_types: &[i32], control: SubscriptionControl) -> Result<()> {
        self.require_connection()?;
        for &msg_type in msg_types {
            match control {
                SubscriptionControl::Subscribe => {
                    self.send_message(&Subscribe { msg_type }, 0, 0).await?;
                    self.subscribed.insert(msg_type);
                    self.paused.remove(&msg_type);
                }
                SubscriptionControl::Unsubscribe => {
                    self.send_message(&Unsubscribe { msg_type }, 0, 0).await?;
                    self.subscribed.remove(&msg_type);
                    self.paused.remove(&msg_type);
                }
                SubscriptionControl::Pause => {
                    self.send_message(&PauseSubscription { msg_type }, 0, 0).await?;
                    self.subscribed.remove(&msg_type);
                    self.paused.insert(msg_type);
                }
                SubscriptionControl::Resume => {
                    self.send_message(&ResumeSubscription { msg_type }, 0, 0).await?;
                    self.subscribed.insert(msg_type);
                    self.paused.remove(&msg_type);
                }
            }
            self.wait_for_acknowledgement(self.config.ack_timeout).await?;
        }
        Ok(())
    }

    /// Tell the manager this module is up, along with its pid
    pub async fn send_module_ready(&mut self) -> Result<()> {
        let ready = ModuleReady {
            pid: std::process::id() as i32,
        };
        self.send_message(&ready, 0, 0).await
    }

    /// Rename this module; times out if a unique module already holds the name
    pub async fn set_name(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(ClientError::InvalidName("name must not be empty".to_string()));
        }
        let request = ClientSetName {
            name: encode_text(name)?,
        };
        self.send_message(&request, 0, 0).await?;
        self.wait_for_acknowledgement(self.config.ack_timeout).await?;
        Ok(())
    }

    /// Send a fixed-layout payload, tagged with its schema hash
    pub async fn send_message<T: MessagePayload>(
        &mut self,
        payload: &T,
        dest_mod_id: i16,
        dest_host_id: i16,
    ) -> Result<()> {
        self.send(Message::from_payload(payload), dest_mod_id, dest_host_id).await
    }

    /// Send a payload-less message
    pub async fn send_signal(&mut self, msg_type: i32, dest_mod_id: i16, dest_host_id: i16) -> Result<()> {
        self.send(Message::signal(msg_type), dest_mod_id, dest_host_id).await
    }

    /// Send an untyped payload; no schema hash is attached
    pub async fn send_raw(
        &mut self,
        msg_type: i32,
        payload: Bytes,
        dest_mod_id: i16,
        dest_host_id: i16,
    ) -> Result<()> {
        self.send(Message::new(msg_type, payload), dest_mod_id, dest_host_id).await
    }

    async fn send(&mut self, message: Message, dest_mod_id: i16, dest_host_id: i16) -> Result<()> {
        self.require_connection()?;
        if !(0..=MAX_MODULES as i16).contains(&dest_mod_id) {
            return Err(ClientError::InvalidDestinationModule(dest_mod_id));
        }
        if !(0..=MAX_HOSTS).contains(&dest_host_id) && dest_host_id != HID_ALL_HOSTS {
            return Err(ClientError::InvalidDestinationHost(dest_host_id));
        }
        if message.payload.len() > MAX_CONTIGUOUS_MESSAGE_DATA {
            return Err(ClientError::PayloadTooLarge {
                len: message.payload.len(),
                limit: MAX_CONTIGUOUS_MESSAGE_DATA,
            });
        }

        let mut message = message
            .from_source(self.module_id, self.config.host_id)
            .addressed(dest_mod_id, dest_host_id);
        message.header.msg_count = self.msg_count;
        let frame = message.encode(self.format);

        let Some(connection) = self.connection.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        if let Err(err) = write_frame(&mut connection.writer, &frame).await {
            warn!("Send of message type {} failed: {}", message.msg_type(), err);
            self.connection = None;
            return Err(ClientError::ConnectionLost(Some(err)));
        }
        self.msg_count = self.msg_count.wrapping_add(1);
        Ok(())
    }

    /// Read the next message this module is interested in
    ///
    /// `None` blocks until one arrives; `Some(Duration::ZERO)` only returns what
    /// is already buffered. Types the module is not subscribed to are discarded
    /// unless it is a logger or holds a wildcard subscription. Returns `Ok(None)`
    /// on timeout.
    pub async fn read_message(&mut self, timeout: Option<Duration>) -> Result<Option<Message>> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        loop {
            let Some(message) = self.next_message(deadline).await? else {
                return Ok(None);
            };
            if self.accepts(message.msg_type()) {
                return Ok(Some(message));
            }
            debug!("Discarding unsubscribed message type {}", message.msg_type());
        }
    }

    /// Wait for the manager's ACK, holding other messages for later reads
    pub async fn wait_for_acknowledgement(&mut self, timeout: Duration) -> Result<Message> {
        let deadline = Instant::now() + timeout;
        let mut held = Vec::new();
        let outcome = loop {
            match self.next_message(Some(deadline)).await {
                Ok(Some(message)) if message.msg_type() == MT_ACKNOWLEDGE => break Ok(message),
                Ok(Some(message)) => held.push(message),
                Ok(None) => break Err(ClientError::AcknowledgementTimeout(timeout)),
                Err(err) => break Err(err),
            }
        };
        for message in held.into_iter().rev() {
            self.pending.push_front(message);
        }
        outcome
    }

    /// Drop everything already received, spending at most `timeout`
    ///
    /// Returns true if the inbound buffer was emptied.
    pub async fn discard_messages(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.read_message(Some(Duration::ZERO)).await?.is_none() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    fn accepts(&self, msg_type: i32) -> bool {
        self.logger || self.subscribed.contains(&msg_type) || self.subscribed.contains(&ALL_MESSAGE_TYPES)
    }

    async fn next_message(&mut self, deadline: Option<Instant>) -> Result<Option<Message>> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }

        let connection = self.connection.as_mut().ok_or(ClientError::NotConnected)?;
        let received = match deadline {
            Some(deadline) => match timeout_at(deadline, connection.inbound.recv()).await {
                Ok(received) => received,
                Err(_) => return Ok(None),
            },
            None => connection.inbound.recv().await,
        };

        let message = match received {
            Some(Ok(message)) => message,
            Some(Err(err)) if err.is_fatal() => {
                self.connection = None;
                return Err(ClientError::ConnectionLost(Some(err)));
            }
            Some(Err(err)) => return Err(ClientError::Desync(err)),
            None => {
                self.connection = None;
                return Err(ClientError::ConnectionLost(None));
            }
        };

        if self.config.sync_check {
            self.config.schemas.validate(&message.header).map_err(ClientError::Desync)?;
        }
        Ok(Some(message))
    }

    fn require_connection(&self) -> Result<()> {
        if self.connection.is_some() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.server() {
            Some(server) => write!(f, "Client(module_id={}, server={})", self.module_id, server),
            None => write!(f, "Client(module_id={}, disconnected)", self.module_id),
        }
    }
}
