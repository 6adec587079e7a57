//! # Connection Lifecycle and Handshake
//!
//! ```text
//! Accepted ──CONNECT ok──▶ Registered ──DISCONNECT / I/O error──▶ Removed
//!     │                                                            ▲
//!     └──────────── CONNECT rejected / DISCONNECT / I/O error ─────┘
//! ```
//!
//! While `Accepted`, anything other than CONNECT or DISCONNECT is framed and then
//! dropped. A rejected CONNECT closes the connection without an ACKNOWLEDGE.
//!
//! Messages bound for forwarding are checked against the schema registry too, so
//! a type configured under `[[schemas]]` with a different size or hash is dropped
//! like a malformed control message.

use codec::{ConnectRequest, ControlMessage, Message, ProtocolError};
use thiserror::Error;
use tracing::{debug, info, warn};
use types::{
    encode_text_truncated, wall_clock_seconds, ClientClosed, ClientInfo, LogLevel,
    MAX_ADDRESS_LENGTH, MT_ACKNOWLEDGE,
};

use crate::broker::Broker;
use crate::error::ManagerError;
use crate::forwarding::Route;
use crate::modules::{IdentityAllocator, Module, ModuleHandle, ModuleRegistry};
use crate::subscriptions::SubscriptionChange;

/// Why a CONNECT was refused
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("requested id {0} is outside the static range [1, {1})")]
    InvalidStaticId(i16, i16),

    #[error("id {0} is held by unique module {1}")]
    IdInUse(i16, String),

    #[error("name {0:?} is held by another unique module")]
    NameInUse(String),

    #[error(transparent)]
    Exhausted(#[from] ManagerError),
}

/// Decide the id for a CONNECT request, advancing the dynamic cursor if needed
pub fn admit(
    modules: &ModuleRegistry,
    identities: &mut IdentityAllocator,
    handle: ModuleHandle,
    request: &ConnectRequest,
    dynamic_start: i16,
) -> Result<i16, Rejection> {
    let requested = request.requested_id;
    if requested != 0 {
        if !(1..dynamic_start).contains(&requested) {
            return Err(Rejection::InvalidStaticId(requested, dynamic_start));
        }
        if let Some(holder) = modules.unique_holder_of_id(requested, handle) {
            return Err(Rejection::IdInUse(requested, holder.to_string()));
        }
    }

    if request.unique {
        if let Some(name) = &request.name {
            if modules.unique_holder_of_name(name, handle).is_some() {
                return Err(Rejection::NameInUse(name.clone()));
            }
        }
    }

    if requested != 0 {
        return Ok(requested);
    }
    Ok(identities.allocate(&modules.ids_in_use())?)
}

/// How a module left
#[derive(Debug, Clone)]
pub(crate) enum Removal {
    Disconnect,
    Rejected(String),
    ConnectionLost(String),
}

impl Broker {
    /// Apply one classified inbound message; deliveries are queued, not performed
    pub(crate) fn dispatch_inbound(&mut self, handle: ModuleHandle, message: Message) {
        let control = match ControlMessage::classify(&message, &self.schemas) {
            Ok(control) => control,
            Err(err) => {
                self.report_desync(handle, err);
                return;
            }
        };

        let registered = self.modules.get(handle).is_some_and(|module| module.registered);
        match control {
            ControlMessage::Connect(request) if !registered => self.connect_module(handle, request),
            ControlMessage::Connect(_) => {
                warn!("Ignoring repeated CONNECT from registered connection {}", handle);
            }
            ControlMessage::Disconnect => self.remove_module(handle, Removal::Disconnect),
            _ if !registered => {
                debug!(
                    "Dropping message type {} from unregistered connection {}",
                    message.msg_type(),
                    handle
                );
            }
            ControlMessage::Subscribe(msg_type) | ControlMessage::ResumeSubscription(msg_type) => {
                let change = self.subscriptions.subscribe(handle, msg_type);
                info!("SUBSCRIBE {} to MT:{} ({:?})", handle, msg_type, change);
                self.acknowledge(handle);
            }
            ControlMessage::Unsubscribe(msg_type) | ControlMessage::PauseSubscription(msg_type) => {
                let change = self.subscriptions.unsubscribe(handle, msg_type);
                if change == SubscriptionChange::Unchanged {
                    debug!("UNSUBSCRIBE {} from MT:{} had no effect", handle, msg_type);
                } else {
                    info!("UNSUBSCRIBE {} from MT:{}", handle, msg_type);
                }
                self.acknowledge(handle);
            }
            ControlMessage::ModuleReady { pid } => {
                if let Some(module) = self.modules.get_mut(handle) {
                    module.pid = pid;
                    info!("MODULE_READY {}", module);
                }
            }
            ControlMessage::SetName(name) => self.rename_module(handle, name),
            ControlMessage::Other => {
                if let Err(err) = self.schemas.validate(&message.header) {
                    self.report_desync(handle, err);
                    return;
                }
                self.forward(handle, message);
            }
        }
    }

    fn connect_module(&mut self, handle: ModuleHandle, request: ConnectRequest) {
        let dynamic_start = self.config.identity.dynamic_start;
        match admit(&self.modules, &mut self.identities, handle, &request, dynamic_start) {
            Ok(mod_id) => {
                self.modules.register(handle, mod_id, request.logger);
                if let Some(module) = self.modules.get_mut(handle) {
                    module.name = request.name;
                    module.pid = request.pid;
                    module.is_daemon = request.daemon;
                    module.unique = request.unique;
                    info!("✅ CONNECT {} (logger={})", module, module.is_logger);
                }
                self.acknowledge(handle);
                self.publish_client_info(handle);
            }
            Err(rejection) => {
                warn!("❌ CONNECT refused for connection {}: {}", handle, rejection);
                self.remove_module(handle, Removal::Rejected(rejection.to_string()));
            }
        }
    }

    fn rename_module(&mut self, handle: ModuleHandle, name: String) {
        let Some(module) = self.modules.get(handle) else {
            return;
        };
        if module.unique && self.modules.unique_holder_of_name(&name, handle).is_some() {
            let text = format!("SET_NAME refused for {}: {:?} is held by another unique module", module, name);
            warn!("{}", text);
            self.publish_log(LogLevel::Warning, &text);
            return;
        }
        if let Some(module) = self.modules.get_mut(handle) {
            info!("SET_NAME {} -> {:?}", module, name);
            module.name = Some(name);
        }
        self.acknowledge(handle);
        self.publish_client_info(handle);
    }

    /// Drop a connection after an I/O error
    pub(crate) fn connection_lost(&mut self, handle: ModuleHandle, reason: &str) {
        self.remove_module(handle, Removal::ConnectionLost(reason.to_string()));
    }

    /// Full cleanup: subscriptions, logger set, socket, module-left notice
    pub(crate) fn remove_module(&mut self, handle: ModuleHandle, removal: Removal) {
        self.subscriptions.remove_module(handle);
        let Some(mut module) = self.modules.remove(handle) else {
            return;
        };
        if !matches!(removal, Removal::Disconnect) {
            module.abort();
        }

        match &removal {
            Removal::Disconnect => info!("DISCONNECT {}", module),
            Removal::Rejected(reason) => {
                self.publish_log(LogLevel::Warning, &format!("CONNECT refused for {}: {}", module.peer, reason));
            }
            Removal::ConnectionLost(reason) => {
                warn!("Connection lost, removing {}: {}", module, reason);
                self.publish_log(LogLevel::Error, &format!("Connection lost for {}: {}", module, reason));
            }
        }

        if module.registered {
            self.publish_payload(&client_closed(&module));
        }
    }

    fn acknowledge(&mut self, handle: ModuleHandle) {
        let Some(module) = self.modules.get(handle) else {
            return;
        };
        let ack = Message::signal(MT_ACKNOWLEDGE).addressed(module.mod_id, 0);
        self.publish(ack, Route::Direct(handle));
    }

    pub(crate) fn publish_client_info(&mut self, handle: ModuleHandle) {
        if let Some(module) = self.modules.get(handle) {
            let info = client_info(module);
            self.publish_payload(&info);
        }
    }

    /// Payload disagreed with the schema registry; the stream is still framed
    fn report_desync(&mut self, handle: ModuleHandle, err: ProtocolError) {
        let source = match self.modules.get(handle) {
            Some(module) => module.to_string(),
            None => handle.to_string(),
        };
        let text = format!("Dropping message from {}: {}", source, err);
        warn!("{}", text);
        self.publish_log(LogLevel::Warning, &text);
    }
}

/// Directory entry for a registered module
pub(crate) fn client_info(module: &Module) -> ClientInfo {
    ClientInfo {
        timestamp: wall_clock_seconds(),
        pid: module.pid,
        mod_id: module.mod_id,
        is_logger: u8::from(module.is_logger),
        is_unique: u8::from(module.unique),
        is_daemon: u8::from(module.is_daemon),
        reserved: [0; 3],
        port: i32::from(module.peer.port()),
        addr: encode_text_truncated::<MAX_ADDRESS_LENGTH>(&module.peer.ip().to_string()),
        name: encode_text_truncated(module.name.as_deref().unwrap_or_default()),
    }
}

fn client_closed(module: &Module) -> ClientClosed {
    ClientClosed {
        timestamp: wall_clock_seconds(),
        mod_id: module.mod_id,
        reserved: 0,
        pid: module.pid,
        name: encode_text_truncated(module.name.as_deref().unwrap_or_default()),
    }
}
