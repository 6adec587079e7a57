//! Control-message classification
//!
//! The broker decodes payloads only for this closed set. Everything else is
//! [`ControlMessage::Other`] and falls through to forwarding untouched.

use types::*;

use crate::envelope::Message;
use crate::error::{ProtocolError, ProtocolResult};
use crate::schema::SchemaRegistry;

/// Registration request decoded from a CONNECT message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Requested static id, 0 asks for a dynamic one
    pub requested_id: i16,
    pub logger: bool,
    pub daemon: bool,
    pub unique: bool,
    pub pid: i32,
    pub name: Option<String>,
}

/// Inbound message classified by type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Connect(ConnectRequest),
    Disconnect,
    Subscribe(i32),
    Unsubscribe(i32),
    PauseSubscription(i32),
    ResumeSubscription(i32),
    ModuleReady { pid: i32 },
    SetName(String),
    Other,
}

impl ControlMessage {
    /// Classify `message`, decoding its payload if it is a control type
    ///
    /// Control payloads are checked against `schemas` first. A mismatch is a desync
    /// for this message only; the stream itself remains framed.
    pub fn classify(message: &Message, schemas: &SchemaRegistry) -> ProtocolResult<Self> {
        let header = &message.header;
        let control = match header.msg_type {
            MT_CONNECT if message.payload.len() == LEGACY_CONNECT_SIZE => {
                let logger_status = i16::from_ne_bytes([message.payload[0], message.payload[1]]);
                let daemon_status = i16::from_ne_bytes([message.payload[2], message.payload[3]]);
                ControlMessage::Connect(ConnectRequest {
                    requested_id: header.src_mod_id,
                    logger: logger_status != 0,
                    daemon: daemon_status != 0,
                    unique: true,
                    pid: 0,
                    name: None,
                })
            }
            MT_CONNECT => {
                schemas.validate(header)?;
                let connect: Connect = message.decode_payload()?;
                ControlMessage::Connect(ConnectRequest {
                    requested_id: header.src_mod_id,
                    logger: connect.is_logger(),
                    daemon: connect.is_daemon(),
                    unique: connect.is_unique(),
                    pid: connect.pid,
                    name: connect.name(),
                })
            }
            MT_DISCONNECT => ControlMessage::Disconnect,
            MT_SUBSCRIBE => {
                schemas.validate(header)?;
                ControlMessage::Subscribe(message.decode_payload::<Subscribe>()?.msg_type)
            }
            MT_UNSUBSCRIBE => {
                schemas.validate(header)?;
                ControlMessage::Unsubscribe(message.decode_payload::<Unsubscribe>()?.msg_type)
            }
            MT_PAUSE_SUBSCRIPTION => {
                schemas.validate(header)?;
                ControlMessage::PauseSubscription(
                    message.decode_payload::<PauseSubscription>()?.msg_type,
                )
            }
            MT_RESUME_SUBSCRIPTION => {
                schemas.validate(header)?;
                ControlMessage::ResumeSubscription(
                    message.decode_payload::<ResumeSubscription>()?.msg_type,
                )
            }
            MT_MODULE_READY => {
                schemas.validate(header)?;
                ControlMessage::ModuleReady {
                    pid: message.decode_payload::<ModuleReady>()?.pid,
                }
            }
            MT_CLIENT_SET_NAME => {
                schemas.validate(header)?;
                let request: ClientSetName = message.decode_payload()?;
                let name = decode_text(&request.name);
                if name.is_empty() {
                    return Err(ProtocolError::InvalidName("empty name".to_string()));
                }
                ControlMessage::SetName(name)
            }
            _ => ControlMessage::Other,
        };
        Ok(control)
    }
}
