//! Control and diagnostic payload structs
//!
//! ## Purpose
//!
//! The broker decodes payload bytes for a small closed set of control messages and
//! produces a handful of diagnostic messages of its own. Every other payload is
//! opaque to it and defined by the external schema registry.
//!
//! Each struct here is generated by [`define_payload!`], which pins the `#[repr(C)]`
//! layout, the zerocopy derives and a compile-time size assertion, and implements
//! [`MessagePayload`] so the struct can be sent through the client API and hashed
//! into the schema registry.

use std::mem::size_of;

use thiserror::Error;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use super::constants::*;
use super::message::MessageHeader;

/// A fixed-layout payload bound to one message type id
pub trait MessagePayload: AsBytes + FromBytes + FromZeroes + Copy {
    /// Message type id this payload travels under
    const TYPE_ID: i32;
    /// Canonical type name, without the `MT_` prefix
    const TYPE_NAME: &'static str;
    /// Canonical definition string (`NAME:field=type:...`) hashed into the schema version
    const DEFINITION: &'static str;
    /// Exact payload byte count on the wire
    const SIZE: usize = size_of::<Self>();

    /// Decode from a payload slice of exactly [`Self::SIZE`] bytes
    fn from_payload(bytes: &[u8]) -> Result<Self, PayloadError> {
        Self::read_from(bytes).ok_or(PayloadError::SizeMismatch {
            type_name: Self::TYPE_NAME,
            expected: Self::SIZE,
            got: bytes.len(),
        })
    }
}

/// Errors raised while building or decoding fixed-layout payloads
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("{type_name} payload is {got} bytes, expected {expected}")]
    SizeMismatch {
        type_name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("text of {len} bytes does not fit a {max}-byte field")]
    TextTooLong { len: usize, max: usize },
}

/// Generate a zero-copy payload struct bound to a message type id
///
/// ```ignore
/// define_payload! {
///     /// Pid announcement
///     ModuleReady = MT_MODULE_READY, "MODULE_READY", 4 bytes {
///         pid: i32,
///     }
/// }
/// ```
#[macro_export]
macro_rules! define_payload {
    (
        $(#[$meta:meta])*
        $name:ident = $type_id:expr, $type_name:literal, $size:literal bytes {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq, zerocopy::AsBytes, zerocopy::FromBytes, zerocopy::FromZeroes)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        const _: () = assert!(std::mem::size_of::<$name>() == $size);

        impl $crate::protocol::payloads::MessagePayload for $name {
            const TYPE_ID: i32 = $type_id;
            const TYPE_NAME: &'static str = $type_name;
            const DEFINITION: &'static str =
                concat!($type_name $(, ":", stringify!($field), "=", stringify!($ty))*);
        }
    };
}

define_payload! {
    /// Registration request, the first message every module sends
    ///
    /// A non-zero `src_mod_id` in the carrying header requests a static id.
    Connect = MT_CONNECT, "CONNECT", 44 bytes {
        logger_status: i16,
        daemon_status: i16,
        /// Zero marks the module as unique (one instance per id and name)
        allow_multiple: i16,
        reserved: i16,
        pid: i32,
        name: [u8; MAX_NAME_LENGTH],
    }
}

impl Connect {
    pub fn new(logger: bool, daemon: bool, unique: bool, pid: i32, name: &str) -> Result<Self, PayloadError> {
        Ok(Self {
            logger_status: i16::from(logger),
            daemon_status: i16::from(daemon),
            allow_multiple: i16::from(!unique),
            reserved: 0,
            pid,
            name: encode_text(name)?,
        })
    }

    pub fn is_logger(&self) -> bool {
        self.logger_status != 0
    }

    pub fn is_daemon(&self) -> bool {
        self.daemon_status != 0
    }

    pub fn is_unique(&self) -> bool {
        self.allow_multiple == 0
    }

    /// Declared name, `None` when the field is empty
    pub fn name(&self) -> Option<String> {
        let name = decode_text(&self.name);
        (!name.is_empty()).then_some(name)
    }
}

/// Pre-extension CONNECT payload (logger and daemon flags only)
pub const LEGACY_CONNECT_SIZE: usize = 4;

define_payload! {
    Subscribe = MT_SUBSCRIBE, "SUBSCRIBE", 4 bytes { msg_type: i32 }
}

define_payload! {
    Unsubscribe = MT_UNSUBSCRIBE, "UNSUBSCRIBE", 4 bytes { msg_type: i32 }
}

define_payload! {
    PauseSubscription = MT_PAUSE_SUBSCRIPTION, "PAUSE_SUBSCRIPTION", 4 bytes { msg_type: i32 }
}

define_payload! {
    ResumeSubscription = MT_RESUME_SUBSCRIPTION, "RESUME_SUBSCRIPTION", 4 bytes { msg_type: i32 }
}

define_payload! {
    ModuleReady = MT_MODULE_READY, "MODULE_READY", 4 bytes { pid: i32 }
}

define_payload! {
    /// Rename request for an already registered module
    ClientSetName = MT_CLIENT_SET_NAME, "CLIENT_SET_NAME", 32 bytes {
        name: [u8; MAX_NAME_LENGTH],
    }
}

define_payload! {
    /// Delivery failure notice emitted by the broker
    FailedMessage = MT_FAILED_MESSAGE, "FAILED_MESSAGE", 64 bytes {
        dest_mod_id: i16,
        reserved: [i16; 3],
        time_of_failure: f64,
        msg_header: MessageHeader,
    }
}

define_payload! {
    FailSubscribe = MT_FAIL_SUBSCRIBE, "FAIL_SUBSCRIBE", 8 bytes {
        mod_id: i16,
        reserved: i16,
        msg_type: i32,
    }
}

define_payload! {
    ForceDisconnect = MT_FORCE_DISCONNECT, "FORCE_DISCONNECT", 4 bytes { mod_id: i32 }
}

define_payload! {
    SaveMessageLog = MT_SAVE_MESSAGE_LOG, "SAVE_MESSAGE_LOG", 260 bytes {
        pathname: [u8; MAX_LOGGER_FILENAME_LENGTH],
        pathname_length: i32,
    }
}

define_payload! {
    /// Per-type send counters since the previous timing report
    TimingMessage = MT_TIMING_MESSAGE, "TIMING_MESSAGE", 20808 bytes {
        timing: [u16; MAX_MESSAGE_TYPES],
        /// Pid of each connected module, indexed by module id
        module_pid: [i32; MAX_MODULES],
        send_time: f64,
    }
}

define_payload! {
    /// One chunk of a traffic report
    ///
    /// Reports with more distinct types than one chunk holds are split across
    /// chunks sharing `seq` with increasing `sub_seq`.
    MessageTraffic = MT_MESSAGE_TRAFFIC, "MESSAGE_TRAFFIC", 1056 bytes {
        seq: u32,
        sub_seq: u32,
        timestamp: f64,
        duration: f64,
        num_msg_types: u32,
        reserved: u32,
        msg_type: [u32; MESSAGE_TRAFFIC_SIZE],
        msg_count: [u32; MESSAGE_TRAFFIC_SIZE],
    }
}

define_payload! {
    ActiveClients = MT_ACTIVE_CLIENTS, "ACTIVE_CLIENTS", 1216 bytes {
        timestamp: f64,
        num_clients: i32,
        reserved: i32,
        client_mod_id: [i16; MAX_MODULES],
        client_pid: [i32; MAX_MODULES],
    }
}

define_payload! {
    /// Directory entry for one registered module
    ClientInfo = MT_CLIENT_INFO, "CLIENT_INFO", 120 bytes {
        timestamp: f64,
        pid: i32,
        mod_id: i16,
        is_logger: u8,
        is_unique: u8,
        is_daemon: u8,
        reserved: [u8; 3],
        port: i32,
        addr: [u8; MAX_ADDRESS_LENGTH],
        name: [u8; MAX_NAME_LENGTH],
    }
}

define_payload! {
    /// Module-left notice
    ClientClosed = MT_CLIENT_CLOSED, "CLIENT_CLOSED", 48 bytes {
        timestamp: f64,
        mod_id: i16,
        reserved: i16,
        pid: i32,
        name: [u8; MAX_NAME_LENGTH],
    }
}

define_payload! {
    /// Broker log record
    MmLog = MT_MM_LOG, "MM_LOG", 272 bytes {
        level: i32,
        reserved: i32,
        timestamp: f64,
        message: [u8; MAX_LOG_LENGTH],
    }
}

impl MmLog {
    /// Build a record, truncating `text` to the field width
    pub fn new(level: LogLevel, timestamp: f64, text: &str) -> Self {
        Self {
            level: level.into(),
            reserved: 0,
            timestamp,
            message: encode_text_truncated(text),
        }
    }

    pub fn text(&self) -> String {
        decode_text(&self.message)
    }
}

/// Encode `text` into a NUL-padded fixed field, failing if it does not fit
pub fn encode_text<const N: usize>(text: &str) -> Result<[u8; N], PayloadError> {
    let bytes = text.as_bytes();
    if bytes.len() > N {
        return Err(PayloadError::TextTooLong { len: bytes.len(), max: N });
    }
    let mut field = [0u8; N];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

/// Encode `text` into a NUL-padded fixed field, cutting at a char boundary if needed
pub fn encode_text_truncated<const N: usize>(text: &str) -> [u8; N] {
    let mut end = text.len().min(N);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut field = [0u8; N];
    field[..end].copy_from_slice(&text.as_bytes()[..end]);
    field
}

/// Decode a NUL-padded fixed field, replacing invalid UTF-8
pub fn decode_text(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
