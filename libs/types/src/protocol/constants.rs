//! Protocol constants and reserved identifiers
//!
//! These values are part of the compatibility surface: every module built against
//! any language binding of the protocol must agree on them.

/// Highest module id (exclusive) the broker will hand out or accept as a destination
pub const MAX_MODULES: usize = 200;

/// First id of the dynamic-assignment band; static ids live in `[1, DYN_MOD_ID_START)`
pub const DYN_MOD_ID_START: i16 = 100;

/// Highest addressable host id (besides [`HID_ALL_HOSTS`])
pub const MAX_HOSTS: i16 = 5;

/// Size of the per-type counter table carried by `TIMING_MESSAGE`
pub const MAX_MESSAGE_TYPES: usize = 10_000;

/// First message type id reserved for streaming data
pub const MIN_STREAM_TYPE: i32 = 9_000;

/// Largest payload a client will put in a single message
pub const MAX_CONTIGUOUS_MESSAGE_DATA: usize = 9_000;

/// Highest message type id reserved for the core protocol
pub const MAX_RTMA_MSG_TYPE: i32 = 99;

/// Highest module id reserved for core services
pub const MAX_RTMA_MODULE_ID: i16 = 9;

/// Maximum length of a pathname in `SAVE_MESSAGE_LOG`
pub const MAX_LOGGER_FILENAME_LENGTH: usize = 256;

/// Subscription key meaning "every message type"
pub const ALL_MESSAGE_TYPES: i32 = 0x7FFF_FFFF;

/// Fixed width of module names on the wire (NUL padded UTF-8)
pub const MAX_NAME_LENGTH: usize = 32;

/// Number of `(type, count)` pairs one `MESSAGE_TRAFFIC` message can carry
pub const MESSAGE_TRAFFIC_SIZE: usize = 128;

/// Width of the text field in `MM_LOG`
pub const MAX_LOG_LENGTH: usize = 256;

/// Width of the peer address text in `CLIENT_INFO`
pub const MAX_ADDRESS_LENGTH: usize = 64;

// Module ids
pub const MID_MESSAGE_MANAGER: i16 = 0;
pub const MID_QUICK_LOGGER: i16 = 5;

// Host ids
pub const HID_LOCAL_HOST: i16 = 0;
pub const HID_ALL_HOSTS: i16 = 0x7FFF;

// Core message types
pub const MT_EXIT: i32 = 0;
pub const MT_KILL: i32 = 1;
pub const MT_ACKNOWLEDGE: i32 = 2;
pub const MT_FAIL_SUBSCRIBE: i32 = 6;
pub const MT_FAILED_MESSAGE: i32 = 8;
pub const MT_CONNECT: i32 = 13;
pub const MT_DISCONNECT: i32 = 14;
pub const MT_SUBSCRIBE: i32 = 15;
pub const MT_UNSUBSCRIBE: i32 = 16;
pub const MT_MODULE_READY: i32 = 26;
pub const MT_LM_EXIT: i32 = 55;
pub const MT_SAVE_MESSAGE_LOG: i32 = 56;
pub const MT_MESSAGE_LOG_SAVED: i32 = 57;
pub const MT_TIMING_MESSAGE: i32 = 80;
pub const MT_FORCE_DISCONNECT: i32 = 82;
pub const MT_PAUSE_SUBSCRIPTION: i32 = 85;
pub const MT_RESUME_SUBSCRIPTION: i32 = 86;
pub const MT_MM_LOG: i32 = 87;
pub const MT_MESSAGE_TRAFFIC: i32 = 88;
pub const MT_ACTIVE_CLIENTS: i32 = 89;
pub const MT_CLIENT_INFO: i32 = 90;
pub const MT_CLIENT_CLOSED: i32 = 91;
pub const MT_CLIENT_SET_NAME: i32 = 92;
pub const MT_LM_READY: i32 = 96;

/// Severity carried in `MM_LOG` records
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
}

impl From<LogLevel> for i32 {
    fn from(level: LogLevel) -> Self {
        level as i32
    }
}

/// Returns true for message types the broker must never wrap in a `FAILED_MESSAGE`
///
/// Bounds failure-notice recursion to a single level.
pub fn is_failure_exempt(msg_type: i32) -> bool {
    msg_type == MT_FAILED_MESSAGE || msg_type == MT_MM_LOG
}

/// Returns true if `mod_id` may be requested as a static id
pub fn is_static_module_id(mod_id: i16) -> bool {
    (1..DYN_MOD_ID_START).contains(&mod_id)
}
