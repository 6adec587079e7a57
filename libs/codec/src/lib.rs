//! # Message Manager Protocol Codec
//!
//! ## Purpose
//!
//! The "rules" layer between the pure wire structs in `types` and the sockets owned
//! by the broker and the client library:
//! - Header encoding/decoding for both header variants
//! - Whole-message framing over any `AsyncRead`/`AsyncWrite` (header, then exactly
//!   `num_data_bytes` of payload)
//! - The schema registry (`type_id → (size, hash)`) and schema hashing
//! - Classification of inbound messages into the closed set of control messages
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → manager-core / module-client
//!     ↑           ↓                ↓
//! Pure Data   Framing +        Event loop,
//! Structures  Schema Rules     client API
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Socket management or connection state (belongs to the broker and client crates)
//! - Routing decisions
//! - Application payload definitions beyond the control and diagnostic set

pub mod control;
pub mod envelope;
pub mod error;
pub mod schema;

pub use control::{ConnectRequest, ControlMessage};
pub use envelope::{
    decode_header, encode_header, read_message, stamp_msg_count, write_frame, Message,
    DEFAULT_MAX_PAYLOAD,
};
pub use error::{ProtocolError, ProtocolResult};
pub use schema::{schema_hash, SchemaEntry, SchemaRegistry};

// Re-export the wire vocabulary so dependents need a single import
pub use types::{HeaderFormat, MessageHeader, MessagePayload, TimeCode};
