//! # Message Manager Wire Types
//!
//! Plain data definitions shared by the broker, the client library and every
//! collaborator that speaks the message manager protocol.
//!
//! ## Design Philosophy
//!
//! - **Fixed layouts**: every wire struct is `#[repr(C)]` with no implicit padding,
//!   checked at compile time by the `zerocopy` derives
//! - **Native byte order**: peers agree on layout out of band, the same way C
//!   modules sharing one struct header do
//! - **No I/O**: framing, schema hashing and control-message classification live in
//!   `codec`; sockets live in the broker and client crates
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → libs/codec → manager-core / module-client
//!     ↑             ↓                 ↓
//! Header +      Framing +         Event loop,
//! payloads      schema rules      client API
//! ```

pub mod protocol;

pub use protocol::*;
