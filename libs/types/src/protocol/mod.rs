//! Protocol data layer
//!
//! Reserved identifiers, the fixed message header and the payload structs for the
//! closed set of control and diagnostic messages the broker itself produces or decodes.

pub mod constants;
pub mod message;
pub mod payloads;

pub use constants::*;
pub use message::*;
pub use payloads::*;
