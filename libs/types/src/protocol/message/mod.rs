//! # Message Envelope Definitions
//!
//! ## Purpose
//!
//! Defines the fixed header that prefixes every message on every connection and
//! the optional timecode extension some deployments append to it.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────┬──────────────┬────────────────────────────┐
//! │ MessageHeader (48 bytes)     │ TimeCode (8) │ payload (num_data_bytes)   │
//! │                              │ optional     │                            │
//! └──────────────────────────────┴──────────────┴────────────────────────────┘
//! ```
//!
//! The timecode extension is a connection-wide choice agreed out of band
//! ([`HeaderFormat`]); nothing on the wire says whether it is present.
//! Framing relies solely on `num_data_bytes`: there is no extra length prefix.

pub mod header;

pub use header::{wall_clock_seconds, HeaderFormat, MessageHeader, TimeCode};
