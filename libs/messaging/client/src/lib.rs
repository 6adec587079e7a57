//! # Module Client
//!
//! ## Purpose
//!
//! The library every module uses to talk to the message manager: connect and
//! register, manage subscriptions, send fixed-layout messages and signals, and
//! read what the manager forwards.
//!
//! ## Architecture Role
//!
//! ```text
//! application ──send_*──▶ [Client] ──TCP──▶ message manager
//!      ▲                     │
//!      └──read_message───────┘◀── reader task ◀── TCP
//! ```
//!
//! A background reader task frames inbound messages into a channel, so a
//! `read_message` timeout never leaves half a frame on the socket.

pub mod client;
pub mod error;

pub use client::{Client, ClientConfig, ConnectOptions, DEFAULT_MANAGER_ADDR};
pub use error::{ClientError, Result};
