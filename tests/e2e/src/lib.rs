//! End-to-end harness for the message manager
//!
//! Starts a real broker on an ephemeral loopback port and connects real clients
//! to it, so scenarios exercise framing, the event loop and the client API
//! together.

pub mod framework;

pub use framework::{init_test_logging, test_config, TestBroker};
