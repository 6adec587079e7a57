//! # Message Manager Broker Core
//!
//! ## Purpose
//!
//! The central broker of a star-topology pub/sub bus. Modules connect over TCP,
//! register with a CONNECT handshake, declare subscriptions by message type and
//! exchange fixed-layout messages that the broker routes to every interested
//! module. Logger modules receive everything, and receive it losslessly.
//!
//! ## Architecture Role
//!
//! ```mermaid
//! graph TD
//!     Bin[message_manager binary] --> Broker
//!     Broker --> Lifecycle[lifecycle: handshake + removal]
//!     Broker --> Forwarding[forwarding: delivery set + backpressure]
//!     Broker --> Diagnostics[diagnostics: timing / traffic / directory]
//!     Lifecycle --> Modules[ModuleRegistry + IdentityAllocator]
//!     Lifecycle --> Subs[SubscriptionRegistry]
//!     Forwarding --> Conn[connection reader/writer tasks]
//!     Conn --> Codec[codec framing]
//! ```
//!
//! ## Ordering
//!
//! All registry mutation and every delivery decision happen on the broker task.
//! Messages from one source reach each destination in the order they were read.

pub mod broker;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod forwarding;
pub mod lifecycle;
pub mod modules;
pub mod subscriptions;

#[cfg(test)]
mod test_support;

pub use broker::Broker;
pub use config::{
    DeliveryConfig, DiagnosticsConfig, IdentityConfig, ManagerConfig, ManagerSettings,
    SchemaConfig, TransportConfig,
};
pub use connection::{BrokerEvent, Outbound};
pub use error::{ManagerError, Result};
pub use lifecycle::Rejection;
pub use modules::{IdentityAllocator, Module, ModuleHandle, ModuleRegistry};
pub use subscriptions::{SubscriptionChange, SubscriptionRegistry};
