//! # Broker Configuration
//!
//! ## Purpose
//! Startup configuration for the message manager, loaded from TOML and then
//! overridden by command-line flags. Every section has defaults matching the
//! conventional protocol constants, so an empty file (or no file) is valid.
//!
//! ## Configuration Structure
//!
//! ### 1. ManagerSettings - Identity of the broker itself
//! ```toml
//! [manager]
//! name = "message_manager"
//! host_id = 0                  # stamped as src_host_id on broker-originated messages
//! ```
//!
//! ### 2. TransportConfig - Listening socket and framing
//! ```toml
//! [transport]
//! address = "0.0.0.0"
//! port = 7111
//! timecode = false             # 56-byte header variant on every connection
//! max_payload_bytes = 1048576  # larger declared payloads end the connection
//! ```
//!
//! ### 3. IdentityConfig - Module id bands
//! ```toml
//! [identity]
//! dynamic_start = 100          # static ids live in [1, dynamic_start)
//! max_modules = 200            # dynamic ids live in [dynamic_start, max_modules)
//! max_hosts = 5
//! ```
//!
//! ### 4. DeliveryConfig - Queues and backpressure
//! ```toml
//! [delivery]
//! outbound_queue_depth = 1024  # per-module frames buffered before drops start
//! event_queue_depth = 8192     # inbound messages buffered across all readers
//! event_batch_size = 256       # inbound messages drained per loop iteration
//! # logger_write_timeout_ms = 5000   # unset: loggers may stall the loop indefinitely
//! ```
//!
//! ### 5. DiagnosticsConfig - Periodic broadcasts
//! ```toml
//! [diagnostics]
//! timing_enabled = true
//! timing_interval_ms = 1000
//! traffic_interval_ms = 10000
//! directory_interval_ms = 5000
//! poll_interval_ms = 200
//! ```
//!
//! ### 6. Application schemas
//! ```toml
//! [[schemas]]
//! id = 5000
//! name = "JOYSTICK_COMMAND"
//! size = 16
//! definition = "JOYSTICK_COMMAND:x=f64:y=f64"   # or: hash = 12345
//! ```

use std::path::Path;
use std::time::Duration;

use codec::{schema_hash, SchemaEntry, SchemaRegistry};
use serde::{Deserialize, Serialize};
use types::{DYN_MOD_ID_START, MAX_HOSTS, MAX_MODULES};

use crate::error::{ManagerError, Result};

/// Main broker configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub manager: ManagerSettings,
    pub transport: TransportConfig,
    pub identity: IdentityConfig,
    pub delivery: DeliveryConfig,
    pub diagnostics: DiagnosticsConfig,
    pub schemas: Vec<SchemaConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerSettings {
    /// Human-readable name used in log lines
    pub name: String,
    pub host_id: i16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    pub address: String,
    pub port: u16,
    /// Use the timecode header variant on every connection
    pub timecode: bool,
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub dynamic_start: i16,
    pub max_modules: i16,
    pub max_hosts: i16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub outbound_queue_depth: usize,
    pub event_queue_depth: usize,
    pub event_batch_size: usize,
    /// Upper bound on a single logger delivery; `None` waits indefinitely
    pub logger_write_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub timing_enabled: bool,
    pub timing_interval_ms: u64,
    pub traffic_interval_ms: u64,
    pub directory_interval_ms: u64,
    pub poll_interval_ms: u64,
}

/// Application schema entry from the `[[schemas]]` table
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaConfig {
    pub id: i32,
    pub name: String,
    pub size: usize,
    /// Explicit schema hash
    pub hash: Option<i32>,
    /// Canonical definition string, hashed when `hash` is absent
    pub definition: Option<String>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            name: "message_manager".to_string(),
            host_id: 0,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 7111,
            timecode: false,
            max_payload_bytes: codec::DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            dynamic_start: DYN_MOD_ID_START,
            max_modules: MAX_MODULES as i16,
            max_hosts: MAX_HOSTS,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            outbound_queue_depth: 1024,
            event_queue_depth: 8192,
            event_batch_size: 256,
            logger_write_timeout_ms: None,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            timing_enabled: true,
            timing_interval_ms: 1000,
            traffic_interval_ms: 10_000,
            directory_interval_ms: 5000,
            poll_interval_ms: 200,
        }
    }
}

impl ManagerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ManagerError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| ManagerError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject incoherent id bands, zero queue depths and zero intervals
    pub fn validate(&self) -> Result<()> {
        let identity = &self.identity;
        if identity.dynamic_start < 2 {
            return Err(ManagerError::Config(format!(
                "identity.dynamic_start must be at least 2, got {}",
                identity.dynamic_start
            )));
        }
        if identity.max_modules as usize > MAX_MODULES || identity.max_modules <= identity.dynamic_start {
            return Err(ManagerError::Config(format!(
                "identity.max_modules must lie in ({}, {}], got {}",
                identity.dynamic_start, MAX_MODULES, identity.max_modules
            )));
        }
        if identity.max_hosts < 0 {
            return Err(ManagerError::Config("identity.max_hosts must not be negative".into()));
        }

        let delivery = &self.delivery;
        if delivery.outbound_queue_depth == 0 || delivery.event_queue_depth == 0 {
            return Err(ManagerError::Config("queue depths must be greater than zero".into()));
        }
        if delivery.event_batch_size == 0 {
            return Err(ManagerError::Config("delivery.event_batch_size must be greater than zero".into()));
        }

        let diagnostics = &self.diagnostics;
        if diagnostics.poll_interval_ms == 0
            || diagnostics.timing_interval_ms == 0
            || diagnostics.traffic_interval_ms == 0
            || diagnostics.directory_interval_ms == 0
        {
            return Err(ManagerError::Config("diagnostic intervals must be greater than zero".into()));
        }

        for schema in &self.schemas {
            if schema.hash.is_some() && schema.definition.is_some() {
                return Err(ManagerError::Config(format!(
                    "schema {} sets both hash and definition",
                    schema.name
                )));
            }
        }
        Ok(())
    }

    /// `address:port` for the listening socket
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.transport.address, self.transport.port)
    }

    /// Core schemas plus every configured application schema
    pub fn schema_registry(&self) -> SchemaRegistry {
        let mut registry = SchemaRegistry::with_core_types();
        for schema in &self.schemas {
            registry.insert(schema.to_entry());
        }
        registry
    }
}

impl SchemaConfig {
    pub fn to_entry(&self) -> SchemaEntry {
        let hash = match (&self.hash, &self.definition) {
            (Some(hash), _) => *hash,
            (None, Some(definition)) => schema_hash(definition),
            (None, None) => 0,
        };
        SchemaEntry {
            id: self.id,
            name: self.name.clone(),
            size: self.size,
            hash,
        }
    }
}

impl DeliveryConfig {
    pub fn logger_write_timeout(&self) -> Option<Duration> {
        self.logger_write_timeout_ms.map(Duration::from_millis)
    }
}

impl DiagnosticsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
