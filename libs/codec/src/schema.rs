//! Schema registry: `type_id → (payload size, schema hash)`
//!
//! The broker consults it only for control messages; the client library uses it
//! for the optional sync check on every message it reads. Application types are
//! registered from compiled definitions or from the `[[schemas]]` config table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use types::*;

use crate::error::{ProtocolError, ProtocolResult};

/// Schema hash of a canonical definition string
///
/// CRC32 of the definition text, reinterpreted as `i32` to fit the header's
/// `version` field.
pub fn schema_hash(definition: &str) -> i32 {
    crc32fast::hash(definition.as_bytes()) as i32
}

/// Known layout of one message type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub id: i32,
    pub name: String,
    pub size: usize,
    /// Expected schema hash; 0 disables the version check for this type
    #[serde(default)]
    pub hash: i32,
}

impl SchemaEntry {
    /// Entry for a fixed-layout payload struct
    pub fn of<T: MessagePayload>() -> Self {
        Self {
            id: T::TYPE_ID,
            name: T::TYPE_NAME.to_string(),
            size: T::SIZE,
            hash: schema_hash(T::DEFINITION),
        }
    }

    /// Entry for a payload-less signal type
    pub fn signal(id: i32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            size: 0,
            hash: schema_hash(name),
        }
    }
}

/// Lookup table of known message layouts
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entries: HashMap<i32, SchemaEntry>,
}

impl SchemaRegistry {
    /// Empty registry; every type passes validation
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every core control, signal and diagnostic type
    pub fn with_core_types() -> Self {
        let mut registry = Self::new();

        for (id, name) in [
            (MT_EXIT, "EXIT"),
            (MT_KILL, "KILL"),
            (MT_ACKNOWLEDGE, "ACKNOWLEDGE"),
            (MT_DISCONNECT, "DISCONNECT"),
            (MT_LM_EXIT, "LM_EXIT"),
            (MT_MESSAGE_LOG_SAVED, "MESSAGE_LOG_SAVED"),
            (MT_LM_READY, "LM_READY"),
        ] {
            registry.insert(SchemaEntry::signal(id, name));
        }

        registry.register::<Connect>();
        registry.register::<Subscribe>();
        registry.register::<Unsubscribe>();
        registry.register::<PauseSubscription>();
        registry.register::<ResumeSubscription>();
        registry.register::<ModuleReady>();
        registry.register::<ClientSetName>();
        registry.register::<FailedMessage>();
        registry.register::<FailSubscribe>();
        registry.register::<ForceDisconnect>();
        registry.register::<SaveMessageLog>();
        registry.register::<TimingMessage>();
        registry.register::<MessageTraffic>();
        registry.register::<ActiveClients>();
        registry.register::<ClientInfo>();
        registry.register::<ClientClosed>();
        registry.register::<MmLog>();
        registry
    }

    pub fn register<T: MessagePayload>(&mut self) {
        self.insert(SchemaEntry::of::<T>());
    }

    /// Insert or replace the entry for `entry.id`
    pub fn insert(&mut self, entry: SchemaEntry) {
        if let Some(previous) = self.entries.insert(entry.id, entry) {
            debug!(
                "Replaced schema for message type {} ({})",
                previous.id, previous.name
            );
        }
    }

    pub fn get(&self, type_id: i32) -> Option<&SchemaEntry> {
        self.entries.get(&type_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check a header against the registered layout of its type
    ///
    /// Unknown types pass. A zero hash on either side is treated as legacy and
    /// never reported as a mismatch.
    pub fn validate(&self, header: &MessageHeader) -> ProtocolResult<()> {
        let Some(entry) = self.entries.get(&header.msg_type) else {
            return Ok(());
        };

        let got = header.payload_len();
        if header.num_data_bytes < 0 || got != entry.size {
            return Err(ProtocolError::SizeMismatch {
                msg_type: header.msg_type,
                expected: entry.size,
                got,
            });
        }

        if header.version != 0 && entry.hash != 0 && header.version != entry.hash {
            return Err(ProtocolError::VersionMismatch {
                msg_type: header.msg_type,
                expected: entry.hash,
                got: header.version,
            });
        }

        Ok(())
    }
}
