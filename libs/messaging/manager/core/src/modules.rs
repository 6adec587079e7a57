//! # Module Registry and Identity Allocation
//!
//! ## Purpose
//! One [`Module`] record per live connection, stored in an arena keyed by a stable
//! [`ModuleHandle`]. Handles are never reused, so a stale handle held by an
//! in-flight event simply misses instead of aliasing a newer connection.
//!
//! The registry is owned by the broker task and mutated only there.
//!
//! ## Identity Bands
//!
//! ```text
//!  0        1 ............ dynamic_start-1   dynamic_start ........ max_modules-1
//!  broker   static ids (client requested)    dynamic ids (broker assigned)
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::connection::Outbound;
use crate::error::{ManagerError, Result};

/// Stable arena key for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleHandle(pub u64);

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One client connection
#[derive(Debug)]
pub struct Module {
    pub handle: ModuleHandle,
    pub peer: SocketAddr,
    /// Assigned id, 0 until registered
    pub mod_id: i16,
    pub name: Option<String>,
    pub pid: i32,
    pub is_logger: bool,
    pub is_daemon: bool,
    pub unique: bool,
    pub registered: bool,
    /// Deliveries dropped because the outbound queue was full
    pub drop_count: u64,
    pub(crate) outbound: mpsc::Sender<Outbound>,
    pub(crate) reader: Option<AbortHandle>,
    pub(crate) writer: Option<AbortHandle>,
}

impl Module {
    /// Stop the reader; dropping the record closes the outbound queue, so the
    /// writer flushes what is queued and then shuts the socket down
    pub(crate) fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    /// Stop both tasks now, discarding queued frames and closing the socket
    ///
    /// A writer parked in `write_all` on a peer that stopped reading never
    /// observes the closed queue, so lossy removals must abort it.
    pub(crate) fn abort(&mut self) {
        self.close();
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}(id={}, {})", name, self.mod_id, self.peer),
            None => write!(f, "module(id={}, {})", self.mod_id, self.peer),
        }
    }
}

/// Arena of live modules plus the logger set
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleHandle, Module>,
    loggers: BTreeSet<ModuleHandle>,
    next_handle: u64,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an unregistered module for a freshly accepted connection
    pub(crate) fn insert(
        &mut self,
        peer: SocketAddr,
        outbound: mpsc::Sender<Outbound>,
    ) -> ModuleHandle {
        self.next_handle += 1;
        let handle = ModuleHandle(self.next_handle);
        self.modules.insert(
            handle,
            Module {
                handle,
                peer,
                mod_id: 0,
                name: None,
                pid: 0,
                is_logger: false,
                is_daemon: false,
                unique: false,
                registered: false,
                drop_count: 0,
                outbound,
                reader: None,
                writer: None,
            },
        );
        handle
    }

    /// Attach the connection tasks once they have been spawned
    pub(crate) fn set_tasks(&mut self, handle: ModuleHandle, reader: AbortHandle, writer: AbortHandle) {
        if let Some(module) = self.modules.get_mut(&handle) {
            module.reader = Some(reader);
            module.writer = Some(writer);
        }
    }

    pub fn get(&self, handle: ModuleHandle) -> Option<&Module> {
        self.modules.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ModuleHandle) -> Option<&mut Module> {
        self.modules.get_mut(&handle)
    }

    pub fn contains(&self, handle: ModuleHandle) -> bool {
        self.modules.contains_key(&handle)
    }

    /// Remove a module and its logger-set membership
    pub(crate) fn remove(&mut self, handle: ModuleHandle) -> Option<Module> {
        self.loggers.remove(&handle);
        let mut module = self.modules.remove(&handle)?;
        module.close();
        Some(module)
    }

    /// Record a successful handshake
    pub(crate) fn register(&mut self, handle: ModuleHandle, mod_id: i16, is_logger: bool) {
        if let Some(module) = self.modules.get_mut(&handle) {
            module.mod_id = mod_id;
            module.is_logger = is_logger;
            module.registered = true;
            if is_logger {
                self.loggers.insert(handle);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    /// Registered modules in handle order
    pub fn registered(&self) -> impl Iterator<Item = &Module> {
        self.modules.values().filter(|module| module.registered)
    }

    pub fn loggers(&self) -> impl Iterator<Item = ModuleHandle> + '_ {
        self.loggers.iter().copied()
    }

    /// Ids currently held by registered modules
    pub fn ids_in_use(&self) -> HashSet<i16> {
        self.registered().map(|module| module.mod_id).collect()
    }

    /// Registered unique module holding `mod_id`, other than `except`
    pub fn unique_holder_of_id(&self, mod_id: i16, except: ModuleHandle) -> Option<&Module> {
        self.registered()
            .find(|module| module.unique && module.mod_id == mod_id && module.handle != except)
    }

    /// Registered unique module named `name`, other than `except`
    pub fn unique_holder_of_name(&self, name: &str, except: ModuleHandle) -> Option<&Module> {
        self.registered().find(|module| {
            module.unique && module.handle != except && module.name.as_deref() == Some(name)
        })
    }
}

/// Circular cursor over the dynamic id band `[start, end)`
#[derive(Debug, Clone)]
pub struct IdentityAllocator {
    start: i16,
    end: i16,
    cursor: i16,
}

impl IdentityAllocator {
    pub fn new(start: i16, end: i16) -> Self {
        Self {
            start,
            end,
            cursor: start,
        }
    }

    /// Next id not in `in_use`, advancing the cursor past it
    ///
    /// Visits every id of the band at most once per call.
    pub fn allocate(&mut self, in_use: &HashSet<i16>) -> Result<i16> {
        for _ in self.start..self.end {
            let candidate = self.cursor;
            self.cursor = if self.cursor + 1 >= self.end {
                self.start
            } else {
                self.cursor + 1
            };
            if !in_use.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(ManagerError::IdentityExhausted {
            start: self.start,
            end: self.end,
        })
    }
}
