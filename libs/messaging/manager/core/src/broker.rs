//! # Broker Event Loop
//!
//! ## Purpose
//! The single coordinating task. It owns the module registry, the subscription
//! registry, the identity allocator and the diagnostics counters; connection tasks
//! only ever talk to it through channels.
//!
//! ## Architecture Role
//!
//! ```mermaid
//! graph LR
//!     Listener[TcpListener] -->|accept| Broker
//!     R1[reader #1] -->|BrokerEvent| Events[(event channel)]
//!     R2[reader #2] -->|BrokerEvent| Events
//!     Events -->|recv_many batch| Broker
//!     Broker -->|try_send / send| W1[writer #1]
//!     Broker -->|try_send / send| W2[writer #2]
//!     Tick[poll interval] --> Broker
//! ```
//!
//! ## Iteration
//!
//! Each wake-up (accept, a batch of inbound events, or the poll tick) is followed
//! by a diagnostics check, so the periodic broadcasts fire even when idle.
//! Inbound batches are grouped by source and interleaved in a freshly shuffled
//! order, one message per source per round: per-source order is preserved while
//! no module is systematically served first.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;

use codec::{HeaderFormat, Message, SchemaRegistry};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::ManagerConfig;
use crate::connection::{self, BrokerEvent, Outbound};
use crate::diagnostics::Diagnostics;
use crate::error::{ManagerError, Result};
use crate::forwarding::Pending;
use crate::modules::{IdentityAllocator, Module, ModuleHandle, ModuleRegistry};
use crate::subscriptions::SubscriptionRegistry;

/// The message manager
pub struct Broker {
    pub(crate) config: ManagerConfig,
    pub(crate) format: HeaderFormat,
    pub(crate) schemas: SchemaRegistry,
    pub(crate) modules: ModuleRegistry,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) identities: IdentityAllocator,
    pub(crate) diagnostics: Diagnostics,
    /// Broker-originated and forwarded frames awaiting delivery
    pub(crate) outbox: VecDeque<Pending>,
    pub(crate) pid: i32,
    events_tx: mpsc::Sender<BrokerEvent>,
    events_rx: mpsc::Receiver<BrokerEvent>,
    rng: StdRng,
}

impl Broker {
    /// Create a broker from a validated configuration
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::channel(config.delivery.event_queue_depth);
        let identities =
            IdentityAllocator::new(config.identity.dynamic_start, config.identity.max_modules);

        Ok(Self {
            format: HeaderFormat::from_timecode_flag(config.transport.timecode),
            schemas: config.schema_registry(),
            modules: ModuleRegistry::new(),
            subscriptions: SubscriptionRegistry::new(),
            identities,
            diagnostics: Diagnostics::new(Instant::now()),
            outbox: VecDeque::new(),
            pid: std::process::id() as i32,
            events_tx,
            events_rx,
            rng: StdRng::from_entropy(),
            config,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn module(&self, handle: ModuleHandle) -> Option<&Module> {
        self.modules.get(handle)
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Bind the configured listening socket
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|source| ManagerError::Bind { addr, source })
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.run(listener, shutdown).await
    }

    /// Serve connections on `listener` until `shutdown` resolves
    pub async fn run<F>(mut self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            "🚀 Starting {} on {} ({:?} header)",
            self.config.manager.name,
            listener.local_addr()?,
            self.format
        );

        let batch_size = self.config.delivery.event_batch_size;
        let mut batch = Vec::with_capacity(batch_size);
        let mut poll = interval(self.config.diagnostics.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("🛑 Shutdown requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer),
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                received = self.events_rx.recv_many(&mut batch, batch_size) => {
                    if received > 0 {
                        let events = std::mem::take(&mut batch);
                        self.process_batch(events).await;
                    }
                }
                _ = poll.tick() => {}
            }

            self.emit_due_diagnostics(Instant::now());
            self.flush().await;
        }

        self.close_all();
        info!("✅ Message manager stopped");
        Ok(())
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to disable Nagle on {}: {}", peer, e);
        }
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.delivery.outbound_queue_depth);

        let handle = self.modules.insert(peer, outbound_tx);
        let writer =
            connection::spawn_writer(handle, write_half, outbound_rx, self.events_tx.clone());
        let reader = connection::spawn_reader(
            handle,
            read_half,
            self.format,
            self.config.transport.max_payload_bytes,
            self.events_tx.clone(),
        );
        self.modules
            .set_tasks(handle, reader.abort_handle(), writer.abort_handle());

        info!("📡 Connection {} accepted from {}", handle, peer);
    }

    /// Attach a module without a socket; its writes land in the returned queue
    pub fn attach(&mut self, peer: SocketAddr) -> (ModuleHandle, mpsc::Receiver<Outbound>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.delivery.outbound_queue_depth);
        let handle = self.modules.insert(peer, outbound_tx);
        (handle, outbound_rx)
    }

    /// Interleave a batch of events by source in randomized order
    async fn process_batch(&mut self, events: Vec<BrokerEvent>) {
        let mut index: HashMap<ModuleHandle, usize> = HashMap::new();
        let mut queues: Vec<VecDeque<BrokerEvent>> = Vec::new();
        for event in events {
            let slot = *index.entry(event.handle()).or_insert_with(|| {
                queues.push(VecDeque::new());
                queues.len() - 1
            });
            queues[slot].push_back(event);
        }

        let mut order: Vec<usize> = (0..queues.len()).collect();
        while !order.is_empty() {
            order.shuffle(&mut self.rng);
            for &slot in &order {
                if let Some(event) = queues[slot].pop_front() {
                    self.handle_event(event).await;
                }
            }
            order.retain(|&slot| !queues[slot].is_empty());
        }
    }

    async fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Inbound { handle, message } => self.handle_inbound(handle, message).await,
            BrokerEvent::Closed { handle, reason } => {
                if self.modules.contains(handle) {
                    self.connection_lost(handle, &reason);
                    self.flush().await;
                }
            }
        }
    }

    /// Process one inbound message from `handle` and deliver everything it caused
    pub async fn handle_inbound(&mut self, handle: ModuleHandle, message: Message) {
        if !self.modules.contains(handle) {
            return;
        }
        self.diagnostics.count(message.msg_type());
        self.dispatch_inbound(handle, message);
        self.flush().await;
    }

    /// Close every connection
    fn close_all(&mut self) {
        let handles: Vec<ModuleHandle> = self.modules.iter().map(|module| module.handle).collect();
        for handle in handles {
            self.subscriptions.remove_module(handle);
            self.modules.remove(handle);
        }
        self.outbox.clear();
    }
}
