//! # Connection I/O Tasks
//!
//! Each accepted socket is split into two tasks that never touch broker state:
//!
//! - **Reader**: frames whole messages (header, then payload) and forwards them in
//!   order to the broker's event channel. Any read error ends the task after
//!   reporting [`BrokerEvent::Closed`].
//! - **Writer**: drains the module's bounded outbound queue to the socket. The
//!   queue having room is what "writable" means to the forwarding engine.
//!
//! After a DISCONNECT the broker only drops the module's outbound sender, which
//! lets the writer flush what is already queued and then shut the socket down.
//! Every other removal aborts both tasks, closing the socket at once.

use bytes::{Bytes, BytesMut};
use codec::{read_message, stamp_msg_count, write_frame, HeaderFormat, Message};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::modules::ModuleHandle;

/// Frame queued for one module's writer
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Forwarded frame, written unchanged
    Forward(Bytes),
    /// Broker-originated frame; the writer stamps this connection's sequence number
    Originated(Bytes),
}

impl Outbound {
    pub fn frame(&self) -> &Bytes {
        match self {
            Outbound::Forward(frame) | Outbound::Originated(frame) => frame,
        }
    }
}

/// Events flowing from connection tasks into the broker loop
#[derive(Debug)]
pub enum BrokerEvent {
    Inbound { handle: ModuleHandle, message: Message },
    Closed { handle: ModuleHandle, reason: String },
}

impl BrokerEvent {
    pub fn handle(&self) -> ModuleHandle {
        match self {
            BrokerEvent::Inbound { handle, .. } | BrokerEvent::Closed { handle, .. } => *handle,
        }
    }
}

pub(crate) fn spawn_reader(
    handle: ModuleHandle,
    mut stream: OwnedReadHalf,
    format: HeaderFormat,
    max_payload: usize,
    events: mpsc::Sender<BrokerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut read_count = 0u64;
        loop {
            match read_message(&mut stream, format, max_payload).await {
                Ok(message) => {
                    read_count += 1;
                    if events.send(BrokerEvent::Inbound { handle, message }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(
                        "Connection {} read task ended after {} messages: {}",
                        handle, read_count, e
                    );
                    let _ = events
                        .send(BrokerEvent::Closed {
                            handle,
                            reason: e.to_string(),
                        })
                        .await;
                    break;
                }
            }
        }
    })
}

pub(crate) fn spawn_writer(
    handle: ModuleHandle,
    mut stream: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Outbound>,
    events: mpsc::Sender<BrokerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut msg_count = 0i32;
        while let Some(item) = outbound.recv().await {
            let result = match item {
                Outbound::Forward(frame) => write_frame(&mut stream, &frame).await,
                Outbound::Originated(frame) => {
                    msg_count = msg_count.wrapping_add(1);
                    let mut frame = BytesMut::from(&frame[..]);
                    stamp_msg_count(&mut frame, msg_count);
                    write_frame(&mut stream, &frame).await
                }
            };

            if let Err(e) = result {
                warn!("Failed to write to connection {}: {}", handle, e);
                // Close the queue first so a broker blocked on it wakes up
                drop(outbound);
                let _ = events
                    .send(BrokerEvent::Closed {
                        handle,
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        }
        let _ = stream.shutdown().await;
    })
}
