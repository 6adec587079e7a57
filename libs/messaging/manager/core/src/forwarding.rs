//! # Forwarding Engine
//!
//! ## Purpose
//! Computes each message's delivery set and applies the backpressure policy:
//!
//! 1. Delivery set = subscribers(type) ∪ subscribers(wildcard) ∪ loggers
//! 2. `dest_mod_id != 0` keeps only the addressed module plus loggers
//! 3. Loggers are written with a blocking wait and never lose data
//! 4. Everyone else gets `try_send`: a full queue drops the message, bumps the
//!    module's drop counter and emits `FAILED_MESSAGE`; a closed queue removes the
//!    module and also emits `FAILED_MESSAGE`
//!
//! ## Bounded Failure Notices
//!
//! Everything the broker delivers goes through one work queue (`outbox`). A failed
//! delivery appends its `FAILED_MESSAGE` to the same queue instead of recursing,
//! and messages of a failure-exempt type (`FAILED_MESSAGE`, `MM_LOG`) are never
//! wrapped again, so every failure chain ends after one notice.

use std::collections::BTreeSet;

use codec::{Message, MessageHeader, MessagePayload};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use types::{
    is_failure_exempt, wall_clock_seconds, FailedMessage, LogLevel, MmLog, HID_ALL_HOSTS,
    MID_MESSAGE_MANAGER, MT_FAILED_MESSAGE,
};

use crate::broker::Broker;
use crate::connection::Outbound;
use crate::modules::ModuleHandle;

/// Where a queued frame goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// Subscribers of the type, filtered by `dest_mod_id`, plus loggers
    Subscribers,
    /// One module plus loggers (acknowledgements)
    Direct(ModuleHandle),
}

/// A frame waiting in the outbox
#[derive(Debug)]
pub(crate) struct Pending {
    pub header: MessageHeader,
    pub frame: Outbound,
    pub route: Route,
}

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
enum Delivery {
    Delivered,
    /// Queue full; message dropped
    Dropped,
    /// Queue closed or logger timed out; connection is gone
    Failed(String),
    /// Module already removed earlier in this flush
    Gone,
}

impl Broker {
    /// Queue an inbound application message for forwarding
    ///
    /// Out-of-range destinations are malformed requests: logged and dropped
    /// without a failure notice.
    pub(crate) fn forward(&mut self, handle: ModuleHandle, message: Message) {
        let header = message.header;
        if !self.valid_destination(&header) {
            warn!(
                "Dropping message type {} from {}: invalid destination mod {} host {}",
                header.msg_type, handle, header.dest_mod_id, header.dest_host_id
            );
            return;
        }
        trace!(msg_type = header.msg_type, %handle, "FORWARD");
        self.outbox.push_back(Pending {
            header,
            frame: Outbound::Forward(message.encode(self.format)),
            route: Route::Subscribers,
        });
    }

    fn valid_destination(&self, header: &MessageHeader) -> bool {
        let identity = &self.config.identity;
        let mod_ok = (0..=identity.max_modules).contains(&header.dest_mod_id);
        let host_ok = (0..=identity.max_hosts).contains(&header.dest_host_id)
            || header.dest_host_id == HID_ALL_HOSTS;
        mod_ok && host_ok
    }

    /// Queue a broker-originated message
    pub(crate) fn publish(&mut self, message: Message, route: Route) {
        let message = message.from_source(MID_MESSAGE_MANAGER, self.config.manager.host_id);
        self.outbox.push_back(Pending {
            header: message.header,
            frame: Outbound::Originated(message.encode(self.format)),
            route,
        });
    }

    /// Broadcast a fixed-layout payload from the broker
    pub(crate) fn publish_payload<T: MessagePayload>(&mut self, payload: &T) {
        self.publish(Message::from_payload(payload), Route::Subscribers);
    }

    /// Publish an `MM_LOG` record
    pub(crate) fn publish_log(&mut self, level: LogLevel, text: &str) {
        self.publish_payload(&MmLog::new(level, wall_clock_seconds(), text));
    }

    /// Deliver everything in the outbox, including notices raised along the way
    pub(crate) async fn flush(&mut self) {
        while let Some(pending) = self.outbox.pop_front() {
            let targets = self.delivery_set(&pending.header, pending.route);
            for handle in targets {
                let outcome = self.deliver(handle, &pending.frame).await;
                match outcome {
                    Delivery::Delivered | Delivery::Gone => {}
                    Delivery::Dropped => {
                        let dest_mod_id = match self.modules.get_mut(handle) {
                            Some(module) => {
                                module.drop_count += 1;
                                warn!(
                                    "Dropped message type {} for {}: outbound queue full ({} drops)",
                                    pending.header.msg_type, module, module.drop_count
                                );
                                module.mod_id
                            }
                            None => continue,
                        };
                        self.notify_failure(dest_mod_id, &pending.header);
                    }
                    Delivery::Failed(reason) => {
                        let dest_mod_id = self.modules.get(handle).map(|module| module.mod_id);
                        self.connection_lost(handle, &reason);
                        if let Some(dest_mod_id) = dest_mod_id {
                            self.notify_failure(dest_mod_id, &pending.header);
                        }
                    }
                }
            }
        }
    }

    /// Registered modules that should receive a message, in handle order
    pub(crate) fn delivery_set(&self, header: &MessageHeader, route: Route) -> BTreeSet<ModuleHandle> {
        let mut targets: BTreeSet<ModuleHandle> = self.modules.loggers().collect();
        match route {
            Route::Direct(handle) => {
                targets.insert(handle);
            }
            Route::Subscribers => {
                let dest = header.dest_mod_id;
                targets.extend(self.subscriptions.subscribers(header.msg_type).filter(|handle| {
                    dest == 0
                        || self
                            .modules
                            .get(*handle)
                            .is_some_and(|module| module.mod_id == dest)
                }));
            }
        }
        targets.retain(|handle| self.modules.get(*handle).is_some_and(|module| module.registered));
        targets
    }

    async fn deliver(&self, handle: ModuleHandle, frame: &Outbound) -> Delivery {
        let Some(module) = self.modules.get(handle) else {
            return Delivery::Gone;
        };

        if module.is_logger {
            let send = module.outbound.send(frame.clone());
            let sent = match self.config.delivery.logger_write_timeout() {
                Some(limit) => match timeout(limit, send).await {
                    Ok(result) => result.is_ok(),
                    Err(_) => {
                        return Delivery::Failed(format!(
                            "logger did not drain within {:?}",
                            limit
                        ))
                    }
                },
                None => send.await.is_ok(),
            };
            return if sent {
                Delivery::Delivered
            } else {
                Delivery::Failed("connection closed".to_string())
            };
        }

        match module.outbound.try_send(frame.clone()) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Failed("connection closed".to_string()),
        }
    }

    /// Queue a `FAILED_MESSAGE` for a message that could not reach `dest_mod_id`
    fn notify_failure(&mut self, dest_mod_id: i16, header: &MessageHeader) {
        if is_failure_exempt(header.msg_type) {
            debug!(
                "Not reporting failed delivery of failure-exempt type {}",
                header.msg_type
            );
            return;
        }
        let notice = FailedMessage {
            dest_mod_id,
            reserved: [0; 3],
            time_of_failure: wall_clock_seconds(),
            msg_header: *header,
        };
        self.diagnostics.count(MT_FAILED_MESSAGE);
        self.publish_payload(&notice);
    }
}
