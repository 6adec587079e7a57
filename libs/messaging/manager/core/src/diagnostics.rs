//! # Diagnostics Emitter
//!
//! ## Purpose
//! Periodic broker broadcasts, checked once per loop iteration against the
//! configured intervals:
//!
//! | Broadcast          | Interval                | Content                                    |
//! |--------------------|-------------------------|--------------------------------------------|
//! | `TIMING_MESSAGE`   | `timing_interval_ms`    | per-type counts since last send, id→pid     |
//! | `MESSAGE_TRAFFIC`  | `traffic_interval_ms`   | per-type counts, chunked 128 types per msg  |
//! | `ACTIVE_CLIENTS`   | `directory_interval_ms` | followed by one `CLIENT_INFO` per module    |
//!
//! Counters see every inbound message and every emitted `FAILED_MESSAGE`. The
//! timing and traffic counters are independent and reset on their own schedule.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use types::{
    wall_clock_seconds, ActiveClients, MessageTraffic, TimingMessage, MAX_MESSAGE_TYPES,
    MAX_MODULES, MESSAGE_TRAFFIC_SIZE,
};

use crate::broker::Broker;
use crate::lifecycle::client_info;

/// Per-type counters and emission schedule
#[derive(Debug)]
pub(crate) struct Diagnostics {
    timing: BTreeMap<i32, u32>,
    traffic: BTreeMap<i32, u32>,
    traffic_seq: u32,
    last_timing: Instant,
    last_traffic: Instant,
    last_directory: Instant,
}

impl Diagnostics {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            timing: BTreeMap::new(),
            traffic: BTreeMap::new(),
            traffic_seq: 0,
            last_timing: now,
            last_traffic: now,
            last_directory: now,
        }
    }

    /// Negative ids have no slot in either report and are not counted
    pub(crate) fn count(&mut self, msg_type: i32) {
        if msg_type < 0 {
            debug!("Not counting negative message type {}", msg_type);
            return;
        }
        *self.timing.entry(msg_type).or_default() += 1;
        *self.traffic.entry(msg_type).or_default() += 1;
    }

    /// Count of `msg_type` since the last traffic report
    #[cfg(test)]
    pub(crate) fn pending_count(&self, msg_type: i32) -> u32 {
        self.traffic.get(&msg_type).copied().unwrap_or_default()
    }

    fn take_timing(&mut self) -> BTreeMap<i32, u32> {
        std::mem::take(&mut self.timing)
    }

    /// Drain the traffic counters into report chunks
    fn take_traffic(&mut self, duration: Duration) -> Vec<MessageTraffic> {
        let counts = std::mem::take(&mut self.traffic);
        let entries: Vec<(u32, u32)> = counts
            .into_iter()
            .filter_map(|(msg_type, count)| u32::try_from(msg_type).ok().map(|t| (t, count)))
            .collect();
        if entries.is_empty() {
            return Vec::new();
        }

        self.traffic_seq = self.traffic_seq.wrapping_add(1);
        let timestamp = wall_clock_seconds();
        entries
            .chunks(MESSAGE_TRAFFIC_SIZE)
            .enumerate()
            .map(|(sub_seq, chunk)| {
                let mut report = MessageTraffic {
                    seq: self.traffic_seq,
                    sub_seq: sub_seq as u32,
                    timestamp,
                    duration: duration.as_secs_f64(),
                    num_msg_types: chunk.len() as u32,
                    reserved: 0,
                    msg_type: [0; MESSAGE_TRAFFIC_SIZE],
                    msg_count: [0; MESSAGE_TRAFFIC_SIZE],
                };
                for (slot, (msg_type, count)) in chunk.iter().enumerate() {
                    report.msg_type[slot] = *msg_type;
                    report.msg_count[slot] = *count;
                }
                report
            })
            .collect()
    }
}

fn due(last: Instant, now: Instant, interval_ms: u64) -> bool {
    now.saturating_duration_since(last) >= Duration::from_millis(interval_ms)
}

impl Broker {
    /// Queue whichever periodic broadcasts are due at `now`
    pub(crate) fn emit_due_diagnostics(&mut self, now: Instant) {
        let schedule = self.config.diagnostics.clone();

        if due(self.diagnostics.last_timing, now, schedule.timing_interval_ms) {
            self.diagnostics.last_timing = now;
            let counts = self.diagnostics.take_timing();
            if schedule.timing_enabled {
                let timing = self.timing_message(&counts);
                self.publish_payload(&timing);
            }
        }

        if due(self.diagnostics.last_traffic, now, schedule.traffic_interval_ms) {
            let duration = now.saturating_duration_since(self.diagnostics.last_traffic);
            self.diagnostics.last_traffic = now;
            let chunks = self.diagnostics.take_traffic(duration);
            if chunks.is_empty() {
                debug!("No traffic since last report");
            }
            for chunk in &chunks {
                self.publish_payload(chunk);
            }
        }

        if due(self.diagnostics.last_directory, now, schedule.directory_interval_ms) {
            self.diagnostics.last_directory = now;
            self.publish_directory();
        }
    }

    fn timing_message(&self, counts: &BTreeMap<i32, u32>) -> TimingMessage {
        let mut timing = TimingMessage {
            timing: [0; MAX_MESSAGE_TYPES],
            module_pid: [0; MAX_MODULES],
            send_time: wall_clock_seconds(),
        };
        for (&msg_type, &count) in counts {
            if let Some(slot) = usize::try_from(msg_type).ok().and_then(|t| timing.timing.get_mut(t)) {
                *slot = u16::try_from(count).unwrap_or(u16::MAX);
            }
        }
        timing.module_pid[0] = self.pid;
        for module in self.modules.registered() {
            if let Some(slot) = usize::try_from(module.mod_id).ok().and_then(|id| timing.module_pid.get_mut(id)) {
                *slot = module.pid;
            }
        }
        timing
    }

    fn publish_directory(&mut self) {
        let mut active = ActiveClients {
            timestamp: wall_clock_seconds(),
            num_clients: 0,
            reserved: 0,
            client_mod_id: [0; MAX_MODULES],
            client_pid: [0; MAX_MODULES],
        };
        let infos: Vec<_> = self.modules.registered().map(client_info).collect();
        for (slot, info) in infos.iter().take(MAX_MODULES).enumerate() {
            active.client_mod_id[slot] = info.mod_id;
            active.client_pid[slot] = info.pid;
            active.num_clients += 1;
        }

        self.publish_payload(&active);
        for info in &infos {
            self.publish_payload(info);
        }
    }
}
