//! Message Header Implementation
//!
//! The header is identical for all messages and carries routing, sequencing and
//! schema-version information for the payload that follows.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Message Header (48 bytes)
///
/// Field order matches the C definition used by every language binding. All fields
/// are naturally aligned so `#[repr(C)]` introduces no padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, AsBytes, FromBytes, FromZeroes)]
pub struct MessageHeader {
    pub msg_type: i32,
    /// Per-sender sequence number, stamped right before transmission
    pub msg_count: i32,
    /// Seconds since the UNIX epoch at send
    pub send_time: f64,
    /// Seconds since the UNIX epoch at receipt, filled in by the receiver
    pub recv_time: f64,
    pub src_host_id: i16,
    pub src_mod_id: i16,
    pub dest_host_id: i16,
    pub dest_mod_id: i16,
    pub num_data_bytes: i32,
    pub remaining_bytes: i32,
    pub is_dynamic: i32,
    /// Schema hash of the payload type; 0 means unknown/legacy
    pub version: i32,
}

const _: () = assert!(std::mem::size_of::<MessageHeader>() == MessageHeader::SIZE);

impl MessageHeader {
    /// Header size in bytes
    pub const SIZE: usize = 48;

    /// Create a header for `msg_type` stamped with the current wall-clock time
    pub fn new(msg_type: i32) -> Self {
        Self {
            msg_type,
            send_time: wall_clock_seconds(),
            ..Default::default()
        }
    }

    /// Declared payload length, clamping corrupt negative values to zero
    pub fn payload_len(&self) -> usize {
        usize::try_from(self.num_data_bytes).unwrap_or(0)
    }

    /// True when the message is addressed to every subscriber
    pub fn is_broadcast(&self) -> bool {
        self.dest_mod_id == 0
    }
}

/// Wall-clock timecode appended by the extended header variant
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct TimeCode {
    pub utc_seconds: u32,
    pub utc_fraction: u32,
}

impl TimeCode {
    pub const SIZE: usize = 8;

    /// Current UTC time split into whole seconds and a 2^-32 fraction
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let fraction = (u64::from(elapsed.subsec_nanos()) << 32) / 1_000_000_000;
        Self {
            utc_seconds: elapsed.as_secs() as u32,
            utc_fraction: fraction as u32,
        }
    }
}

/// Header variant used on a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderFormat {
    /// 48-byte header
    #[default]
    Standard,
    /// 48-byte header followed by an 8-byte [`TimeCode`]
    Timecode,
}

impl HeaderFormat {
    pub fn from_timecode_flag(timecode: bool) -> Self {
        if timecode {
            HeaderFormat::Timecode
        } else {
            HeaderFormat::Standard
        }
    }

    /// Bytes occupied by the header on the wire
    pub fn size(self) -> usize {
        match self {
            HeaderFormat::Standard => MessageHeader::SIZE,
            HeaderFormat::Timecode => MessageHeader::SIZE + TimeCode::SIZE,
        }
    }

    pub fn has_timecode(self) -> bool {
        matches!(self, HeaderFormat::Timecode)
    }
}

/// Seconds since the UNIX epoch as `f64`
pub fn wall_clock_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}
