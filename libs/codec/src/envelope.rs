//! # Message Envelope Framing
//!
//! ## Purpose
//!
//! Encodes and decodes the fixed header and frames whole messages on a byte stream.
//! A message is read completely (header, then exactly `num_data_bytes` of payload)
//! before the next one is started, so per-source ordering falls out of the framing.
//!
//! ## Failure Semantics
//!
//! Any short read from a closed stream surfaces as [`ProtocolError::ConnectionLost`]
//! for that peer. Nothing partial is ever returned.
//!
//! ## Sequence Stamping
//!
//! `msg_count` reflects transmission order, so it is written into an already
//! encoded frame immediately before the write via [`stamp_msg_count`].

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use types::{wall_clock_seconds, HeaderFormat, MessageHeader, MessagePayload, TimeCode};
use zerocopy::{AsBytes, FromBytes};

use crate::error::{ProtocolError, ProtocolResult};
use crate::schema::schema_hash;

/// Default framing limit for a single payload
pub const DEFAULT_MAX_PAYLOAD: usize = 1 << 20;

/// Byte offset of `msg_count` inside an encoded header
const MSG_COUNT_OFFSET: usize = 4;

/// Header plus exactly `num_data_bytes` of opaque payload
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: MessageHeader,
    pub timecode: Option<TimeCode>,
    pub payload: Bytes,
}

impl Message {
    /// Build a message of `msg_type` around `payload`, keeping `num_data_bytes` in step
    pub fn new(msg_type: i32, payload: Bytes) -> Self {
        let mut header = MessageHeader::new(msg_type);
        header.num_data_bytes = payload.len() as i32;
        Self {
            header,
            timecode: None,
            payload,
        }
    }

    /// Payload-less message (ACKNOWLEDGE, DISCONNECT, EXIT, ...)
    pub fn signal(msg_type: i32) -> Self {
        Self::new(msg_type, Bytes::new())
    }

    /// Build a message carrying a fixed-layout payload, tagged with its schema hash
    pub fn from_payload<T: MessagePayload>(payload: &T) -> Self {
        let mut message = Self::new(T::TYPE_ID, Bytes::copy_from_slice(payload.as_bytes()));
        message.header.version = schema_hash(T::DEFINITION);
        message
    }

    pub fn msg_type(&self) -> i32 {
        self.header.msg_type
    }

    /// Address the message to a module and host
    pub fn addressed(mut self, dest_mod_id: i16, dest_host_id: i16) -> Self {
        self.header.dest_mod_id = dest_mod_id;
        self.header.dest_host_id = dest_host_id;
        self
    }

    /// Mark the message as originating from `src_mod_id` on `src_host_id`
    pub fn from_source(mut self, src_mod_id: i16, src_host_id: i16) -> Self {
        self.header.src_mod_id = src_mod_id;
        self.header.src_host_id = src_host_id;
        self
    }

    /// Decode the payload as `T`, failing on any size disagreement
    pub fn decode_payload<T: MessagePayload>(&self) -> ProtocolResult<T> {
        T::from_payload(&self.payload).map_err(|err| ProtocolError::from_payload(self.msg_type(), err))
    }

    /// Encode header and payload into one contiguous frame
    ///
    /// A missing timecode on a timecode connection is filled with the current time.
    pub fn encode(&self, format: HeaderFormat) -> Bytes {
        let mut frame = BytesMut::with_capacity(format.size() + self.payload.len());
        encode_header(&self.header, self.timecode, format, &mut frame);
        frame.put_slice(&self.payload);
        frame.freeze()
    }
}

/// Append the header (and timecode, if the format carries one) to `buf`
pub fn encode_header(
    header: &MessageHeader,
    timecode: Option<TimeCode>,
    format: HeaderFormat,
    buf: &mut BytesMut,
) {
    buf.put_slice(header.as_bytes());
    if format.has_timecode() {
        let timecode = timecode.unwrap_or_else(TimeCode::now);
        buf.put_slice(timecode.as_bytes());
    }
}

/// Decode a header from exactly `format.size()` bytes
pub fn decode_header(
    bytes: &[u8],
    format: HeaderFormat,
) -> ProtocolResult<(MessageHeader, Option<TimeCode>)> {
    if bytes.len() != format.size() {
        return Err(ProtocolError::SizeMismatch {
            msg_type: -1,
            expected: format.size(),
            got: bytes.len(),
        });
    }
    let (head, tail) = bytes.split_at(MessageHeader::SIZE);
    let header = MessageHeader::read_from(head).ok_or(ProtocolError::SizeMismatch {
        msg_type: -1,
        expected: MessageHeader::SIZE,
        got: head.len(),
    })?;
    let timecode = if format.has_timecode() {
        TimeCode::read_from(tail)
    } else {
        None
    };
    Ok((header, timecode))
}

/// Read one whole message, stamping `recv_time` as soon as the header arrives
pub async fn read_message<R>(
    reader: &mut R,
    format: HeaderFormat,
    max_payload: usize,
) -> ProtocolResult<Message>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; MessageHeader::SIZE + TimeCode::SIZE];
    let head = &mut head[..format.size()];
    reader
        .read_exact(head)
        .await
        .map_err(ProtocolError::from_io)?;

    let (mut header, timecode) = decode_header(head, format)?;
    header.recv_time = wall_clock_seconds();

    if header.num_data_bytes < 0 {
        return Err(ProtocolError::InvalidLength {
            msg_type: header.msg_type,
            declared: header.num_data_bytes,
        });
    }
    let len = header.payload_len();
    if len > max_payload {
        return Err(ProtocolError::PayloadTooLarge {
            msg_type: header.msg_type,
            declared: len,
            limit: max_payload,
        });
    }

    let mut payload = BytesMut::zeroed(len);
    if len > 0 {
        reader
            .read_exact(&mut payload)
            .await
            .map_err(ProtocolError::from_io)?;
    }

    Ok(Message {
        header,
        timecode,
        payload: payload.freeze(),
    })
}

/// Write one encoded frame in full
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await.map_err(ProtocolError::from_io)
}

/// Overwrite `msg_count` in an encoded frame
pub fn stamp_msg_count(frame: &mut [u8], msg_count: i32) {
    if frame.len() >= MSG_COUNT_OFFSET + 4 {
        frame[MSG_COUNT_OFFSET..MSG_COUNT_OFFSET + 4].copy_from_slice(&msg_count.to_ne_bytes());
    }
}
