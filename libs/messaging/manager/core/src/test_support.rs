//! Helpers shared by the broker's unit tests

use std::net::SocketAddr;

use bytes::Bytes;
use codec::{decode_header, HeaderFormat, Message};
use tokio::sync::mpsc;
use types::{Connect, Subscribe, MT_ACKNOWLEDGE};

use crate::broker::Broker;
use crate::config::ManagerConfig;
use crate::connection::Outbound;
use crate::modules::ModuleHandle;

pub(crate) const TEST_PID: i32 = 4242;

pub(crate) fn broker(config: ManagerConfig) -> Broker {
    Broker::new(config).expect("valid test config")
}

pub(crate) fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

pub(crate) fn named_connect(requested_id: i16, unique: bool, name: &str) -> Message {
    let request = Connect::new(false, false, unique, TEST_PID, name).unwrap();
    Message::from_payload(&request).from_source(requested_id, 0)
}

pub(crate) fn connect_message(requested_id: i16, logger: bool) -> Message {
    let request = Connect::new(logger, false, true, TEST_PID, "").unwrap();
    Message::from_payload(&request).from_source(requested_id, 0)
}

pub(crate) fn subscribe_message(msg_type: i32) -> Message {
    Message::from_payload(&Subscribe { msg_type })
}

pub(crate) fn app_message(msg_type: i32, src_mod_id: i16, dest_mod_id: i16) -> Message {
    Message::new(msg_type, Bytes::from_static(b"payload"))
        .from_source(src_mod_id, 0)
        .addressed(dest_mod_id, 0)
}

/// Attach and register a module, asserting the handshake was acknowledged
pub(crate) async fn connect(
    broker: &mut Broker,
    requested_id: i16,
    logger: bool,
) -> (ModuleHandle, mpsc::Receiver<Outbound>) {
    let (handle, mut rx) = broker.attach(peer());
    broker.handle_inbound(handle, connect_message(requested_id, logger)).await;
    let received = drain(&mut rx);
    assert!(
        types_of(&received).contains(&MT_ACKNOWLEDGE),
        "CONNECT for id {} was not acknowledged",
        requested_id
    );
    (handle, rx)
}

pub(crate) async fn subscribe(
    broker: &mut Broker,
    handle: ModuleHandle,
    rx: &mut mpsc::Receiver<Outbound>,
    msg_type: i32,
) {
    broker.handle_inbound(handle, subscribe_message(msg_type)).await;
    assert!(types_of(&drain(rx)).contains(&MT_ACKNOWLEDGE));
}

pub(crate) fn decode(outbound: &Outbound) -> Message {
    let frame = outbound.frame();
    let size = HeaderFormat::Standard.size();
    let (header, timecode) = decode_header(&frame[..size], HeaderFormat::Standard).unwrap();
    Message {
        header,
        timecode,
        payload: frame.slice(size..),
    }
}

/// Everything currently queued, decoded
pub(crate) fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Ok(outbound) = rx.try_recv() {
        messages.push(decode(&outbound));
    }
    messages
}

pub(crate) fn types_of(messages: &[Message]) -> Vec<i32> {
    messages.iter().map(Message::msg_type).collect()
}

/// Stuff a module's queue until it reports full; returns how many frames fit
pub(crate) fn fill_queue(broker: &Broker, handle: ModuleHandle) -> usize {
    let module = broker.module(handle).expect("module exists");
    let filler = Outbound::Forward(Message::signal(MT_ACKNOWLEDGE).encode(HeaderFormat::Standard));
    let mut queued = 0;
    while module.outbound.try_send(filler.clone()).is_ok() {
        queued += 1;
    }
    queued
}
