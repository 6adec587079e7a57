//! Publish/subscribe routing over real sockets

use std::time::Duration;

use bytes::Bytes;
use e2e_tests::fixtures::{expect_message, schemas, Command, Sample, MT_COMMAND, MT_SAMPLE, MT_TICK};
use e2e_tests::{test_config, TestBroker};
use module_client::{ClientConfig, ClientError, ConnectOptions};
use types::{ALL_MESSAGE_TYPES, MID_MESSAGE_MANAGER};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_broadcast_reaches_subscriber() {
    let broker = TestBroker::start().await.unwrap();
    let mut subscriber = broker.client(0, ConnectOptions::default()).await.unwrap();
    let mut publisher = broker.client(0, ConnectOptions::default()).await.unwrap();
    subscriber.subscribe(&[MT_SAMPLE]).await.unwrap();

    publisher.send_message(&Sample { x: 1.5, y: -2.0 }, 0, 0).await.unwrap();

    let message = subscriber.read_message(Some(WAIT)).await.unwrap().unwrap();
    let sample: Sample = message.decode_payload().unwrap();
    assert_eq!(sample, Sample { x: 1.5, y: -2.0 });
    assert_eq!(message.header.src_mod_id, publisher.module_id());
    assert!(message.header.recv_time >= message.header.send_time);

    // Publisher is not subscribed, so it sees nothing
    assert!(publisher.read_message(Some(QUIET)).await.unwrap().is_none());

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_directed_message_reaches_only_destination() {
    let broker = TestBroker::start().await.unwrap();
    let mut a = broker.client(12, ConnectOptions::default()).await.unwrap();
    let mut c = broker.client(13, ConnectOptions::default()).await.unwrap();
    let mut sender = broker.client(0, ConnectOptions::default()).await.unwrap();
    a.subscribe(&[MT_COMMAND]).await.unwrap();
    c.subscribe(&[MT_COMMAND]).await.unwrap();

    sender.send_message(&Command { seq: 1, code: 7 }, 13, 0).await.unwrap();

    let received = c.read_message(Some(WAIT)).await.unwrap().unwrap();
    assert_eq!(received.header.dest_mod_id, 13);
    assert!(a.read_message(Some(QUIET)).await.unwrap().is_none());

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_logger_sees_unsubscribed_traffic() {
    let broker = TestBroker::start().await.unwrap();
    let mut logger = broker.client(0, ConnectOptions::logger()).await.unwrap();
    let mut sender = broker.client(0, ConnectOptions::default()).await.unwrap();

    sender.send_signal(MT_TICK, 0, 0).await.unwrap();

    let tick = expect_message(&mut logger, MT_TICK, WAIT).await.unwrap().unwrap();
    assert_eq!(tick.header.src_mod_id, sender.module_id());
    assert!(tick.payload.is_empty());

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_per_source_order_is_preserved() {
    const COUNT: u32 = 500;
    let broker = TestBroker::start().await.unwrap();
    let mut subscriber = broker.client(0, ConnectOptions::default()).await.unwrap();
    subscriber.subscribe(&[MT_COMMAND]).await.unwrap();
    let mut sender = broker.client(0, ConnectOptions::default()).await.unwrap();
    let mut noise = broker.client(0, ConnectOptions::default()).await.unwrap();

    let noisy = tokio::spawn(async move {
        for _ in 0..COUNT {
            noise.send_signal(MT_TICK, 0, 0).await.unwrap();
        }
        noise
    });
    for seq in 0..COUNT {
        sender.send_message(&Command { seq, code: 0 }, 0, 0).await.unwrap();
    }
    let _noise = noisy.await.unwrap();

    for expected in 0..COUNT {
        let message = subscriber.read_message(Some(WAIT)).await.unwrap().unwrap();
        let command: Command = message.decode_payload().unwrap();
        assert_eq!(command.seq, expected);
    }

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe_pause_and_resume() {
    let broker = TestBroker::start().await.unwrap();
    let mut subscriber = broker.client(0, ConnectOptions::default()).await.unwrap();
    let mut sender = broker.client(0, ConnectOptions::default()).await.unwrap();

    subscriber.subscribe(&[MT_TICK, MT_COMMAND]).await.unwrap();
    subscriber.pause_subscription(&[MT_TICK]).await.unwrap();
    assert!(subscriber.paused_types().contains(&MT_TICK));
    assert!(!subscriber.subscribed_types().contains(&MT_TICK));

    sender.send_signal(MT_TICK, 0, 0).await.unwrap();
    assert!(subscriber.read_message(Some(QUIET)).await.unwrap().is_none());

    subscriber.resume_subscription(&[MT_TICK]).await.unwrap();
    sender.send_signal(MT_TICK, 0, 0).await.unwrap();
    let tick = subscriber.read_message(Some(WAIT)).await.unwrap().unwrap();
    assert_eq!(tick.msg_type(), MT_TICK);

    // Unsubscribing twice is harmless and still acknowledged
    subscriber.unsubscribe(&[MT_TICK]).await.unwrap();
    subscriber.unsubscribe(&[MT_TICK]).await.unwrap();
    sender.send_signal(MT_TICK, 0, 0).await.unwrap();
    assert!(subscriber.read_message(Some(QUIET)).await.unwrap().is_none());

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_wildcard_subscription_receives_every_type() {
    let broker = TestBroker::start().await.unwrap();
    let mut watcher = broker.client(0, ConnectOptions::default()).await.unwrap();
    let mut sender = broker.client(0, ConnectOptions::default()).await.unwrap();
    watcher.subscribe(&[ALL_MESSAGE_TYPES]).await.unwrap();

    sender.send_signal(MT_TICK, 0, 0).await.unwrap();
    sender.send_message(&Command { seq: 9, code: 1 }, 0, 0).await.unwrap();

    assert_eq!(watcher.read_message(Some(WAIT)).await.unwrap().unwrap().msg_type(), MT_TICK);
    assert_eq!(watcher.read_message(Some(WAIT)).await.unwrap().unwrap().msg_type(), MT_COMMAND);

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_sync_check_flags_mismatched_definitions() {
    let broker = TestBroker::start().await.unwrap();
    let config = ClientConfig {
        sync_check: true,
        schemas: schemas(),
        ..ClientConfig::default()
    };
    let mut receiver = broker.client_with(config, ConnectOptions::default()).await.unwrap();
    let mut sender = broker.client(0, ConnectOptions::default()).await.unwrap();
    receiver.subscribe(&[MT_SAMPLE]).await.unwrap();

    // Wrong size for SAMPLE
    sender.send_raw(MT_SAMPLE, Bytes::from_static(&[0u8; 8]), 0, 0).await.unwrap();
    let err = receiver.read_message(Some(WAIT)).await.unwrap_err();
    assert!(matches!(err, ClientError::Desync(_)), "{err}");

    // Right size without a schema hash is accepted as a legacy peer
    sender.send_raw(MT_SAMPLE, Bytes::from_static(&[0u8; 16]), 0, 0).await.unwrap();
    let legacy = receiver.read_message(Some(WAIT)).await.unwrap().unwrap();
    assert_eq!(legacy.header.version, 0);

    sender.send_message(&Sample { x: 3.0, y: 4.0 }, 0, 0).await.unwrap();
    assert!(receiver.read_message(Some(WAIT)).await.unwrap().is_some());
    assert!(receiver.is_connected());

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_destinations_rejected_client_side() {
    let broker = TestBroker::start().await.unwrap();
    let mut client = broker.client(0, ConnectOptions::default()).await.unwrap();

    let err = client.send_signal(MT_TICK, 201, 0).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidDestinationModule(201)));
    let err = client.send_signal(MT_TICK, 0, 6).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidDestinationHost(6)));

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_broker_frames_carry_per_connection_sequence() {
    let broker = TestBroker::start().await.unwrap();
    let mut logger = broker.client(0, ConnectOptions::logger()).await.unwrap();
    let mut sender = broker.client(0, ConnectOptions::default()).await.unwrap();
    sender.send_signal(MT_TICK, 0, 0).await.unwrap();

    let mut broker_counts = Vec::new();
    loop {
        let message = logger.read_message(Some(WAIT)).await.unwrap().unwrap();
        if message.msg_type() == MT_TICK {
            // Forwarded frames keep the sender's count: CONNECT was 0
            assert_eq!(message.header.msg_count, 1);
            break;
        }
        assert_eq!(message.header.src_mod_id, MID_MESSAGE_MANAGER);
        broker_counts.push(message.header.msg_count);
    }

    // The logger's own ACK (1) was consumed during connect
    let expected: Vec<i32> = (2..2 + broker_counts.len() as i32).collect();
    assert_eq!(broker_counts, expected);

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_timecode_header_variant() {
    let mut config = test_config();
    config.transport.timecode = true;
    let broker = TestBroker::start_with(config).await.unwrap();

    let timecode = ClientConfig {
        timecode: true,
        ..ClientConfig::default()
    };
    let mut subscriber = broker
        .client_with(timecode.clone(), ConnectOptions::default())
        .await
        .unwrap();
    let mut publisher = broker.client_with(timecode, ConnectOptions::default()).await.unwrap();
    subscriber.subscribe(&[MT_SAMPLE]).await.unwrap();

    publisher.send_message(&Sample { x: 0.0, y: 1.0 }, 0, 0).await.unwrap();
    let message = subscriber.read_message(Some(WAIT)).await.unwrap().unwrap();
    assert!(message.timecode.is_some());
    assert_eq!(message.decode_payload::<Sample>().unwrap(), Sample { x: 0.0, y: 1.0 });

    broker.stop().await.unwrap();
}
