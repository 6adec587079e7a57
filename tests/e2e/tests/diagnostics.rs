//! Periodic broker broadcasts and failure notices over real sockets

use std::time::Duration;

use bytes::Bytes;
use e2e_tests::fixtures::{expect_message, Command, MT_BULK, MT_COMMAND, MT_TICK};
use e2e_tests::{test_config, TestBroker};
use module_client::ConnectOptions;
use types::{
    ActiveClients, FailedMessage, MessageTraffic, TimingMessage, MT_ACTIVE_CLIENTS,
    MT_FAILED_MESSAGE, MT_MESSAGE_TRAFFIC, MT_TIMING_MESSAGE,
};

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_timing_and_directory_broadcasts() {
    let mut config = test_config();
    config.diagnostics.timing_enabled = true;
    config.diagnostics.timing_interval_ms = 100;
    config.diagnostics.directory_interval_ms = 150;
    let broker = TestBroker::start_with(config).await.unwrap();

    let mut monitor = broker.client(0, ConnectOptions::default()).await.unwrap();
    monitor.subscribe(&[MT_TIMING_MESSAGE, MT_ACTIVE_CLIENTS]).await.unwrap();
    let mut sender = broker.client(25, ConnectOptions::default()).await.unwrap();
    sender.send_module_ready().await.unwrap();
    for _ in 0..5 {
        sender.send_signal(MT_TICK, 0, 0).await.unwrap();
    }

    // Counters reset per report, so sum the ticks across reports
    let mut ticks = 0u32;
    let mut listed_both = false;
    let deadline = tokio::time::Instant::now() + WAIT;
    while (ticks < 5 || !listed_both) && tokio::time::Instant::now() < deadline {
        let Some(message) = monitor.read_message(Some(WAIT)).await.unwrap() else {
            break;
        };
        match message.msg_type() {
            MT_TIMING_MESSAGE => {
                let timing: TimingMessage = message.decode_payload().unwrap();
                let count = timing.timing[MT_TICK as usize];
                if count > 0 {
                    assert_eq!(timing.module_pid[25], std::process::id() as i32);
                }
                ticks += u32::from(count);
            }
            MT_ACTIVE_CLIENTS => {
                let directory: ActiveClients = message.decode_payload().unwrap();
                let listed = &directory.client_mod_id[..directory.num_clients as usize];
                listed_both |= listed.contains(&25) && listed.contains(&monitor.module_id());
            }
            other => panic!("unexpected message type {other}"),
        }
    }
    assert!(listed_both);
    assert_eq!(ticks, 5);

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_traffic_report() {
    let mut config = test_config();
    config.diagnostics.traffic_interval_ms = 200;
    let broker = TestBroker::start_with(config).await.unwrap();

    let mut monitor = broker.client(0, ConnectOptions::default()).await.unwrap();
    monitor.subscribe(&[MT_MESSAGE_TRAFFIC]).await.unwrap();
    let mut sender = broker.client(0, ConnectOptions::default()).await.unwrap();
    for seq in 0..3 {
        sender.send_message(&Command { seq, code: 0 }, 0, 0).await.unwrap();
    }

    let mut commands = 0;
    let deadline = tokio::time::Instant::now() + WAIT;
    while commands < 3 && tokio::time::Instant::now() < deadline {
        if let Some(message) = expect_message(&mut monitor, MT_MESSAGE_TRAFFIC, WAIT).await.unwrap() {
            let report: MessageTraffic = message.decode_payload().unwrap();
            let listed = report.num_msg_types as usize;
            for slot in 0..listed {
                if report.msg_type[slot] == MT_COMMAND as u32 {
                    commands += report.msg_count[slot];
                }
            }
        }
    }
    assert_eq!(commands, 3);

    broker.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_subscriber_gets_failure_notices() {
    let mut config = test_config();
    config.delivery.outbound_queue_depth = 4;
    let broker = TestBroker::start_with(config).await.unwrap();

    let mut watchdog = broker.client(0, ConnectOptions::default()).await.unwrap();
    watchdog.subscribe(&[MT_FAILED_MESSAGE]).await.unwrap();

    // Subscribes, then never reads; its socket buffers fill and then its queue
    let mut stalled = broker.client(50, ConnectOptions::default()).await.unwrap();
    stalled.subscribe(&[MT_BULK]).await.unwrap();

    let mut sender = broker.client(0, ConnectOptions::default()).await.unwrap();
    let watch = tokio::spawn(async move {
        let notice = expect_message(&mut watchdog, MT_FAILED_MESSAGE, Duration::from_secs(20))
            .await
            .unwrap();
        (watchdog, notice)
    });
    // Large frames fill the stalled client's socket and read-ahead buffer quickly
    let bulk = Bytes::from(vec![0u8; 8000]);
    for _ in 0..20_000 {
        sender.send_raw(MT_BULK, bulk.clone(), 0, 0).await.unwrap();
        if watch.is_finished() {
            break;
        }
    }

    let (_watchdog, notice) = watch.await.unwrap();
    let notice: FailedMessage = notice.expect("FAILED_MESSAGE").decode_payload().unwrap();
    assert_eq!(notice.dest_mod_id, 50);
    assert_eq!(notice.msg_header.msg_type, MT_BULK);
    assert_eq!(notice.msg_header.num_data_bytes, 8000);
    assert!(stalled.is_connected());

    broker.stop().await.unwrap();
}
