//! Registration, identity and removal over real sockets

use std::time::Duration;

use bytes::Bytes;
use codec::{HeaderFormat, Message};
use e2e_tests::fixtures::{expect_message, MT_BULK};
use e2e_tests::{test_config, TestBroker};
use module_client::{ClientError, ConnectOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use types::{decode_text, ClientClosed, ClientInfo, Connect, MT_CLIENT_CLOSED, MT_CLIENT_INFO};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_dynamic_and_static_ids() {
    let broker = TestBroker::start().await.unwrap();

    let first = broker.client(0, ConnectOptions::default()).await.unwrap();
    let second = broker.client(0, ConnectOptions::default()).await.unwrap();
    let fixed = broker.client(42, ConnectOptions::default()).await.unwrap();

    assert_eq!(first.module_id(), 100);
    assert_eq!(second.module_id(), 101);
    assert_eq!(fixed.module_id(), 42);
    assert!(fixed.is_connected());

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_unique_id_is_refused() {
    let broker = TestBroker::start().await.unwrap();
    let _holder = broker.client(12, ConnectOptions::default()).await.unwrap();

    let err = broker.client(12, ConnectOptions::default()).await.unwrap_err();
    let err = err.downcast::<ClientError>().unwrap();
    assert!(matches!(err, ClientError::ConnectionLost(_)), "{err}");

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_unique_name_is_refused() {
    let broker = TestBroker::start().await.unwrap();
    let _holder = broker.client(0, ConnectOptions::named("joystick")).await.unwrap();
    assert!(broker.client(0, ConnectOptions::named("joystick")).await.is_err());

    let shared = ConnectOptions {
        unique: false,
        ..ConnectOptions::named("viewer")
    };
    let _a = broker.client(0, shared.clone()).await.unwrap();
    let _b = broker.client(0, shared).await.unwrap();

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_connect_announces_module_to_loggers() {
    let broker = TestBroker::start().await.unwrap();
    let mut logger = broker.client(0, ConnectOptions::logger()).await.unwrap();

    let module = broker.client(0, ConnectOptions::named("arm_controller")).await.unwrap();

    let mut announced = None;
    while let Some(message) = expect_message(&mut logger, MT_CLIENT_INFO, WAIT).await.unwrap() {
        let info: ClientInfo = message.decode_payload().unwrap();
        if info.mod_id == module.module_id() {
            announced = Some(info);
            break;
        }
    }
    let info = announced.expect("CLIENT_INFO for the new module");
    assert_eq!(decode_text(&info.name), "arm_controller");
    assert_eq!(info.is_logger, 0);
    assert_eq!(info.is_unique, 1);
    assert_eq!(decode_text(&info.addr), "127.0.0.1");

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_and_abrupt_close_both_notify() {
    let broker = TestBroker::start().await.unwrap();
    let mut logger = broker.client(0, ConnectOptions::logger()).await.unwrap();

    let mut polite = broker.client(20, ConnectOptions::default()).await.unwrap();
    polite.disconnect().await.unwrap();
    assert!(!polite.is_connected());

    let closed = expect_message(&mut logger, MT_CLIENT_CLOSED, WAIT).await.unwrap().unwrap();
    let closed: ClientClosed = closed.decode_payload().unwrap();
    assert_eq!(closed.mod_id, 20);

    let abrupt = broker.client(21, ConnectOptions::default()).await.unwrap();
    drop(abrupt);

    let closed = expect_message(&mut logger, MT_CLIENT_CLOSED, WAIT).await.unwrap().unwrap();
    let closed: ClientClosed = closed.decode_payload().unwrap();
    assert_eq!(closed.mod_id, 21);

    // The id is free again once the holder is gone
    let again = broker.client(21, ConnectOptions::default()).await.unwrap();
    assert_eq!(again.module_id(), 21);

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_set_name_reannounces_module() {
    let broker = TestBroker::start().await.unwrap();
    let mut logger = broker.client(0, ConnectOptions::logger()).await.unwrap();
    let mut module = broker.client(30, ConnectOptions::default()).await.unwrap();

    module.set_name("renamed").await.unwrap();

    let mut renamed = false;
    while let Some(message) = expect_message(&mut logger, MT_CLIENT_INFO, WAIT).await.unwrap() {
        let info: ClientInfo = message.decode_payload().unwrap();
        if info.mod_id == 30 && decode_text(&info.name) == "renamed" {
            renamed = true;
            break;
        }
    }
    assert!(renamed);

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let broker = TestBroker::start().await.unwrap();
    let mut client = broker.client(0, ConnectOptions::default()).await.unwrap();

    broker.stop().await.unwrap();

    let err = client.read_message(Some(WAIT)).await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionLost(_)));
    assert!(!client.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_logger_socket_is_closed_on_removal() {
    let mut config = test_config();
    config.delivery.logger_write_timeout_ms = Some(50);
    config.delivery.outbound_queue_depth = 1;
    let broker = TestBroker::start_with(config).await.unwrap();

    let mut monitor = broker.client(0, ConnectOptions::default()).await.unwrap();
    monitor.subscribe(&[MT_CLIENT_CLOSED]).await.unwrap();

    // Registers as logger 60 and never reads
    let mut stalled = TcpStream::connect(broker.addr()).await.unwrap();
    let request = Connect::new(true, false, true, 0, "stalled").unwrap();
    let frame = Message::from_payload(&request)
        .from_source(60, 0)
        .encode(HeaderFormat::Standard);
    stalled.write_all(&frame).await.unwrap();

    let mut sender = broker.client(0, ConnectOptions::default()).await.unwrap();
    let watch = tokio::spawn(async move {
        let closed = expect_message(&mut monitor, MT_CLIENT_CLOSED, Duration::from_secs(20))
            .await
            .unwrap();
        (monitor, closed)
    });
    let bulk = Bytes::from(vec![0u8; 8000]);
    for _ in 0..20_000 {
        sender.send_raw(MT_BULK, bulk.clone(), 0, 0).await.unwrap();
        if watch.is_finished() {
            break;
        }
    }

    let (_monitor, closed) = watch.await.unwrap();
    let closed: ClientClosed = closed.expect("CLIENT_CLOSED").decode_payload().unwrap();
    assert_eq!(closed.mod_id, 60);

    // Whatever the kernel still holds drains, then the broker's side is gone
    let mut buf = vec![0u8; 64 * 1024];
    let eof = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stalled.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(eof.is_ok(), "broker kept the removed logger's socket open");

    broker.stop().await.unwrap();
}
