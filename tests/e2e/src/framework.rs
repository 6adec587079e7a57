//! Core E2E testing framework

use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use anyhow::{Context, Result};
use manager_core::{Broker, ManagerConfig};
use module_client::{Client, ClientConfig, ConnectOptions};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

static LOGGING: Once = Once::new();

/// Honour RUST_LOG when debugging a scenario; silent otherwise
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Broker config for scenarios: loopback, no periodic broadcasts
pub fn test_config() -> ManagerConfig {
    let mut config = ManagerConfig::default();
    config.transport.address = "127.0.0.1".to_string();
    config.transport.port = 0;
    config.diagnostics.timing_enabled = false;
    config.diagnostics.traffic_interval_ms = 3_600_000;
    config.diagnostics.directory_interval_ms = 3_600_000;
    config.diagnostics.poll_interval_ms = 20;
    config
}

/// A broker running in the background on an ephemeral port
pub struct TestBroker {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<manager_core::Result<()>>,
}

impl TestBroker {
    pub async fn start() -> Result<Self> {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: ManagerConfig) -> Result<Self> {
        init_test_logging();
        let listener = TcpListener::bind(config.bind_addr())
            .await
            .context("binding test listener")?;
        let addr = listener.local_addr()?;
        let broker = Broker::new(config)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(broker.run(listener, async move {
            let _ = shutdown_rx.await;
        }));
        info!("Test broker listening on {}", addr);

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            handle,
        })
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Connect a client with the given static id (0 for dynamic)
    pub async fn client(&self, module_id: i16, options: ConnectOptions) -> Result<Client> {
        let config = ClientConfig {
            module_id,
            ..ClientConfig::default()
        };
        self.client_with(config, options).await
    }

    pub async fn client_with(&self, config: ClientConfig, options: ConnectOptions) -> Result<Client> {
        let mut client = Client::new(config)?;
        client.connect(&self.addr(), options).await?;
        Ok(client)
    }

    /// Stop the broker and wait for its loop to exit
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), &mut self.handle)
            .await
            .context("broker did not stop")???;
        Ok(())
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
