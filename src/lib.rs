pub mod api;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod qr;
pub mod relay;
pub mod uploads;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use wagw_whatsapp::{GatewayAdapter, MessagingAdapter, SessionState, SessionWatcher};

use api::ApiService;
use config::AppConfig;
use dispatch::{Dispatcher, PingAction};
use relay::WebhookRelay;

/// Capacity of the session event channel.
const EVENT_BUFFER: usize = 256;

/// Wire everything together and serve until Ctrl-C.
pub async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = AppConfig::load()?;
    logging::init(&config.logging)?;

    info!(
        gateway = %config.gateway.base_url,
        instance = %config.gateway.instance_name,
        relay_chat = %config.relay.chat_id,
        "Starting wa-gateway"
    );

    let adapter: Arc<dyn MessagingAdapter> = Arc::new(GatewayAdapter::new(&config.gateway)?);
    let session = Arc::new(SessionState::new());
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.gateway.timeout_sec))
        .build()?;

    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ping = config.ping.enabled.then(|| PingAction {
        chat_id: config.ping_chat_id().to_string(),
        poll: config.ping.poll(),
    });
    let dispatcher = Dispatcher::new(
        session.clone(),
        adapter.clone(),
        WebhookRelay::new(&config.relay, http.clone()),
        ping,
    );
    let dispatcher_task = tokio::spawn(dispatcher.run(event_rx));

    let watcher = SessionWatcher::new(
        adapter.clone(),
        Duration::from_secs(config.gateway.poll_interval_secs),
    );
    let watcher_task = tokio::spawn(watcher.run(event_tx.clone(), shutdown_rx));

    let addr = config.server.socket_addr()?;
    let api = Arc::new(ApiService::new(session, adapter, event_tx, http, &config));
    let served = api.start_server(addr, shutdown_signal()).await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = watcher_task.await {
        error!("Session watcher task failed: {}", e);
    }
    if let Err(e) = dispatcher_task.await {
        error!("Dispatcher task failed: {}", e);
    }

    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
