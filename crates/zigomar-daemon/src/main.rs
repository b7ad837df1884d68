mod aggregator;
mod core;
mod hls;
mod http;
mod mpv;
mod playback;
mod proxy;
mod socket;
mod sources;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zigomar_proto::candidates::StreamCandidate;
use zigomar_proto::config::Config;
use zigomar_proto::model::Fallback;
use zigomar_proto::platform;
use zigomar_proto::state::{FavoriteStore, StateManager};

use crate::aggregator::{Aggregator, Poller};
use crate::playback::{AdaptiveStreaming, PlaybackController, PlaybackSettings};
use crate::sources::SourceEndpoints;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    Log(String),
    /// A command the daemon could not carry out.
    Error(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        // Only WARN and ERROR reach socket clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so logging can feed it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("zigomar.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,zigomar=debug,hyper_util=warn,reqwest=warn")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let http_client = sources::build_client()?;
    let fallback = Fallback::from_station(&config.station);

    // Relative endpoints point at the proxy, so it is listening before the
    // first poll
    if config.proxy.enabled {
        let proxy_state = proxy::ProxyState::new(http_client.clone(), &config.proxy)?;
        match proxy::bind(&config.http.bind_address, config.proxy.port).await {
            Ok(listener) => {
                let _proxy_handle = proxy::start_server(listener, proxy_state);
            }
            Err(e) => warn!("{}", e),
        }
    }

    // ── playback ──────────────────────────────────────────────────────────────
    let (element_tx, element_rx) = mpsc::channel(256);
    let element = Arc::new(mpv::MpvElement::new(element_tx.clone()));
    let adaptive: Option<Arc<dyn AdaptiveStreaming>> = if config.playback.adaptive_enabled {
        Some(Arc::new(hls::HlsClient::new(http_client.clone(), element_tx.clone())))
    } else {
        None
    };
    let candidates: Vec<StreamCandidate> = config
        .playback
        .stream_urls
        .iter()
        .map(|u| StreamCandidate::from_url(config.resolve_url(u)))
        .collect();
    if candidates.is_empty() {
        warn!("No stream URLs configured; playback will always fail");
    }
    let controller = PlaybackController::new(
        element,
        adaptive,
        candidates,
        PlaybackSettings {
            volume: config.playback.default_volume,
            attempt_timeout: Duration::from_secs(config.playback.attempt_timeout_secs),
        },
        element_tx,
    )
    .await;

    // ── shared state + metadata ───────────────────────────────────────────────
    let favorites = FavoriteStore::new(
        config.daemon.storage_file.clone(),
        config.daemon.favorite_key.clone(),
    );
    let state_manager = Arc::new(StateManager::new(&fallback, controller.view(), favorites).await);

    let aggregator = Arc::new(Aggregator::new(
        http_client,
        SourceEndpoints::from_config(&config),
        config.station.mount_id.clone(),
        fallback.clone(),
        state_manager.clone(),
        broadcast_tx.clone(),
    ));
    let poller = Poller::start(
        aggregator,
        Duration::from_secs(config.sources.poll_interval_secs.max(1)),
    );

    // All external inputs funnel into DaemonCore
    let (event_tx, event_rx) = mpsc::channel::<core::DaemonEvent>(256);
    let daemon_core = core::DaemonCore::new(
        state_manager.clone(),
        controller,
        poller,
        element_rx,
        broadcast_tx.clone(),
    );

    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        platform::DAEMON_TCP_PORT,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpState::new(state_manager.clone(), event_tx.clone(), fallback),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            let _ = shutdown_tx.send(core::DaemonEvent::Shutdown).await;
        }
    });

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    Ok(())
}
