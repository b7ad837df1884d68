use crate::core::DaemonEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use zigomar_proto::model::{format_duration, format_played_at, Fallback};
use zigomar_proto::protocol::{Command, DaemonState, PlayerPhase};
use zigomar_proto::state::StateManager;

#[derive(Clone)]
pub struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    fallback: Arc<Fallback>,
}

impl HttpState {
    pub fn new(
        state_manager: Arc<StateManager>,
        event_tx: mpsc::Sender<DaemonEvent>,
        fallback: Fallback,
    ) -> Self {
        Self {
            state_manager,
            event_tx,
            fallback: Arc::new(fallback),
        }
    }
}

/// What a shell needs to render, with every fallback already applied.
#[derive(Serialize)]
struct ApiState {
    rev: u64,
    title: String,
    artist: String,
    album: Option<String>,
    artwork: String,
    station: String,
    description: String,
    listeners: Option<String>,
    bitrate: Option<u32>,
    genre: Option<String>,
    playlist: Vec<ApiPlaylistEntry>,
    notice: Option<String>,
    last_update: Option<String>,
    metadata_loading: bool,
    refreshing: bool,
    playing: bool,
    loading: bool,
    volume: u8,
    muted: bool,
    icon_muted: bool,
    connection: &'static str,
    error: Option<String>,
    favorite: bool,
}

#[derive(Serialize)]
struct ApiPlaylistEntry {
    title: String,
    artist: String,
    album: Option<String>,
    artwork: Option<String>,
    played_at: String,
    duration: Option<String>,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
    muted: bool,
}

impl ApiState {
    fn from_state(state: DaemonState, fallback: &Fallback) -> Self {
        let np = &state.now_playing;
        let player = &state.player;
        Self {
            rev: state.rev,
            title: np.display_title(fallback).to_string(),
            artist: np.display_artist(fallback).to_string(),
            album: np.track.album.clone().or_else(|| fallback.track.album.clone()),
            artwork: np.display_artwork(fallback).to_string(),
            station: np.station.name.clone(),
            description: np.station.description.clone(),
            listeners: np.listeners_label(),
            bitrate: np.station.bitrate,
            genre: np.station.genre.clone(),
            playlist: np
                .playlist
                .iter()
                .map(|e| ApiPlaylistEntry {
                    title: e.title.clone(),
                    artist: e.artist.clone(),
                    album: e.album.clone(),
                    artwork: e.artwork.clone(),
                    played_at: format_played_at(&e.played_at),
                    duration: e.duration.map(format_duration),
                })
                .collect(),
            notice: np.notice.clone(),
            last_update: np.last_update.map(|t| t.format("%H:%M:%S").to_string()),
            metadata_loading: np.loading,
            refreshing: np.refreshing,
            playing: player.phase == PlayerPhase::Playing,
            loading: player.loading,
            volume: player.volume,
            muted: player.muted,
            icon_muted: player.icon_muted,
            connection: player.connection.label(),
            error: player.error.clone(),
            favorite: state.favorite,
        }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/pause", get(pause).post(pause))
        .route("/api/volume/:volume", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/mute", get(toggle_mute).post(toggle_mute))
        .route("/api/favorite", get(toggle_favorite).post(toggle_favorite))
        .route("/api/refresh", get(refresh).post(refresh))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(bind_address: String, port: u16, state: HttpState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    let name = format!("{:?}", cmd);
    if state.event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
        error!("Failed to send {} command", name);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    let daemon_state = state.state_manager.get_state().await;
    Json(ApiState::from_state(daemon_state, &state.fallback))
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    if state.state_manager.get_state().await.player.loading {
        info!("HTTP API: toggle refused, stream still loading");
        return StatusCode::CONFLICT;
    }
    info!("HTTP API: Toggle play");
    send(&state, Command::TogglePlay).await
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Pause");
    send(&state, Command::Pause).await
}

async fn set_volume(State(state): State<HttpState>, Path(volume): Path<i32>) -> StatusCode {
    let value = volume.clamp(0, 100) as u8;
    info!("HTTP API: Set volume to {}%", value);
    send(&state, Command::SetVolume { value }).await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let player = state.state_manager.get_state().await.player;
    Json(VolumeStatus {
        volume: player.volume,
        muted: player.muted,
    })
}

async fn toggle_mute(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle mute");
    send(&state, Command::ToggleMute).await
}

async fn toggle_favorite(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle favorite");
    send(&state, Command::ToggleFavorite).await
}

async fn refresh(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Refresh");
    send(&state, Command::Refresh).await
}
