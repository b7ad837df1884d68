/// DaemonCore: single-owner event loop for playback and favorites.
///
/// Every task that wants to change something sends a `DaemonEvent`
/// (sockets, HTTP API, ctrl-c) or an `ElementEvent` (mpv, the HLS watchdog,
/// attempt deadlines).  DaemonCore owns the `PlaybackController` and the
/// metadata `Poller` exclusively; no other task touches them.
///
/// After each event that changes the player snapshot, DaemonCore publishes it
/// into the `StateManager` and broadcasts `BroadcastMessage::StateUpdated`.
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use zigomar_proto::protocol::Command;
use zigomar_proto::state::StateManager;

use crate::aggregator::Poller;
use crate::playback::{ElementEvent, PlaybackController};
use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All external inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// Shutdown requested.
    Shutdown,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    state_manager: Arc<StateManager>,
    controller: PlaybackController,
    poller: Poller,
    /// Element, adaptive-session and deadline events for the controller.
    element_rx: mpsc::Receiver<ElementEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl DaemonCore {
    pub fn new(
        state_manager: Arc<StateManager>,
        controller: PlaybackController,
        poller: Poller,
        element_rx: mpsc::Receiver<ElementEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            state_manager,
            controller,
            poller,
            element_rx,
            broadcast_tx,
        }
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or the event channel is closed.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");
        self.publish_player().await;

        loop {
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("DaemonCore: event channel closed, shutting down");
                        break;
                    }
                    Some(DaemonEvent::Shutdown) => {
                        info!("DaemonCore: shutdown requested");
                        break;
                    }
                    Some(DaemonEvent::ClientCommand(cmd)) => {
                        info!("DaemonCore: command {:?}", cmd);
                        self.handle_command(cmd).await;
                    }
                },
                Some(event) = self.element_rx.recv() => {
                    if self.controller.handle_element_event(event).await {
                        self.publish_player().await;
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::TogglePlay => {
                if !self.controller.toggle_play().await {
                    info!("DaemonCore: play refused while loading");
                }
            }
            Command::Pause => self.controller.pause().await,
            Command::SetVolume { value } => self.controller.set_volume(value).await,
            Command::ToggleMute => self.controller.toggle_mute().await,
            Command::ToggleFavorite => match self.state_manager.toggle_favorite().await {
                Ok(favorite) => {
                    info!("DaemonCore: favorite is now {}", favorite);
                    self.notify();
                }
                Err(e) => {
                    warn!("DaemonCore: favorite not saved: {}", e);
                    let _ = self
                        .broadcast_tx
                        .send(BroadcastMessage::Error(format!("Favori non enregistré: {}", e)));
                }
            },
            Command::Refresh => {
                // Detached; the aggregator publishes its own result.
                drop(self.poller.refresh_now());
            }
            Command::GetState => {
                // Senders receive the snapshot after every command
            }
        }
        self.publish_player().await;
    }

    async fn publish_player(&self) {
        if self.state_manager.set_player(self.controller.view()).await {
            debug!(
                "DaemonCore: player {:?} after {} attempt(s)",
                self.controller.phase(),
                self.controller.last_report().attempts.len()
            );
            self.notify();
        }
    }

    fn notify(&self) {
        // No receivers is fine
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    /// Stop metadata polling, then tear playback down.
    async fn cleanup(self) {
        info!("DaemonCore: cleanup");
        self.poller.shutdown().await;
        self.controller.shutdown().await;
    }
}
