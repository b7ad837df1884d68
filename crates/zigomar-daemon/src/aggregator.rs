/// Now-playing aggregator.
///
/// A cycle fans out to the four metadata sources at once, waits for every one
/// of them to settle, then hands the settled results to the pure reducer.
/// Source failures stay inside the cycle: they are logged and only matter when
/// all four fail, in which case the reducer falls back to the station defaults
/// and raises the notice.
///
/// Cycles are driven by a [`Poller`] (one immediate cycle, then every
/// `poll_interval_secs`) and by manual refreshes.  Manual refreshes are not
/// serialized against the poller, so two cycles can overlap and the one that
/// finishes last wins.  Every cycle holds a token derived from the poller's;
/// once the poller is shut down no cycle writes shared state again.
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zigomar_proto::merge::CycleResults;
use zigomar_proto::model::{Fallback, NowPlaying};
use zigomar_proto::state::StateManager;

use crate::sources::{icecast, icy_probe, instant_audio, zeno, SourceEndpoints};
use crate::BroadcastMessage;

pub struct Aggregator {
    http: Client,
    endpoints: SourceEndpoints,
    mount_id: String,
    fallback: Fallback,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl Aggregator {
    pub fn new(
        http: Client,
        endpoints: SourceEndpoints,
        mount_id: String,
        fallback: Fallback,
        state_manager: Arc<StateManager>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            http,
            endpoints,
            mount_id,
            fallback,
            state_manager,
            broadcast_tx,
        }
    }

    /// Run all four sources concurrently and wait for every one to settle.
    pub async fn collect(&self) -> CycleResults {
        let e = &self.endpoints;
        let (primary, secondary_text, secondary_status, stream_tags) = tokio::join!(
            instant_audio::fetch_primary(&self.http, &e.primary),
            zeno::fetch_secondary_text(&self.http, &e.text, &self.fallback),
            icecast::fetch_secondary_status(&self.http, &e.status, &self.mount_id, &self.fallback),
            icy_probe::probe_stream_tags(&self.http, &e.probe, e.probe_timeout, &self.fallback),
        );
        CycleResults {
            primary,
            secondary_text,
            secondary_status,
            stream_tags,
        }
    }

    /// One full cycle.  Returns the merged model, or `None` when the token was
    /// cancelled before the write.  A manual cycle raises `refreshing` and
    /// always lowers it again, cancelled or not.
    pub async fn refresh_all(&self, manual: bool, token: &CancellationToken) -> Option<NowPlaying> {
        if token.is_cancelled() {
            return None;
        }
        if manual {
            self.state_manager.set_refreshing(true).await;
            self.notify();
        }

        let now_playing = self.run_cycle(token).await;
        if manual {
            self.state_manager.set_refreshing(false).await;
        }
        if manual || now_playing.is_some() {
            self.notify();
        }
        now_playing
    }

    async fn run_cycle(&self, token: &CancellationToken) -> Option<NowPlaying> {
        let results = tokio::select! {
            _ = token.cancelled() => {
                debug!("aggregator: cycle abandoned on shutdown");
                return None;
            }
            results = self.collect() => results,
        };

        for (kind, result) in results.in_order() {
            if let Err(e) = result {
                debug!("aggregator: {} failed: {}", kind.label(), e);
            }
        }
        if results.all_failed() {
            warn!("aggregator: every metadata source failed, showing fallback");
        }

        if token.is_cancelled() {
            debug!("aggregator: discarding settled cycle after shutdown");
            return None;
        }
        let now_playing = self.state_manager.apply_cycle(&results, &self.fallback).await;

        debug!(
            "aggregator: {}/4 sources ok, now playing {:?} by {:?}",
            results.succeeded(),
            now_playing.track.title,
            now_playing.track.artist
        );
        Some(now_playing)
    }

    fn notify(&self) {
        // No receivers is fine
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }
}

/// Owned handle to the periodic refresh task.
pub struct Poller {
    aggregator: Arc<Aggregator>,
    token: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn start(aggregator: Arc<Aggregator>, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let task_aggregator = Arc::clone(&aggregator);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        task_aggregator.refresh_all(false, &task_token).await;
                    }
                }
            }
            debug!("poller: stopped");
        });

        info!("poller: refreshing metadata every {}s", interval.as_secs());
        Self {
            aggregator,
            token,
            join: Some(join),
        }
    }

    /// Manual refresh, run beside the periodic cycle.
    pub fn refresh_now(&self) -> JoinHandle<Option<NowPlaying>> {
        let aggregator = Arc::clone(&self.aggregator);
        let token = self.token.child_token();
        tokio::spawn(async move { aggregator.refresh_all(true, &token).await })
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!("poller: task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
