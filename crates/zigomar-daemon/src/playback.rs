/// Stream playback controller.
///
/// Owns exactly one [`MediaElement`] and at most one [`AdaptiveSession`].  A
/// play request walks the candidate list in order; each candidate is started
/// on the engine chosen by `plan_attempt` and then resolved by element events:
///
/// ```text
///   toggle_play ── Idle|Failed ──► Attempting(i) ──CanPlay/Play──► Playing
///                                     │  Error / AdaptiveFatal / deadline
///                                     ▼
///                                Attempting(i+1) ... ──exhausted──► Failed
///   Playing ──pause / Pause / Ended / Error──► Idle
/// ```
///
/// Every load bumps a generation counter and every element event carries the
/// generation it was emitted for.  Events from a superseded load are dropped
/// before they can touch the phase or the connection indicator.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zigomar_proto::candidates::{
    first_viable, plan_attempt, AttemptOutcome, Capabilities, EnginePlan, PlayReport, StreamCandidate, HLS_MIME,
};
use zigomar_proto::error::PlaybackError;
use zigomar_proto::protocol::{ConnectionState, PlayerPhase, PlayerView};

pub const PLAYBACK_FAILED_MESSAGE: &str = "Impossible de lire le flux audio. Vérifiez votre connexion.";
pub const ELEMENT_ERROR_MESSAGE: &str = "Erreur de connexion au flux audio";

#[derive(Debug, Clone, PartialEq)]
pub enum ElementEventKind {
    LoadStart,
    CanPlay,
    Play,
    Pause,
    Ended,
    Error(String),
    /// Unrecoverable error from the adaptive-streaming client.
    AdaptiveFatal(String),
    /// The attempt deadline for this generation passed.
    AttemptTimeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementEvent {
    pub generation: u64,
    pub kind: ElementEventKind,
}

impl ElementEvent {
    pub fn new(generation: u64, kind: ElementEventKind) -> Self {
        Self { generation, kind }
    }
}

/// Where elements and adaptive sessions report their events.
pub type EventSink = mpsc::Sender<ElementEvent>;

/// Native playback element.
#[async_trait]
pub trait MediaElement: Send + Sync {
    fn can_play_type(&self, mime: &str) -> bool;
    /// Point the element at `url`.  Events for this load carry `generation`.
    async fn load(&self, url: &str, generation: u64) -> anyhow::Result<()>;
    async fn play(&self) -> anyhow::Result<()>;
    async fn pause(&self) -> anyhow::Result<()>;
    /// 0.0..=1.0
    async fn set_volume(&self, volume: f64) -> anyhow::Result<()>;
    async fn set_muted(&self, muted: bool) -> anyhow::Result<()>;
    /// Stop and free everything the element holds.
    async fn release(&self);
}

/// A live adaptive-streaming attachment.
#[async_trait]
pub trait AdaptiveSession: Send + Sync {
    async fn destroy(self: Box<Self>);
}

/// Adaptive-streaming client able to drive a [`MediaElement`].
#[async_trait]
pub trait AdaptiveStreaming: Send + Sync {
    fn is_supported(&self) -> bool;
    /// Load the manifest, attach to `element` and start playback.  A fatal
    /// error while attaching is returned; later ones arrive as
    /// [`ElementEventKind::AdaptiveFatal`].
    async fn attach(
        &self,
        url: &str,
        element: Arc<dyn MediaElement>,
        generation: u64,
    ) -> Result<Box<dyn AdaptiveSession>, PlaybackError>;
}

#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    /// 0..=100
    pub volume: u8,
    pub attempt_timeout: Duration,
}

pub struct PlaybackController {
    element: Arc<dyn MediaElement>,
    adaptive: Option<Arc<dyn AdaptiveStreaming>>,
    session: Option<Box<dyn AdaptiveSession>>,
    candidates: Vec<StreamCandidate>,
    caps: Capabilities,
    events: EventSink,
    attempt_timeout: Duration,
    deadline: Option<JoinHandle<()>>,

    generation: u64,
    phase: PlayerPhase,
    /// Candidate index and engine of the attempt in flight.
    current: Option<(usize, EnginePlan)>,
    report: PlayReport,

    volume: u8,
    muted: bool,
    connection: ConnectionState,
    error: Option<String>,
    active_url: Option<String>,
}

impl PlaybackController {
    pub async fn new(
        element: Arc<dyn MediaElement>,
        adaptive: Option<Arc<dyn AdaptiveStreaming>>,
        candidates: Vec<StreamCandidate>,
        settings: PlaybackSettings,
        events: EventSink,
    ) -> Self {
        let caps = Capabilities {
            adaptive_supported: adaptive.as_ref().is_some_and(|a| a.is_supported()),
            native_hls: element.can_play_type(HLS_MIME),
        };
        debug!("playback: {:?}, {} candidates", caps, candidates.len());

        let volume = settings.volume.min(100);
        if let Err(e) = element.set_volume(f64::from(volume) / 100.0).await {
            warn!("playback: initial volume not applied: {}", e);
        }

        Self {
            element,
            adaptive,
            session: None,
            candidates,
            caps,
            events,
            attempt_timeout: settings.attempt_timeout,
            deadline: None,
            generation: 0,
            phase: PlayerPhase::Idle,
            current: None,
            report: PlayReport::default(),
            volume,
            muted: false,
            connection: ConnectionState::Connecting,
            error: None,
            active_url: None,
        }
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            phase: self.phase,
            loading: self.is_loading(),
            volume: self.volume,
            muted: self.muted,
            icon_muted: self.muted || self.volume == 0,
            connection: self.connection,
            error: self.error.clone(),
            active_url: self.active_url.clone(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.phase == PlayerPhase::Attempting
    }

    pub fn phase(&self) -> PlayerPhase {
        self.phase
    }

    /// Attempts of the most recent play request.
    pub fn last_report(&self) -> &PlayReport {
        &self.report
    }

    /// Pause when playing, start a new attempt otherwise.  Refused (returns
    /// `false`) while an attempt is already in flight.
    pub async fn toggle_play(&mut self) -> bool {
        if self.is_loading() {
            debug!("playback: play ignored, attempt in flight");
            return false;
        }
        match self.phase {
            PlayerPhase::Playing => self.pause().await,
            PlayerPhase::Idle | PlayerPhase::Failed | PlayerPhase::Attempting => {
                self.begin_attempts().await
            }
        }
        true
    }

    pub async fn pause(&mut self) {
        if self.phase != PlayerPhase::Playing {
            return;
        }
        if let Err(e) = self.element.pause().await {
            warn!("playback: pause failed: {}", e);
        }
        self.phase = PlayerPhase::Idle;
        info!("playback: paused");
    }

    /// 0..=100.  Does not touch the mute flag.
    pub async fn set_volume(&mut self, volume: u8) {
        let volume = volume.min(100);
        if let Err(e) = self.element.set_volume(f64::from(volume) / 100.0).await {
            warn!("playback: set volume failed: {}", e);
        }
        self.volume = volume;
    }

    pub async fn toggle_mute(&mut self) {
        let muted = !self.muted;
        if let Err(e) = self.element.set_muted(muted).await {
            warn!("playback: set muted failed: {}", e);
        }
        self.muted = muted;
    }

    /// Feed one element event.  Returns whether the event was current.
    pub async fn handle_element_event(&mut self, event: ElementEvent) -> bool {
        if event.generation != self.generation {
            debug!(
                "playback: dropping stale {:?} (gen {} != {})",
                event.kind, event.generation, self.generation
            );
            return false;
        }

        match event.kind {
            ElementEventKind::LoadStart => {
                self.connection = ConnectionState::Connecting;
                self.error = None;
            }
            ElementEventKind::CanPlay | ElementEventKind::Play => {
                self.connection = ConnectionState::Connected;
                self.error = None;
                if self.phase == PlayerPhase::Attempting {
                    self.attempt_succeeded();
                }
            }
            ElementEventKind::Pause | ElementEventKind::Ended => {
                if self.phase == PlayerPhase::Playing {
                    self.phase = PlayerPhase::Idle;
                }
            }
            ElementEventKind::Error(msg) => {
                self.connection = ConnectionState::Error;
                self.error = Some(ELEMENT_ERROR_MESSAGE.to_string());
                match self.phase {
                    PlayerPhase::Attempting => {
                        self.attempt_failed(PlaybackError::Element(msg)).await;
                    }
                    PlayerPhase::Playing => {
                        warn!("playback: element error while playing: {}", msg);
                        self.phase = PlayerPhase::Idle;
                    }
                    _ => {}
                }
            }
            ElementEventKind::AdaptiveFatal(msg) => match self.phase {
                PlayerPhase::Attempting => {
                    self.attempt_failed(PlaybackError::AdaptiveFatal(msg)).await;
                }
                PlayerPhase::Playing => {
                    warn!("playback: adaptive stream died: {}", msg);
                    self.destroy_session().await;
                    if let Err(e) = self.element.pause().await {
                        debug!("playback: pause after fatal failed: {}", e);
                    }
                    self.error = Some(ELEMENT_ERROR_MESSAGE.to_string());
                    self.phase = PlayerPhase::Idle;
                }
                _ => {}
            },
            ElementEventKind::AttemptTimeout => {
                if self.phase == PlayerPhase::Attempting {
                    let secs = self.attempt_timeout.as_secs();
                    self.attempt_failed(PlaybackError::Timeout(secs)).await;
                }
            }
        }
        true
    }

    /// Tear down: destroy the adaptive session, then pause and release the
    /// element.  The controller cannot be reused.
    pub async fn shutdown(mut self) {
        self.cancel_deadline();
        self.destroy_session().await;
        if let Err(e) = self.element.pause().await {
            debug!("playback: pause on shutdown failed: {}", e);
        }
        self.element.release().await;
        info!("playback: shut down");
    }

    // ── attempts ──────────────────────────────────────────────────────────────

    async fn begin_attempts(&mut self) {
        info!("playback: starting, {} candidates", self.candidates.len());
        self.phase = PlayerPhase::Attempting;
        self.error = None;
        self.report = PlayReport::default();
        self.try_from(0).await;
    }

    /// Start candidates from `index` on until one is in flight.  Candidates
    /// no engine can play, and those that fail synchronously, are recorded
    /// and skipped.
    async fn try_from(&mut self, mut index: usize) {
        loop {
            self.cancel_deadline();
            self.destroy_session().await;

            let remaining = self.candidates.get(index..).unwrap_or(&[]);
            let Some((offset, candidate)) = first_viable(remaining, self.caps) else {
                self.skip_unsupported(index, self.candidates.len());
                self.exhausted().await;
                return;
            };
            let candidate = candidate.clone();
            self.skip_unsupported(index, index + offset);
            index += offset;

            self.generation += 1;
            let generation = self.generation;
            debug!(
                "playback: candidate {} ({:?}) gen {}: {}",
                index, candidate.format, generation, candidate.url
            );

            match self.start_candidate(&candidate, generation).await {
                Ok(plan) => {
                    self.current = Some((index, plan));
                    self.active_url = Some(candidate.url);
                    self.arm_deadline(generation);
                    return;
                }
                Err(error) => {
                    warn!("playback: {} failed: {}", candidate.url, error);
                    self.report
                        .attempts
                        .push(AttemptOutcome::Failed { candidate, error });
                    index += 1;
                }
            }
        }
    }

    async fn start_candidate(
        &mut self,
        candidate: &StreamCandidate,
        generation: u64,
    ) -> Result<EnginePlan, PlaybackError> {
        let plan = plan_attempt(candidate, self.caps);
        match plan {
            EnginePlan::Unsupported => Err(PlaybackError::Unsupported(candidate.url.clone())),
            EnginePlan::Adaptive => {
                let adaptive = self
                    .adaptive
                    .clone()
                    .ok_or_else(|| PlaybackError::Unsupported(candidate.url.clone()))?;
                let session = adaptive
                    .attach(&candidate.url, Arc::clone(&self.element), generation)
                    .await?;
                self.session = Some(session);
                Ok(plan)
            }
            EnginePlan::Native => {
                self.element
                    .load(&candidate.url, generation)
                    .await
                    .map_err(|e| PlaybackError::Element(e.to_string()))?;
                self.element
                    .play()
                    .await
                    .map_err(|e| PlaybackError::Element(e.to_string()))?;
                Ok(plan)
            }
        }
    }

    fn skip_unsupported(&mut self, from: usize, to: usize) {
        for candidate in self.candidates[from.min(to)..to].iter().cloned() {
            warn!("playback: no engine for {}", candidate.url);
            self.report.attempts.push(AttemptOutcome::Failed {
                error: PlaybackError::Unsupported(candidate.url.clone()),
                candidate,
            });
        }
    }

    fn attempt_succeeded(&mut self) {
        self.cancel_deadline();
        if let Some((index, plan)) = self.current.take() {
            if let Some(candidate) = self.candidates.get(index).cloned() {
                info!("playback: playing {} via {:?}", candidate.url, plan);
                self.report
                    .attempts
                    .push(AttemptOutcome::Playing { candidate, plan });
            }
        }
        self.phase = PlayerPhase::Playing;
    }

    async fn attempt_failed(&mut self, error: PlaybackError) {
        let Some((index, _)) = self.current.take() else {
            return;
        };
        if let Some(candidate) = self.candidates.get(index).cloned() {
            warn!("playback: {} failed: {}", candidate.url, error);
            self.report
                .attempts
                .push(AttemptOutcome::Failed { candidate, error });
        }
        self.try_from(index + 1).await;
    }

    async fn exhausted(&mut self) {
        let err = self.report.result().err();
        warn!(
            "playback: {}",
            err.map(|e| e.to_string())
                .unwrap_or_else(|| "no stream candidates".to_string())
        );
        if let Err(e) = self.element.pause().await {
            debug!("playback: pause after failure failed: {}", e);
        }
        self.current = None;
        self.active_url = None;
        self.error = Some(PLAYBACK_FAILED_MESSAGE.to_string());
        self.phase = PlayerPhase::Failed;
    }

    // ── resources ─────────────────────────────────────────────────────────────

    fn arm_deadline(&mut self, generation: u64) {
        let events = self.events.clone();
        let timeout = self.attempt_timeout;
        self.deadline = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events
                .send(ElementEvent::new(generation, ElementEventKind::AttemptTimeout))
                .await;
        }));
    }

    fn cancel_deadline(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
    }

    async fn destroy_session(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("playback: destroying adaptive session");
            session.destroy().await;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use std::sync::atomic::Ordering;

    const HLS: &str = "/zeno-stream/m.m3u8";
    const DIRECT: &str = "/zeno-stream/m";

    fn candidates() -> Vec<StreamCandidate> {
        vec![StreamCandidate::from_url(HLS), StreamCandidate::from_url(DIRECT)]
    }

    fn settings() -> PlaybackSettings {
        PlaybackSettings {
            volume: 70,
            attempt_timeout: Duration::from_secs(15),
        }
    }

    async fn controller(
        element: Arc<FakeElement>,
        adaptive: Option<Arc<FakeAdaptive>>,
        tx: EventSink,
    ) -> PlaybackController {
        let adaptive = adaptive.map(|a| a as Arc<dyn AdaptiveStreaming>);
        PlaybackController::new(element, adaptive, candidates(), settings(), tx).await
    }

    /// Deliver every queued event, including the ones handling produces.
    async fn settle(ctrl: &mut PlaybackController, rx: &mut mpsc::Receiver<ElementEvent>) {
        while let Ok(event) = rx.try_recv() {
            ctrl.handle_element_event(event).await;
        }
    }

    #[tokio::test]
    async fn test_manifest_failure_falls_back_to_direct() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), false, &[(DIRECT, Behavior::Playable)]);
        let adaptive = FakeAdaptive::new(AdaptiveBehavior::ManifestFails, tx.clone());
        let mut ctrl = controller(element.clone(), Some(adaptive), tx).await;

        assert!(ctrl.toggle_play().await);
        settle(&mut ctrl, &mut rx).await;

        assert_eq!(ctrl.phase(), PlayerPhase::Playing);
        let report = ctrl.last_report();
        assert_eq!(report.attempts.len(), 2);
        assert!(matches!(
            &report.attempts[0],
            AttemptOutcome::Failed { error: PlaybackError::AdaptiveFatal(_), .. }
        ));
        assert_eq!(report.result().unwrap().url, DIRECT);
        assert_eq!(ctrl.view().connection, ConnectionState::Connected);
        assert_eq!(ctrl.view().active_url.as_deref(), Some(DIRECT));
        assert!(!ctrl.view().loading);
    }

    #[tokio::test]
    async fn test_late_fatal_error_destroys_session_and_moves_on() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), false, &[(DIRECT, Behavior::Playable)]);
        let adaptive = FakeAdaptive::new(AdaptiveBehavior::FatalLater, tx.clone());
        let destroyed = adaptive.destroyed.clone();
        let mut ctrl = controller(element, Some(adaptive), tx).await;

        ctrl.toggle_play().await;
        assert!(ctrl.view().loading);
        settle(&mut ctrl, &mut rx).await;

        assert!(destroyed.load(Ordering::SeqCst));
        assert_eq!(ctrl.phase(), PlayerPhase::Playing);
        assert_eq!(ctrl.last_report().attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_hls_without_any_engine_is_rejected_not_retried() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), false, &[(DIRECT, Behavior::Playable)]);
        let mut ctrl = controller(element.clone(), None, tx).await;

        ctrl.toggle_play().await;
        settle(&mut ctrl, &mut rx).await;

        assert_eq!(ctrl.phase(), PlayerPhase::Playing);
        assert!(matches!(
            &ctrl.last_report().attempts[0],
            AttemptOutcome::Failed { error: PlaybackError::Unsupported(_), .. }
        ));
        assert!(!element.calls().contains(&format!("load {}", HLS)));
    }

    #[tokio::test]
    async fn test_only_unplayable_candidates_fail_without_loading() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), false, &[]);
        let mut ctrl = PlaybackController::new(
            element.clone(),
            None,
            vec![StreamCandidate::from_url(HLS), StreamCandidate::from_url("/zeno-stream/b.m3u8")],
            settings(),
            tx,
        )
        .await;

        ctrl.toggle_play().await;
        settle(&mut ctrl, &mut rx).await;

        assert_eq!(ctrl.phase(), PlayerPhase::Failed);
        assert_eq!(ctrl.last_report().attempts.len(), 2);
        assert!(ctrl
            .last_report()
            .attempts
            .iter()
            .all(|a| matches!(a, AttemptOutcome::Failed { error: PlaybackError::Unsupported(_), .. })));
        assert!(!element.calls().iter().any(|c| c.starts_with("load")));
    }

    #[tokio::test]
    async fn test_native_hls_used_when_no_adaptive_client() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), true, &[(HLS, Behavior::Playable)]);
        let mut ctrl = controller(element.clone(), None, tx).await;

        ctrl.toggle_play().await;
        settle(&mut ctrl, &mut rx).await;

        assert_eq!(ctrl.phase(), PlayerPhase::Playing);
        assert_eq!(ctrl.last_report().attempts.len(), 1);
        assert!(element.calls().contains(&format!("load {}", HLS)));
    }

    #[tokio::test]
    async fn test_all_candidates_failing() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), false, &[(DIRECT, Behavior::Broken)]);
        let adaptive = FakeAdaptive::new(AdaptiveBehavior::ManifestFails, tx.clone());
        let mut ctrl = controller(element, Some(adaptive), tx).await;

        ctrl.toggle_play().await;
        settle(&mut ctrl, &mut rx).await;

        let view = ctrl.view();
        assert_eq!(view.phase, PlayerPhase::Failed);
        assert!(!view.loading);
        assert_eq!(view.error.as_deref(), Some(PLAYBACK_FAILED_MESSAGE));
        assert_eq!(view.connection, ConnectionState::Error);
        assert_eq!(ctrl.last_report().result(), Err(PlaybackError::Exhausted(2)));
    }

    #[tokio::test]
    async fn test_load_rejection_is_a_candidate_failure() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), true, &[(HLS, Behavior::Rejects), (DIRECT, Behavior::Playable)]);
        let mut ctrl = controller(element, None, tx).await;

        ctrl.toggle_play().await;
        settle(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), PlayerPhase::Playing);
        assert_eq!(ctrl.last_report().result().unwrap().url, DIRECT);
    }

    #[tokio::test]
    async fn test_play_refused_while_loading_then_failed_behaves_like_idle() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), false, &[(DIRECT, Behavior::Broken)]);
        let adaptive = FakeAdaptive::new(AdaptiveBehavior::ManifestFails, tx.clone());
        let mut ctrl = controller(element.clone(), Some(adaptive), tx).await;

        ctrl.toggle_play().await;
        assert!(ctrl.is_loading());
        assert!(!ctrl.toggle_play().await);
        settle(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), PlayerPhase::Failed);

        // A new request starts over from the first candidate.
        assert!(ctrl.toggle_play().await);
        assert!(ctrl.is_loading());
        assert!(ctrl.view().error.is_none());
        settle(&mut ctrl, &mut rx).await;
        let loads = element
            .calls()
            .iter()
            .filter(|c| c.as_str() == format!("load {}", DIRECT))
            .count();
        assert_eq!(loads, 2);
    }

    #[tokio::test]
    async fn test_toggle_while_playing_pauses() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), false, &[(HLS, Behavior::Playable)]);
        let adaptive = FakeAdaptive::new(AdaptiveBehavior::Works, tx.clone());
        let mut ctrl = controller(element.clone(), Some(adaptive), tx).await;

        ctrl.toggle_play().await;
        settle(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), PlayerPhase::Playing);

        ctrl.toggle_play().await;
        assert_eq!(ctrl.phase(), PlayerPhase::Idle);
        assert_eq!(element.calls().last().map(String::as_str), Some("pause"));
    }

    #[tokio::test]
    async fn test_element_events_end_playback() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), false, &[(DIRECT, Behavior::Playable)]);
        let mut ctrl = controller(element, None, tx).await;

        ctrl.toggle_play().await;
        settle(&mut ctrl, &mut rx).await;
        let gen = ctrl.generation;

        ctrl.handle_element_event(ElementEvent::new(gen, ElementEventKind::Ended)).await;
        assert_eq!(ctrl.phase(), PlayerPhase::Idle);

        ctrl.toggle_play().await;
        settle(&mut ctrl, &mut rx).await;
        let gen = ctrl.generation;
        ctrl.handle_element_event(ElementEvent::new(gen, ElementEventKind::Error("net".into())))
            .await;
        let view = ctrl.view();
        assert_eq!(view.phase, PlayerPhase::Idle);
        assert_eq!(view.connection, ConnectionState::Error);
        assert_eq!(view.error.as_deref(), Some(ELEMENT_ERROR_MESSAGE));
    }

    #[tokio::test]
    async fn test_stale_events_are_ignored() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), false, &[(DIRECT, Behavior::Playable)]);
        let mut ctrl = controller(element, None, tx).await;

        ctrl.toggle_play().await;
        settle(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), PlayerPhase::Playing);

        let stale = ctrl.generation - 1;
        assert!(
            !ctrl
                .handle_element_event(ElementEvent::new(stale, ElementEventKind::Error("old".into())))
                .await
        );
        assert_eq!(ctrl.phase(), PlayerPhase::Playing);
        assert_eq!(ctrl.view().connection, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_attempt_deadline_moves_to_next_candidate() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(
            tx.clone(),
            true,
            &[(HLS, Behavior::Silent), (DIRECT, Behavior::Playable)],
        );
        let mut ctrl = PlaybackController::new(
            element,
            None,
            candidates(),
            PlaybackSettings {
                volume: 70,
                attempt_timeout: Duration::from_millis(50),
            },
            tx,
        )
        .await;

        ctrl.toggle_play().await;
        settle(&mut ctrl, &mut rx).await;
        assert!(ctrl.is_loading());

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, ElementEventKind::AttemptTimeout);
        ctrl.handle_element_event(event).await;
        settle(&mut ctrl, &mut rx).await;

        assert_eq!(ctrl.phase(), PlayerPhase::Playing);
        assert!(matches!(
            &ctrl.last_report().attempts[0],
            AttemptOutcome::Failed { error: PlaybackError::Timeout(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_volume_and_mute_are_independent() {
        let (tx, _rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), false, &[]);
        let mut ctrl = controller(element.clone(), None, tx).await;
        assert_eq!(element.calls(), vec!["volume 0.70".to_string()]);

        ctrl.set_volume(0).await;
        let view = ctrl.view();
        assert!(view.icon_muted);
        assert!(!view.muted);

        ctrl.toggle_mute().await;
        ctrl.set_volume(40).await;
        let view = ctrl.view();
        assert!(view.muted);
        assert!(view.icon_muted);
        assert_eq!(view.volume, 40);

        ctrl.toggle_mute().await;
        assert!(!ctrl.view().icon_muted);
        assert_eq!(ctrl.view().volume, 40);

        ctrl.set_volume(250).await;
        assert_eq!(ctrl.view().volume, 100);
        assert!(element.calls().contains(&"volume 1.00".to_string()));
    }

    #[tokio::test]
    async fn test_connection_starts_connecting() {
        let (tx, _rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), false, &[]);
        let ctrl = controller(element, None, tx).await;
        assert_eq!(ctrl.view().connection, ConnectionState::Connecting);
        assert_eq!(ctrl.view().phase, PlayerPhase::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_destroys_session_then_releases_element() {
        let (tx, mut rx) = mpsc::channel(64);
        let element = FakeElement::new(tx.clone(), false, &[(HLS, Behavior::Playable)]);
        let adaptive = FakeAdaptive::new(AdaptiveBehavior::Works, tx.clone());
        let destroyed = adaptive.destroyed.clone();
        let mut ctrl = controller(element.clone(), Some(adaptive), tx).await;

        ctrl.toggle_play().await;
        settle(&mut ctrl, &mut rx).await;
        ctrl.shutdown().await;

        assert!(destroyed.load(Ordering::SeqCst));
        let calls = element.calls();
        let n = calls.len();
        assert_eq!(&calls[n - 2..], &["pause".to_string(), "release".to_string()]);
    }
}
