/// Minimal HLS client standing in for an adaptive-streaming library.
///
/// `attach` fetches the manifest, follows a master playlist to its
/// highest-bandwidth variant, loads that media playlist into the element
/// (mpv does the segment fetching) and starts playback.  For live playlists a
/// watchdog task keeps reloading the media playlist once per target duration;
/// three failed reloads in a row raise a fatal error for the generation that
/// started it.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zigomar_proto::error::PlaybackError;

use crate::playback::{
    AdaptiveSession, AdaptiveStreaming, ElementEvent, ElementEventKind, EventSink, MediaElement,
};

/// Consecutive reload failures tolerated before the stream is declared dead.
pub const MAX_RELOAD_FAILURES: u32 = 3;

const MIN_RELOAD_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub bandwidth: u64,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub target_duration: u64,
    pub segments: usize,
    /// `#EXT-X-ENDLIST` seen: nothing more will be appended.
    pub ended: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    Master(Vec<Variant>),
    Media(MediaPlaylist),
}

pub fn parse_playlist(text: &str) -> Result<Playlist, String> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next() != Some("#EXTM3U") {
        return Err("missing #EXTM3U header".to_string());
    }

    let mut variants = Vec::new();
    let mut pending_bandwidth: Option<u64> = None;
    let mut target_duration = 0u64;
    let mut segments = 0usize;
    let mut ended = false;

    for line in lines {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            pending_bandwidth = Some(attribute(attrs, "BANDWIDTH").and_then(|v| v.parse().ok()).unwrap_or(0));
        } else if let Some(v) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            target_duration = v.trim().parse().unwrap_or(0);
        } else if line == "#EXT-X-ENDLIST" {
            ended = true;
        } else if line.starts_with('#') {
            continue;
        } else if let Some(bandwidth) = pending_bandwidth.take() {
            variants.push(Variant {
                bandwidth,
                uri: line.to_string(),
            });
        } else {
            segments += 1;
        }
    }

    if !variants.is_empty() {
        return Ok(Playlist::Master(variants));
    }
    Ok(Playlist::Media(MediaPlaylist {
        target_duration,
        segments,
        ended,
    }))
}

/// Value of `KEY=value` in an attribute list; quoted values may hold commas.
fn attribute<'a>(attrs: &'a str, key: &str) -> Option<&'a str> {
    let mut rest = attrs;
    while !rest.is_empty() {
        let (name, after) = rest.split_once('=')?;
        let (value, next) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], quoted[end + 1..].trim_start_matches(','))
        } else {
            match after.split_once(',') {
                Some((v, n)) => (v, n),
                None => (after, ""),
            }
        };
        if name.trim() == key {
            return Some(value.trim());
        }
        rest = next;
    }
    None
}

pub fn best_variant(variants: &[Variant]) -> Option<&Variant> {
    variants.iter().max_by_key(|v| v.bandwidth)
}

pub fn resolve_uri(base: &str, uri: &str) -> Result<String, String> {
    let base = Url::parse(base).map_err(|e| format!("bad playlist url {}: {}", base, e))?;
    base.join(uri)
        .map(|u| u.to_string())
        .map_err(|e| format!("bad variant uri {}: {}", uri, e))
}

pub struct HlsClient {
    http: Client,
    events: EventSink,
}

impl HlsClient {
    pub fn new(http: Client, events: EventSink) -> Self {
        Self { http, events }
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        fetch_text(&self.http, url).await
    }
}

async fn fetch_text(http: &Client, url: &str) -> Result<String, String> {
    let resp = http.get(url).send().await.map_err(|e| e.to_string())?;
    let status = resp.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status.as_u16()));
    }
    resp.text().await.map_err(|e| e.to_string())
}

#[async_trait]
impl AdaptiveStreaming for HlsClient {
    fn is_supported(&self) -> bool {
        true
    }

    async fn attach(
        &self,
        url: &str,
        element: Arc<dyn MediaElement>,
        generation: u64,
    ) -> Result<Box<dyn AdaptiveSession>, PlaybackError> {
        let fatal = |stage: &str, e: String| PlaybackError::AdaptiveFatal(format!("{}: {}", stage, e));

        let manifest = self.fetch(url).await.map_err(|e| fatal("manifestLoadError", e))?;
        let (media_url, media) = match parse_playlist(&manifest).map_err(|e| fatal("manifestParsingError", e))? {
            Playlist::Media(media) => (url.to_string(), media),
            Playlist::Master(variants) => {
                let best = best_variant(&variants)
                    .ok_or_else(|| fatal("manifestParsingError", "no variants".to_string()))?;
                let media_url = resolve_uri(url, &best.uri).map_err(|e| fatal("levelLoadError", e))?;
                debug!("hls: picked {} bps variant {}", best.bandwidth, media_url);
                let text = self
                    .fetch(&media_url)
                    .await
                    .map_err(|e| fatal("levelLoadError", e))?;
                match parse_playlist(&text).map_err(|e| fatal("levelParsingError", e))? {
                    Playlist::Media(media) => (media_url, media),
                    Playlist::Master(_) => {
                        return Err(fatal("levelParsingError", "nested master playlist".to_string()))
                    }
                }
            }
        };

        info!(
            "hls: manifest parsed, {} segments, target {}s",
            media.segments, media.target_duration
        );
        element
            .load(&media_url, generation)
            .await
            .map_err(|e| PlaybackError::Element(e.to_string()))?;
        element
            .play()
            .await
            .map_err(|e| PlaybackError::Element(e.to_string()))?;

        let watchdog = (!media.ended).then(|| {
            let interval = Duration::from_secs(media.target_duration).max(MIN_RELOAD_INTERVAL);
            tokio::spawn(watch_live_playlist(
                self.http.clone(),
                media_url,
                interval,
                self.events.clone(),
                generation,
            ))
        });
        Ok(Box::new(HlsSession { watchdog }))
    }
}

async fn watch_live_playlist(
    http: Client,
    url: String,
    interval: Duration,
    events: EventSink,
    generation: u64,
) {
    let mut failures = 0u32;
    loop {
        tokio::time::sleep(interval).await;
        let result = fetch_text(&http, &url).await.and_then(|t| parse_playlist(&t));
        match result {
            Ok(Playlist::Media(media)) => {
                failures = 0;
                if media.ended {
                    debug!("hls: playlist ended, watchdog done");
                    return;
                }
            }
            Ok(Playlist::Master(_)) => failures += 1,
            Err(e) => {
                failures += 1;
                warn!("hls: reload {} failed ({}/{}): {}", url, failures, MAX_RELOAD_FAILURES, e);
            }
        }
        if failures >= MAX_RELOAD_FAILURES {
            let _ = events
                .send(ElementEvent::new(
                    generation,
                    ElementEventKind::AdaptiveFatal(format!("levelLoadError: {}", url)),
                ))
                .await;
            return;
        }
    }
}

pub struct HlsSession {
    watchdog: Option<JoinHandle<()>>,
}

#[async_trait]
impl AdaptiveSession for HlsSession {
    async fn destroy(self: Box<Self>) {
        let mut session = self;
        if let Some(watchdog) = session.watchdog.take() {
            watchdog.abort();
            let _ = watchdog.await;
        }
    }
}

impl Drop for HlsSession {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }
}
