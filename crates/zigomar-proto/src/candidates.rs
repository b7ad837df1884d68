//! Stream candidates and the engine-selection rules for each attempt.

use serde::{Deserialize, Serialize};

use crate::error::PlaybackError;

/// MIME type an element must accept to play an HLS manifest natively.
pub const HLS_MIME: &str = "application/vnd.apple.mpegurl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamFormat {
    /// Adaptive-streaming manifest (`.m3u8`).
    Hls,
    /// Plain progressive stream handed straight to the element.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCandidate {
    pub format: StreamFormat,
    pub url: String,
}

impl StreamCandidate {
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let format = if looks_hls_url(&url) {
            StreamFormat::Hls
        } else {
            StreamFormat::Direct
        };
        Self { format, url }
    }
}

pub fn looks_hls_url(url: &str) -> bool {
    url.to_ascii_lowercase().contains(".m3u8")
}

/// What the runtime can do, probed once per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// An adaptive-streaming client is available.
    pub adaptive_supported: bool,
    /// The native element reports it can play [`HLS_MIME`].
    pub native_hls: bool,
}

/// How a single candidate will be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePlan {
    Adaptive,
    Native,
    /// Rejected outright; not retried on another engine.
    Unsupported,
}

pub fn plan_attempt(candidate: &StreamCandidate, caps: Capabilities) -> EnginePlan {
    match candidate.format {
        StreamFormat::Direct => EnginePlan::Native,
        StreamFormat::Hls if caps.adaptive_supported => EnginePlan::Adaptive,
        StreamFormat::Hls if caps.native_hls => EnginePlan::Native,
        StreamFormat::Hls => EnginePlan::Unsupported,
    }
}

/// First candidate that some engine can at least try, with its position.
pub fn first_viable(candidates: &[StreamCandidate], caps: Capabilities) -> Option<(usize, &StreamCandidate)> {
    candidates
        .iter()
        .enumerate()
        .find(|(_, c)| plan_attempt(c, caps) != EnginePlan::Unsupported)
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Playing {
        candidate: StreamCandidate,
        plan: EnginePlan,
    },
    Failed {
        candidate: StreamCandidate,
        error: PlaybackError,
    },
}

impl AttemptOutcome {
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing { .. })
    }

    pub fn candidate(&self) -> &StreamCandidate {
        match self {
            Self::Playing { candidate, .. } | Self::Failed { candidate, .. } => candidate,
        }
    }
}

/// Full record of one play request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayReport {
    pub attempts: Vec<AttemptOutcome>,
}

impl PlayReport {
    pub fn playing(&self) -> Option<&StreamCandidate> {
        self.attempts
            .iter()
            .find(|a| a.is_playing())
            .map(AttemptOutcome::candidate)
    }

    pub fn result(&self) -> Result<&StreamCandidate, PlaybackError> {
        self.playing()
            .ok_or(PlaybackError::Exhausted(self.attempts.len()))
    }
}
