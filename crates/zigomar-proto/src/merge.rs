//! Field-precedence merge of per-source metadata into [`NowPlaying`].
//!
//! Every source produces a tagged [`SourceReport`] made of partial patches.
//! [`reduce`] applies the successful ones in the fixed [`SourceKind`] order:
//! a later source's defined, non-blank fields override, anything it leaves
//! out keeps the earlier value.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::model::{Fallback, NowPlaying, PlaylistEntry, StationSnapshot, TrackMetadata, PLAYLIST_LIMIT};

pub const AGGREGATE_NOTICE: &str = "Impossible de récupérer les données en temps réel";

/// The four metadata sources, in merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Primary,
    SecondaryText,
    SecondaryStatus,
    StreamTags,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Primary,
        SourceKind::SecondaryText,
        SourceKind::SecondaryStatus,
        SourceKind::StreamTags,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Primary => "instant-audio",
            Self::SecondaryText => "zeno-text",
            Self::SecondaryStatus => "icecast-status",
            Self::StreamTags => "icy-probe",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackPatch {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork: Option<String>,
}

impl TrackPatch {
    pub fn is_empty(&self) -> bool {
        [&self.title, &self.artist, &self.album, &self.artwork]
            .iter()
            .all(|f| defined(f).is_none())
    }

    pub fn apply(&self, track: &mut TrackMetadata) {
        if let Some(v) = defined(&self.title) {
            track.title = v.to_string();
        }
        if let Some(v) = defined(&self.artist) {
            track.artist = v.to_string();
        }
        if let Some(v) = defined(&self.album) {
            track.album = Some(v.to_string());
        }
        if let Some(v) = defined(&self.artwork) {
            track.artwork = Some(v.to_string());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub logo: Option<String>,
    pub listeners: Option<u32>,
    pub bitrate: Option<u32>,
    pub genre: Option<String>,
}

impl StationPatch {
    pub fn apply(&self, station: &mut StationSnapshot) {
        if let Some(v) = defined(&self.name) {
            station.name = v.to_string();
        }
        if let Some(v) = defined(&self.description) {
            station.description = v.to_string();
        }
        if let Some(v) = defined(&self.logo) {
            station.logo = Some(v.to_string());
        }
        if let Some(v) = self.listeners {
            station.listeners = Some(v);
        }
        if let Some(v) = self.bitrate {
            station.bitrate = Some(v);
        }
        if let Some(v) = defined(&self.genre) {
            station.genre = Some(v.to_string());
        }
    }
}

/// What one source contributed in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceReport {
    Primary {
        station: StationPatch,
        track: Option<TrackPatch>,
        playlist: Option<Vec<PlaylistEntry>>,
    },
    SecondaryText {
        track: TrackPatch,
    },
    SecondaryStatus {
        track: TrackPatch,
        station: StationPatch,
    },
    StreamTags {
        track: TrackPatch,
    },
}

impl SourceReport {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Primary { .. } => SourceKind::Primary,
            Self::SecondaryText { .. } => SourceKind::SecondaryText,
            Self::SecondaryStatus { .. } => SourceKind::SecondaryStatus,
            Self::StreamTags { .. } => SourceKind::StreamTags,
        }
    }
}

pub type SourceResult = Result<SourceReport, SourceError>;

/// One settled aggregation cycle: a slot per source.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleResults {
    pub primary: SourceResult,
    pub secondary_text: SourceResult,
    pub secondary_status: SourceResult,
    pub stream_tags: SourceResult,
}

impl CycleResults {
    /// Results in merge order.
    pub fn in_order(&self) -> [(SourceKind, &SourceResult); 4] {
        [
            (SourceKind::Primary, &self.primary),
            (SourceKind::SecondaryText, &self.secondary_text),
            (SourceKind::SecondaryStatus, &self.secondary_status),
            (SourceKind::StreamTags, &self.stream_tags),
        ]
    }

    pub fn succeeded(&self) -> usize {
        self.in_order().iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn all_failed(&self) -> bool {
        self.succeeded() == 0
    }
}

/// Pure merge of a settled cycle onto the current model.
pub fn reduce(
    current: &NowPlaying,
    results: &CycleResults,
    fallback: &Fallback,
    now: DateTime<Local>,
) -> NowPlaying {
    let mut next = current.clone();
    next.loading = false;
    next.last_update = Some(now);

    if results.all_failed() {
        next.track = fallback.track.clone();
        next.notice = Some(AGGREGATE_NOTICE.to_string());
        return next;
    }

    next.notice = None;
    for (_, result) in results.in_order() {
        if let Ok(report) = result {
            apply_report(&mut next, report);
        }
    }
    next
}

fn apply_report(model: &mut NowPlaying, report: &SourceReport) {
    match report {
        SourceReport::Primary {
            station,
            track,
            playlist,
        } => {
            station.apply(&mut model.station);
            if let Some(track) = track {
                track.apply(&mut model.track);
            }
            if let Some(entries) = playlist {
                model.playlist = entries.iter().take(PLAYLIST_LIMIT).cloned().collect();
            }
        }
        SourceReport::SecondaryText { track } | SourceReport::StreamTags { track } => {
            track.apply(&mut model.track);
        }
        SourceReport::SecondaryStatus { track, station } => {
            track.apply(&mut model.track);
            station.apply(&mut model.station);
        }
    }
}

fn defined(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
