//! Display model shared by the aggregator, the playback controller and every
//! presentational client.
//!
//! `NowPlaying` is what a shell renders.  It is never empty: the track always
//! carries a title and an artist, and the helpers below fall back to the
//! station branding for anything a source did not provide.

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::StationConfig;

/// How many playlist entries are surfaced to clients.
pub const PLAYLIST_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub artwork: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub listeners: Option<u32>,
    /// kbps
    #[serde(default)]
    pub bitrate: Option<u32>,
    #[serde(default)]
    pub genre: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaylistEntry {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub artwork: Option<String>,
    /// Timestamp exactly as the provider sent it (RFC 3339 in practice).
    #[serde(default, deserialize_with = "null_as_empty")]
    pub played_at: String,
    /// Seconds
    #[serde(default, deserialize_with = "lenient_u32")]
    pub duration: Option<u32>,
}

/// Counts from the providers arrive as numbers, floats (`245.0`) or strings
/// (`"128"`).  Anything else reads as absent.
pub fn lenient_u32<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(de)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => match n.as_u64() {
            Some(n) => u32::try_from(n).ok(),
            None => n.as_f64().and_then(float_to_u32),
        },
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            s.parse::<u32>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_u32))
        }
        _ => None,
    })
}

fn float_to_u32(f: f64) -> Option<u32> {
    (f.is_finite() && (0.0..=u32::MAX as f64).contains(&f)).then(|| f.round() as u32)
}

/// `null` or a non-string scalar reads as an empty string.
fn null_as_empty<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(de)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

/// Hardcoded display values used whenever the network gives us nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Fallback {
    pub track: TrackMetadata,
    pub station: StationSnapshot,
    /// Artist shown when a source names a title but no artist.
    pub artist_label: String,
    pub logo_url: String,
}

impl Fallback {
    pub fn from_station(station: &StationConfig) -> Self {
        Self {
            track: TrackMetadata {
                title: station.display_name.clone(),
                artist: station.tagline.clone(),
                album: Some(station.live_album.clone()),
                artwork: Some(station.logo_url.clone()),
            },
            station: StationSnapshot {
                name: station.name.clone(),
                description: station.display_name.clone(),
                logo: Some(station.logo_url.clone()),
                ..StationSnapshot::default()
            },
            artist_label: station.name.clone(),
            logo_url: station.logo_url.clone(),
        }
    }
}

impl Default for Fallback {
    fn default() -> Self {
        Self::from_station(&StationConfig::default())
    }
}

/// The merged "now playing" view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub track: TrackMetadata,
    pub station: StationSnapshot,
    pub playlist: Vec<PlaylistEntry>,
    /// Transient banner shown when a whole cycle failed.
    pub notice: Option<String>,
    pub last_update: Option<DateTime<Local>>,
    /// True until the first cycle has settled.
    pub loading: bool,
    /// True while a manually requested cycle runs.
    pub refreshing: bool,
}

impl NowPlaying {
    pub fn initial(fallback: &Fallback) -> Self {
        Self {
            track: TrackMetadata {
                title: fallback.track.title.clone(),
                artist: fallback.track.artist.clone(),
                album: None,
                artwork: None,
            },
            station: fallback.station.clone(),
            playlist: Vec::new(),
            notice: None,
            last_update: None,
            loading: true,
            refreshing: false,
        }
    }

    pub fn display_title<'a>(&'a self, fallback: &'a Fallback) -> &'a str {
        first_non_empty(&[self.track.title.as_str(), self.station.name.as_str()])
            .unwrap_or(fallback.track.title.as_str())
    }

    pub fn display_artist<'a>(&'a self, fallback: &'a Fallback) -> &'a str {
        first_non_empty(&[self.track.artist.as_str()]).unwrap_or(fallback.track.artist.as_str())
    }

    pub fn display_artwork<'a>(&'a self, fallback: &'a Fallback) -> &'a str {
        let track = self.track.artwork.as_deref().unwrap_or("");
        let logo = self.station.logo.as_deref().unwrap_or("");
        first_non_empty(&[track, logo]).unwrap_or(fallback.logo_url.as_str())
    }

    pub fn listeners_label(&self) -> Option<String> {
        self.station
            .listeners
            .filter(|n| *n > 0)
            .map(|n| format!("{} auditeurs", n))
    }
}

fn first_non_empty<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().copied().find(|s| !s.trim().is_empty())
}

/// `245` → `"4:05"`
pub fn format_duration(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Local `HH:MM` for a playlist timestamp, or an empty string when the
/// provider sent something unparsable.
pub fn format_played_at(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_default()
}
