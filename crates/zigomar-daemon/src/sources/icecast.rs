use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use zigomar_proto::error::SourceError;
use zigomar_proto::merge::{SourceReport, SourceResult, StationPatch, TrackPatch};
use zigomar_proto::model::{lenient_u32, Fallback};

use super::get_json;

#[derive(Debug, Deserialize)]
struct StatusDocument {
    #[serde(default)]
    icestats: Option<IceStats>,
}

#[derive(Debug, Deserialize)]
struct IceStats {
    #[serde(default)]
    source: Option<Mounts>,
}

/// Icecast emits a bare object for a single mount and an array otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Mounts {
    Many(Vec<MountStatus>),
    One(Box<MountStatus>),
}

#[derive(Debug, Default, Deserialize)]
struct MountStatus {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    yp_currently_playing: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    listeners: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    bitrate: Option<u32>,
    #[serde(default)]
    genre: Option<String>,
    #[serde(default)]
    server_name: Option<String>,
    #[serde(default)]
    server_description: Option<String>,
    #[serde(default)]
    listenurl: Option<String>,
}

impl Mounts {
    fn pick(self, mount_id: &str) -> Option<MountStatus> {
        match self {
            Mounts::Many(mut all) => {
                let idx = all
                    .iter()
                    .position(|m| {
                        m.listenurl
                            .as_deref()
                            .is_some_and(|u| u.trim_end_matches('/').ends_with(mount_id))
                    })
                    .unwrap_or(0);
                (idx < all.len()).then(|| all.swap_remove(idx))
            }
            Mounts::One(m) => Some(*m),
        }
    }
}

/// Icecast status JSON.  Endpoints are tried in order; the first that answers
/// with a usable mount wins.
pub async fn fetch_secondary_status(
    client: &Client,
    urls: &[String],
    mount_id: &str,
    fallback: &Fallback,
) -> SourceResult {
    for url in urls {
        match get_json::<StatusDocument>(client, url).await {
            Ok(doc) => {
                let mount = doc
                    .icestats
                    .and_then(|stats| stats.source)
                    .and_then(|mounts| mounts.pick(mount_id));
                match mount {
                    Some(mount) => return Ok(into_report(mount, fallback)),
                    None => debug!("icecast: {} has no source block", url),
                }
            }
            Err(e) => debug!("icecast: {} failed: {}", url, e),
        }
    }
    Err(SourceError::Exhausted(urls.len()))
}

fn into_report(mount: MountStatus, fallback: &Fallback) -> SourceReport {
    let title = non_blank(mount.title).or_else(|| non_blank(mount.yp_currently_playing));
    let artist = non_blank(mount.artist).unwrap_or_else(|| fallback.artist_label.clone());

    SourceReport::SecondaryStatus {
        track: TrackPatch {
            title,
            artist: Some(artist),
            album: None,
            artwork: Some(fallback.logo_url.clone()),
        },
        station: StationPatch {
            name: Some(non_blank(mount.server_name).unwrap_or_else(|| fallback.station.name.clone())),
            description: Some(
                non_blank(mount.server_description)
                    .unwrap_or_else(|| fallback.station.description.clone()),
            ),
            logo: None,
            listeners: mount.listeners,
            bitrate: mount.bitrate,
            genre: mount.genre,
        },
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}
