use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tracing::debug;
use zigomar_proto::merge::{SourceReport, SourceResult, StationPatch, TrackPatch};
use zigomar_proto::model::{lenient_u32, PlaylistEntry};

use super::get_json;

#[derive(Debug, Deserialize)]
struct StreamInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    logo: Option<String>,
    #[serde(default)]
    current_song: Option<CurrentSong>,
    #[serde(default, deserialize_with = "lenient_u32")]
    listeners: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    bitrate: Option<u32>,
    #[serde(default)]
    genre: Option<String>,
    #[serde(default, deserialize_with = "lenient_playlist")]
    playlist: Option<Vec<PlaylistEntry>>,
}

/// An entry that still fails to decode is dropped; the rest of the list and
/// the station fields survive.
fn lenient_playlist<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<PlaylistEntry>>, D::Error> {
    let entries = match Option::<serde_json::Value>::deserialize(de)? {
        Some(serde_json::Value::Array(entries)) => entries,
        _ => return Ok(None),
    };
    let playlist = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("instant.audio: skipping playlist entry: {}", e);
                None
            }
        })
        .collect();
    Ok(Some(playlist))
}

#[derive(Debug, Deserialize)]
struct CurrentSong {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    artwork: Option<String>,
}

/// Station JSON from instant.audio: station fields always, the current song
/// and playlist when the provider has them.
pub async fn fetch_primary(client: &Client, url: &str) -> SourceResult {
    let info: StreamInfo = get_json(client, url).await?;
    Ok(into_report(info))
}

fn into_report(info: StreamInfo) -> SourceReport {
    let station = StationPatch {
        name: info.name,
        description: info.description,
        logo: info.logo,
        listeners: info.listeners,
        bitrate: info.bitrate,
        genre: info.genre,
    };
    let track = info.current_song.map(|song| TrackPatch {
        title: song.title,
        artist: song.artist,
        album: song.album,
        artwork: song.artwork,
    });
    SourceReport::Primary {
        station,
        track,
        playlist: info.playlist,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{build_client, testing};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use zigomar_proto::error::SourceError;

    const BODY: &str = r#"{
        "name": "Radio Zigomar",
        "description": "La radio de la Tunisie",
        "logo": "https://cdn.example/zigomar.png",
        "listeners": 118,
        "bitrate": 128,
        "current_song": {"title": "Aïcha", "artist": "Khaled"},
        "playlist": [
            {"title": "Aïcha", "artist": "Khaled", "played_at": "2024-05-01T12:34:00Z", "duration": 245},
            {"title": "Didi", "artist": "Khaled", "played_at": "2024-05-01T12:30:00Z"}
        ]
    }"#;

    #[tokio::test]
    async fn test_fetch_primary_full_payload() {
        let base = testing::serve(Router::new().route("/zigomar", get(|| async { BODY }))).await;
        let client = build_client().unwrap();

        let report = fetch_primary(&client, &format!("{}/zigomar", base)).await.unwrap();
        match report {
            SourceReport::Primary {
                station,
                track,
                playlist,
            } => {
                assert_eq!(station.name.as_deref(), Some("Radio Zigomar"));
                assert_eq!(station.listeners, Some(118));
                assert!(station.genre.is_none());
                let track = track.unwrap();
                assert_eq!(track.title.as_deref(), Some("Aïcha"));
                assert!(track.album.is_none());
                let playlist = playlist.unwrap();
                assert_eq!(playlist.len(), 2);
                assert_eq!(playlist[0].duration, Some(245));
                assert_eq!(playlist[1].duration, None);
            }
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_primary_loose_payload_keeps_title_and_playlist() {
        const LOOSE: &str = r#"{
            "name": "Radio Zigomar",
            "listeners": "118",
            "bitrate": 128.0,
            "current_song": {"title": "Aïcha", "artist": "Khaled"},
            "playlist": [
                {"title": null, "artist": "Khaled", "played_at": "2024-05-01T12:34:00Z", "duration": 245.0},
                {"title": "Didi", "artist": "Khaled", "played_at": "2024-05-01T12:30:00Z", "duration": "212"},
                "not an entry",
                {"title": "Wahran", "artist": "Khaled", "played_at": "2024-05-01T12:26:00Z"}
            ]
        }"#;
        let base = testing::serve(Router::new().route("/zigomar", get(|| async { LOOSE }))).await;
        let client = build_client().unwrap();

        let report = fetch_primary(&client, &format!("{}/zigomar", base)).await.unwrap();
        let SourceReport::Primary {
            station,
            track,
            playlist,
        } = report
        else {
            panic!("expected a primary report");
        };
        assert_eq!(station.listeners, Some(118));
        assert_eq!(station.bitrate, Some(128));
        assert_eq!(track.unwrap().title.as_deref(), Some("Aïcha"));

        let playlist = playlist.unwrap();
        assert_eq!(playlist.len(), 3);
        assert_eq!(playlist[0].title, "");
        assert_eq!(playlist[0].duration, Some(245));
        assert_eq!(playlist[1].duration, Some(212));
        assert_eq!(playlist[2].title, "Wahran");
    }

    #[tokio::test]
    async fn test_fetch_primary_without_song() {
        let base = testing::serve(Router::new().route(
            "/zigomar",
            get(|| async { r#"{"name":"Radio Zigomar","description":"x"}"# }),
        ))
        .await;
        let client = build_client().unwrap();

        let report = fetch_primary(&client, &format!("{}/zigomar", base)).await.unwrap();
        assert!(matches!(
            report,
            SourceReport::Primary {
                track: None,
                playlist: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fetch_primary_non_success_status() {
        let base = testing::serve(Router::new().route(
            "/zigomar",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let client = build_client().unwrap();

        let err = fetch_primary(&client, &format!("{}/zigomar", base)).await.unwrap_err();
        assert_eq!(err, SourceError::Status(503));
    }
}
