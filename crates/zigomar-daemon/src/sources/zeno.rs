use reqwest::Client;
use serde::Deserialize;
use zigomar_proto::error::SourceError;
use zigomar_proto::icy::parse_icy;
use zigomar_proto::merge::{SourceReport, SourceResult, TrackPatch};
use zigomar_proto::model::Fallback;

use super::get_json;

#[derive(Debug, Deserialize)]
struct MountMetadata {
    #[serde(default, rename = "streamTitle")]
    stream_title: Option<String>,
}

/// Zeno mount metadata: a single `"<artist> - <title>"` string.
pub async fn fetch_secondary_text(client: &Client, url: &str, fallback: &Fallback) -> SourceResult {
    let meta: MountMetadata = get_json(client, url).await?;
    let stream_title = meta
        .stream_title
        .filter(|t| !t.trim().is_empty())
        .ok_or(SourceError::MissingField("streamTitle"))?;

    Ok(SourceReport::SecondaryText {
        track: split_stream_title(&stream_title, fallback),
    })
}

fn split_stream_title(stream_title: &str, fallback: &Fallback) -> TrackPatch {
    let (title, artist) = parse_icy(stream_title);
    TrackPatch {
        title: title.or_else(|| Some(stream_title.trim().to_string())),
        artist: artist.or_else(|| Some(fallback.artist_label.clone())),
        album: None,
        artwork: Some(fallback.logo_url.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{build_client, testing};
    use axum::routing::get;
    use axum::Router;

    async fn serve_body(body: &'static str) -> String {
        let base = testing::serve(Router::new().route("/meta", get(move || async move { body }))).await;
        format!("{}/meta", base)
    }

    fn track(report: SourceReport) -> TrackPatch {
        match report {
            SourceReport::SecondaryText { track } => track,
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_artist_and_title_split() {
        let url = serve_body(r#"{"streamTitle":"Artist X - Song Y"}"#).await;
        let client = build_client().unwrap();
        let fb = Fallback::default();

        let track = track(fetch_secondary_text(&client, &url, &fb).await.unwrap());
        assert_eq!(track.artist.as_deref(), Some("Artist X"));
        assert_eq!(track.title.as_deref(), Some("Song Y"));
        assert_eq!(track.artwork.as_deref(), Some(fb.logo_url.as_str()));
    }

    #[tokio::test]
    async fn test_no_delimiter_uses_station_label() {
        let url = serve_body(r#"{"streamTitle":"NoDelimiterHere"}"#).await;
        let client = build_client().unwrap();
        let fb = Fallback::default();

        let track = track(fetch_secondary_text(&client, &url, &fb).await.unwrap());
        assert_eq!(track.title.as_deref(), Some("NoDelimiterHere"));
        assert_eq!(track.artist.as_deref(), Some("Radio Zigomar"));
    }

    #[tokio::test]
    async fn test_missing_or_empty_field_fails() {
        let client = build_client().unwrap();
        let fb = Fallback::default();

        let url = serve_body(r#"{"other":1}"#).await;
        assert_eq!(
            fetch_secondary_text(&client, &url, &fb).await.unwrap_err(),
            SourceError::MissingField("streamTitle")
        );

        let url = serve_body(r#"{"streamTitle":""}"#).await;
        assert_eq!(
            fetch_secondary_text(&client, &url, &fb).await.unwrap_err(),
            SourceError::MissingField("streamTitle")
        );
    }

    #[test]
    fn test_split_on_first_delimiter_only() {
        let fb = Fallback::default();
        let track = split_stream_title("Artist X - Song Y - Live", &fb);
        assert_eq!(track.artist.as_deref(), Some("Artist X"));
        assert_eq!(track.title.as_deref(), Some("Song Y - Live"));
    }
}
