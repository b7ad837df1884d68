use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tracing::debug;
use zigomar_proto::error::SourceError;
use zigomar_proto::icy::{parse_icy, parse_stream_title, IcyDemuxer};
use zigomar_proto::merge::{SourceReport, SourceResult, TrackPatch};
use zigomar_proto::model::Fallback;

use super::request_error;

/// Open the stream with `Icy-MetaData: 1`, read up to the first metadata
/// block, and hang up.  The whole exchange is bounded by `deadline`; the
/// connection is dropped on every path.
pub async fn probe_stream_tags(
    client: &Client,
    url: &str,
    deadline: Duration,
    fallback: &Fallback,
) -> SourceResult {
    let stream_title = tokio::time::timeout(deadline, first_stream_title(client, url))
        .await
        .map_err(|_| SourceError::Timeout(deadline.as_millis() as u64))??;

    let mut track = TrackPatch::default();
    if let Some(raw) = stream_title {
        let (title, artist) = parse_icy(&raw);
        track.title = title;
        track.artist = artist;
        if !track.is_empty() {
            track.artwork = Some(fallback.logo_url.clone());
        }
    }
    Ok(SourceReport::StreamTags { track })
}

async fn first_stream_title(client: &Client, url: &str) -> Result<Option<String>, SourceError> {
    let resp = client
        .get(url)
        .header("Icy-MetaData", "1")
        .send()
        .await
        .map_err(request_error)?;

    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }

    let metaint = resp
        .headers()
        .get("icy-metaint")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0);
    let Some(metaint) = metaint else {
        debug!("icy probe: {} sent no icy-metaint", url);
        return Ok(None);
    };

    let mut demux = IcyDemuxer::new(metaint);
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(request_error)?;
        if let Some(block) = demux.push(&chunk).into_iter().next() {
            debug!(
                "icy probe: metadata after {} audio bytes",
                demux.audio_bytes()
            );
            return Ok(parse_stream_title(&block));
        }
        if demux.past_first_block() {
            debug!("icy probe: {} first metadata slot was empty", url);
            return Ok(None);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{build_client, testing};
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::HeaderMap;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;

    const METAINT: usize = 16;

    fn icy_body(title: &str) -> Vec<u8> {
        let mut meta = format!("StreamTitle='{}';", title).into_bytes();
        let padded = meta.len().div_ceil(16) * 16;
        meta.resize(padded, 0);

        let mut body = vec![0u8; METAINT];
        body.push((padded / 16) as u8);
        body.extend(meta);
        body.extend(vec![0u8; METAINT]);
        body
    }

    async fn icy_stream(headers: HeaderMap) -> Response {
        if headers.get("icy-metadata").map(|v| v.as_bytes()) != Some(b"1") {
            return (axum::http::StatusCode::BAD_REQUEST, "no icy").into_response();
        }
        Response::builder()
            .header(CONTENT_TYPE, "audio/mpeg")
            .header("icy-metaint", METAINT.to_string())
            .body(Body::from(icy_body("Lotfi Bouchnak - Ya Lella")))
            .unwrap()
    }

    #[tokio::test]
    async fn test_probe_reads_first_stream_title() {
        let base = testing::serve(Router::new().route("/mount", get(icy_stream))).await;
        let client = build_client().unwrap();
        let fb = Fallback::default();

        let report = probe_stream_tags(&client, &format!("{}/mount", base), Duration::from_secs(5), &fb)
            .await
            .unwrap();
        let SourceReport::StreamTags { track } = report else {
            panic!("unexpected report");
        };
        assert_eq!(track.artist.as_deref(), Some("Lotfi Bouchnak"));
        assert_eq!(track.title.as_deref(), Some("Ya Lella"));
        assert_eq!(track.artwork.as_deref(), Some(fb.logo_url.as_str()));
    }

    #[tokio::test]
    async fn test_probe_without_metaint_settles_empty() {
        let base = testing::serve(Router::new().route(
            "/mount",
            get(|| async { ([(CONTENT_TYPE, "audio/mpeg")], vec![0u8; 64]) }),
        ))
        .await;
        let client = build_client().unwrap();

        let report = probe_stream_tags(
            &client,
            &format!("{}/mount", base),
            Duration::from_secs(5),
            &Fallback::default(),
        )
        .await
        .unwrap();
        let SourceReport::StreamTags { track } = report else {
            panic!("unexpected report");
        };
        assert!(track.is_empty());
        assert!(track.artwork.is_none());
    }

    #[tokio::test]
    async fn test_stream_tags_hang_up_after_empty_first_slot() {
        // Empty first slot, then audio that never ends.
        async fn endless() -> Response {
            let mut head = vec![0u8; METAINT];
            head.push(0);
            let first = futures_util::stream::iter([Ok::<_, std::io::Error>(head)]);
            let audio = futures_util::stream::repeat_with(|| Ok::<_, std::io::Error>(vec![0u8; 1024]));
            Response::builder()
                .header("icy-metaint", METAINT.to_string())
                .body(Body::from_stream(first.chain(audio)))
                .unwrap()
        }
        let base = testing::serve(Router::new().route("/mount", get(endless))).await;
        let client = build_client().unwrap();

        let report = probe_stream_tags(
            &client,
            &format!("{}/mount", base),
            Duration::from_secs(5),
            &Fallback::default(),
        )
        .await
        .unwrap();
        let SourceReport::StreamTags { track } = report else {
            panic!("unexpected report");
        };
        assert!(track.is_empty());
    }

    #[tokio::test]
    async fn test_probe_times_out_on_silent_stream() {
        // Headers arrive, then the body never produces a byte.
        async fn silent() -> Response {
            let stream = futures_util::stream::pending::<Result<Vec<u8>, std::io::Error>>();
            Response::builder()
                .header("icy-metaint", "16")
                .body(Body::from_stream(stream))
                .unwrap()
        }
        let base = testing::serve(Router::new().route("/mount", get(silent))).await;
        let client = build_client().unwrap();

        let err = probe_stream_tags(
            &client,
            &format!("{}/mount", base),
            Duration::from_millis(200),
            &Fallback::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err, SourceError::Timeout(200));
    }
}
