/// Upstream proxy for the Zeno stream and API hosts.
///
///   GET /zeno-stream/*path  →  <stream_upstream>/<path>
///   GET /zeno-api/*path     →  <api_upstream>/<path>
///
/// Each request opens one upstream connection and streams the body straight
/// through, so ICY framing and live audio reach the caller unchanged.  When
/// the caller hangs up the upstream fetch is dropped with it.
use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use reqwest::{Client, Url};
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use zigomar_proto::config::{resolve_against, ProxyConfig};

/// Request headers passed on to the upstream.
const FORWARDED_REQUEST: [&str; 3] = ["icy-metadata", "accept", "range"];

#[derive(Clone)]
pub struct ProxyState {
    client: Client,
    stream: Upstream,
    api: Upstream,
}

#[derive(Clone)]
struct Upstream {
    base: String,
    origin: HeaderValue,
}

impl Upstream {
    fn parse(base: &str) -> anyhow::Result<Self> {
        let url = Url::parse(base)?;
        let origin = HeaderValue::from_str(&url.origin().ascii_serialization())?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            origin,
        })
    }

    fn target(&self, path: &str, query: Option<&str>) -> String {
        let mut url = resolve_against(&self.base, path);
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }
        url
    }
}

impl ProxyState {
    pub fn new(client: Client, config: &ProxyConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            stream: Upstream::parse(&config.stream_upstream)?,
            api: Upstream::parse(&config.api_upstream)?,
        })
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/zeno-stream/*path", get(zeno_stream))
        .route("/zeno-api/*path", get(zeno_api))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn zeno_stream(
    State(state): State<ProxyState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    forward(&state.client, &state.stream, &path, query.as_deref(), &headers).await
}

async fn zeno_api(
    State(state): State<ProxyState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    forward(&state.client, &state.api, &path, query.as_deref(), &headers).await
}

async fn forward(
    client: &Client,
    upstream: &Upstream,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Response {
    let url = upstream.target(path, query);
    debug!("proxy: → {}", url);

    let mut request = client.get(&url).header("origin", upstream.origin.clone());
    for name in FORWARDED_REQUEST {
        if let Some(value) = headers.get(name) {
            request = request.header(name, value.clone());
        }
    }

    let upstream_resp = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            warn!("proxy: upstream connect failed for {}: {}", url, e);
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let status = upstream_resp.status();
    if !status.is_success() {
        info!("proxy: upstream returned {} for {}", status, url);
    }

    let mut forwarded = HeaderMap::new();
    for (name, value) in upstream_resp.headers() {
        let name_str = name.as_str();
        if name_str.starts_with("icy-")
            || name_str == "content-type"
            || name_str == "cache-control"
        {
            forwarded.append(name.clone(), value.clone());
        }
    }

    let reader = StreamReader::new(
        upstream_resp
            .bytes_stream()
            .map(|result| result.map_err(std::io::Error::other)),
    );
    let mut response = Response::new(Body::from_stream(ReaderStream::new(reader)));
    *response.status_mut() = status;
    response.headers_mut().extend(forwarded);
    response
}

/// Bind the proxy listener.  Done before any source polls through it.
pub async fn bind(bind_address: &str, port: u16) -> anyhow::Result<tokio::net::TcpListener> {
    let addr = format!("{}:{}", bind_address, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind upstream proxy on {}: {}", addr, e))?;
    info!("Upstream proxy listening on http://{}", addr);
    Ok(listener)
}

pub fn start_server(listener: tokio::net::TcpListener, state: ProxyState) -> tokio::task::JoinHandle<()> {
    let app = router(state);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Upstream proxy error: {}", e);
        }
    })
}
