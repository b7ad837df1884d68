use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Branding and identity of the one station this client serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_station_name")]
    pub name: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_tagline")]
    pub tagline: String,
    /// Album label shown on the fallback track.
    #[serde(default = "default_live_album")]
    pub live_album: String,
    #[serde(default = "default_logo_url")]
    pub logo_url: String,
    /// Zeno.fm mount identifier, shared by the stream and status endpoints.
    #[serde(default = "default_mount_id")]
    pub mount_id: String,
}

/// Metadata endpoints.  Relative paths (starting with `/`) are resolved
/// against the local proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_primary_url")]
    pub primary_url: String,
    #[serde(default = "default_text_url")]
    pub text_url: String,
    /// Tried in order; the first one that answers wins.
    #[serde(default = "default_status_urls")]
    pub status_urls: Vec<String>,
    /// Stream mount probed for embedded ICY tags.
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Stream candidates in priority order.
    #[serde(default = "default_stream_urls")]
    pub stream_urls: Vec<String>,
    /// 0..=100
    #[serde(default = "default_volume")]
    pub default_volume: u8,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Use the built-in HLS client for `.m3u8` candidates.  When disabled
    /// the manifest is handed to mpv directly.
    #[serde(default = "default_true")]
    pub adaptive_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Local stand-in for the rewrites a browser build gets from its dev server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default = "default_stream_upstream")]
    pub stream_upstream: String,
    #[serde(default = "default_api_upstream")]
    pub api_upstream: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Durable key/value file holding the favorite flag.
    #[serde(default = "default_storage_file")]
    pub storage_file: PathBuf,
    #[serde(default = "default_favorite_key")]
    pub favorite_key: String,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            display_name: default_display_name(),
            tagline: default_tagline(),
            live_album: default_live_album(),
            logo_url: default_logo_url(),
            mount_id: default_mount_id(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            primary_url: default_primary_url(),
            text_url: default_text_url(),
            status_urls: default_status_urls(),
            probe_url: default_probe_url(),
            poll_interval_secs: default_poll_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            stream_urls: default_stream_urls(),
            default_volume: default_volume(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            adaptive_enabled: true,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_proxy_port(),
            stream_upstream: default_stream_upstream(),
            api_upstream: default_api_upstream(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            storage_file: default_storage_file(),
            favorite_key: default_favorite_key(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_station_name() -> String {
    "Radio Zigomar".to_string()
}

fn default_display_name() -> String {
    "Radio Zigomar 98.3 FM".to_string()
}

fn default_tagline() -> String {
    "En direct depuis la Tunisie".to_string()
}

fn default_live_album() -> String {
    "Streaming Live".to_string()
}

fn default_logo_url() -> String {
    "https://cdn.instant.audio/images/logos/ecouterradioenligne-com/zigomar.png".to_string()
}

fn default_mount_id() -> String {
    "ljjignydycktv".to_string()
}

fn default_primary_url() -> String {
    "https://api.instant.audio/data/streams/37/zigomar".to_string()
}

fn default_text_url() -> String {
    format!("/zeno-api/mounts/metadata/subscribe/{}", default_mount_id())
}

fn default_status_urls() -> Vec<String> {
    vec![
        "/zeno-stream/status-json.xsl".to_string(),
        format!("/zeno-stream/{}/status-json.xsl", default_mount_id()),
    ]
}

fn default_probe_url() -> String {
    format!("/zeno-stream/{}", default_mount_id())
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_stream_urls() -> Vec<String> {
    vec![
        format!("/zeno-stream/{}.m3u8", default_mount_id()),
        format!("/zeno-stream/{}", default_mount_id()),
    ]
}

fn default_volume() -> u8 {
    70
}

fn default_attempt_timeout_secs() -> u64 {
    15
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8983
}

fn default_proxy_port() -> u16 {
    8984
}

fn default_stream_upstream() -> String {
    "https://stream.zeno.fm".to_string()
}

fn default_api_upstream() -> String {
    "https://api.zeno.fm".to_string()
}

fn default_storage_file() -> PathBuf {
    platform::data_dir().join("storage.json")
}

fn default_favorite_key() -> String {
    "radio-zigomar-favorite".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Base URL that relative endpoint paths are resolved against.
    pub fn proxy_base(&self) -> String {
        format!("http://{}:{}", self.http.bind_address, self.proxy.port)
    }

    /// Resolve a configured endpoint: absolute URLs pass through, paths are
    /// joined onto the local proxy.
    pub fn resolve_url(&self, url: &str) -> String {
        resolve_against(&self.proxy_base(), url)
    }
}

pub fn resolve_against(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
    }
}
