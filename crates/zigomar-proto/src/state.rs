use crate::merge::{reduce, CycleResults};
use crate::model::{Fallback, NowPlaying};
use crate::protocol::{DaemonState, PlayerView};
use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Durable key/value file, laid out like browser storage: a flat JSON object
/// of string values.  Only the favorite key is ever written; other keys found
/// in the file are preserved.
#[derive(Debug, Clone)]
pub struct FavoriteStore {
    path: PathBuf,
    key: String,
}

impl FavoriteStore {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The flag is set only when the key holds the literal `"true"`.
    pub async fn read(&self) -> anyhow::Result<bool> {
        let map = self.load_map().await?;
        Ok(map.get(&self.key).map(String::as_str) == Some("true"))
    }

    pub async fn write(&self, favorite: bool) -> anyhow::Result<()> {
        let mut map = self.load_map().await?;
        if favorite {
            map.insert(self.key.clone(), "true".to_string());
        } else {
            map.remove(&self.key);
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Sibling temp file renamed into place
        let json = serde_json::to_string_pretty(&map)?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn load_map(&self) -> anyhow::Result<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct StateManager {
    state: Arc<RwLock<DaemonState>>,
    favorites: FavoriteStore,
}

impl StateManager {
    /// Build the initial state.  The favorite flag is read from storage here;
    /// an unreadable file counts as "not favorited".
    pub async fn new(fallback: &Fallback, player: PlayerView, favorites: FavoriteStore) -> Self {
        let favorite = match favorites.read().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", favorites.path().display(), e);
                false
            }
        };

        let state = DaemonState {
            rev: 1,
            now_playing: NowPlaying::initial(fallback),
            player,
            favorite,
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            favorites,
        }
    }

    pub async fn get_state(&self) -> DaemonState {
        self.state.read().await.clone()
    }

    pub async fn rev(&self) -> u64 {
        self.state.read().await.rev
    }

    /// Merge a settled cycle into the display model.
    pub async fn apply_cycle(&self, results: &CycleResults, fallback: &Fallback) -> NowPlaying {
        let mut state = self.state.write().await;
        let next = reduce(&state.now_playing, results, fallback, Local::now());
        state.now_playing = next.clone();
        state.rev += 1;
        next
    }

    pub async fn set_refreshing(&self, refreshing: bool) {
        let mut state = self.state.write().await;
        if state.now_playing.refreshing != refreshing {
            state.now_playing.refreshing = refreshing;
            state.rev += 1;
        }
    }

    /// Returns whether anything changed.
    pub async fn set_player(&self, player: PlayerView) -> bool {
        let mut state = self.state.write().await;
        if state.player == player {
            return false;
        }
        state.player = player;
        state.rev += 1;
        true
    }

    pub async fn favorite(&self) -> bool {
        self.state.read().await.favorite
    }

    /// Flip the persisted flag, then read it back.  The returned value is
    /// what storage holds, not what was intended.
    pub async fn toggle_favorite(&self) -> anyhow::Result<bool> {
        let mut state = self.state.write().await;
        let current = self.favorites.read().await?;
        self.favorites.write(!current).await?;
        let persisted = self.favorites.read().await?;
        state.favorite = persisted;
        state.rev += 1;
        Ok(persisted)
    }
}
