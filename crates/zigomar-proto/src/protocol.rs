use serde::{Deserialize, Serialize};

use crate::model::{Fallback, NowPlaying};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check it in `Hello` and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Play when idle, pause when playing.
    TogglePlay,
    Pause,
    /// 0..=100
    SetVolume { value: u8 },
    ToggleMute,
    ToggleFavorite,
    /// Run a metadata cycle now.
    Refresh,
    GetState,
}

/// Messages sent from the daemon to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: DaemonState,
    },
    State {
        data: DaemonState,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Connection indicator, derived only from media element events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "Connexion...",
            Self::Connected => "Connecté",
            Self::Error => "Erreur",
        }
    }
}

/// Playback controller phase.
///
/// Transitions:
///   Idle | Failed -> Attempting -> Playing | Failed
///   Playing -> Idle (pause, end, element error)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlayerPhase {
    #[default]
    Idle,
    Attempting,
    Playing,
    /// Every candidate failed.  Behaves like `Idle` for the next play.
    Failed,
}

/// Snapshot of the playback controller published to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerView {
    pub phase: PlayerPhase,
    /// An attempt is in flight; new play requests are refused.
    pub loading: bool,
    /// 0..=100
    pub volume: u8,
    pub muted: bool,
    /// What the speaker icon shows: muted, or volume at zero.
    pub icon_muted: bool,
    pub connection: ConnectionState,
    pub error: Option<String>,
    pub active_url: Option<String>,
}

impl Default for PlayerView {
    fn default() -> Self {
        Self {
            phase: PlayerPhase::Idle,
            loading: false,
            volume: 70,
            muted: false,
            icon_muted: false,
            connection: ConnectionState::Connecting,
            error: None,
            active_url: None,
        }
    }
}

/// Full state of the daemon.  `rev` is a monotonically increasing counter
/// incremented every time the state changes.  Clients can use it to detect
/// missed updates and request a resync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonState {
    /// Monotonic revision counter, incremented on every state change.
    #[serde(default)]
    pub rev: u64,
    pub now_playing: NowPlaying,
    pub player: PlayerView,
    pub favorite: bool,
}

impl Default for DaemonState {
    fn default() -> Self {
        Self {
            rev: 0,
            now_playing: NowPlaying::initial(&Fallback::default()),
            player: PlayerView::default(),
            favorite: false,
        }
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encode_decode() {
        let msg = Message::Command(Command::SetVolume { value: 35 });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::SetVolume { value }) => assert_eq!(value, 35),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_hello_carries_now_playing() {
        let state = DaemonState {
            rev: 42,
            favorite: true,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            daemon_rev: 42,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                daemon_rev,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(daemon_rev, 42);
                assert!(state.favorite);
                assert_eq!(state.now_playing.track.title, "Radio Zigomar 98.3 FM");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let encoded = Message::Command(Command::Refresh).encode().unwrap();
        assert!(Message::decode(&encoded[..3]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_connection_labels() {
        assert_eq!(ConnectionState::default().label(), "Connexion...");
        assert_eq!(ConnectionState::Connected.label(), "Connecté");
        assert_eq!(ConnectionState::Error.label(), "Erreur");
    }
}
