//! Session configuration, console status, and the records carried on the
//! outward event streams.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Everything needed to open a mirror session for one console.
///
/// Immutable for the lifetime of the session; `address` is the session key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Opaque session id chosen by the host (also keys the relay and playback).
    pub id: String,
    /// Console network address.
    pub address: String,
    /// Destination directory for capture files.
    pub folder: PathBuf,
    /// Console port override; the default console port is used when absent.
    #[serde(default)]
    pub port: Option<u16>,
    /// Forward the raw stream to remote spectators.
    #[serde(default)]
    pub relay_enabled: bool,
    /// Playback consumers should play files in real-time mode.
    #[serde(default)]
    pub real_time: bool,
    /// Scene-switch integration, if any.
    #[serde(default)]
    pub scene_switch: Option<SceneSwitchSettings>,
}

/// Connection settings for an OBS WebSocket scene-switch integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSwitchSettings {
    pub host: String,
    #[serde(default = "default_obs_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    /// Scene shown while a game is live.
    pub live_scene: String,
    /// Scene shown once a game has ended.
    pub idle_scene: String,
}

fn default_obs_port() -> u16 {
    crate::DEFAULT_OBS_PORT
}

/// Console transport status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Partial status record for one console. Any subset of fields may be set.
///
/// `file_name` distinguishes "unchanged" (`None`) from "no file open"
/// (`Some(None)`), which serializes as an explicit `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConnectionStatus>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub file_name: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl StatusUpdate {
    pub fn status(status: ConnectionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn file_name(name: Option<String>) -> Self {
        Self {
            file_name: Some(name),
            ..Default::default()
        }
    }

    pub fn nickname(nickname: impl Into<String>) -> Self {
        Self {
            nickname: Some(nickname.into()),
            ..Default::default()
        }
    }

    /// Final record sent after a session is torn down.
    pub fn disconnected() -> Self {
        Self {
            status: Some(ConnectionStatus::Disconnected),
            file_name: Some(None),
            nickname: None,
        }
    }
}

/// A status change for the console at `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub address: String,
    pub info: StatusUpdate,
}

/// A capture file that a playback consumer should open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReady {
    pub session_id: String,
    /// Full path of the file, or empty when no file is being written yet.
    pub file_path: String,
    pub real_time: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn disconnected_update_serializes_explicit_null_file() {
        let value = serde_json::to_value(StatusUpdate::disconnected()).unwrap();
        assert_eq!(value, json!({"status": "disconnected", "fileName": null}));
    }

    #[test]
    fn partial_update_omits_unset_fields() {
        let value = serde_json::to_value(StatusUpdate::nickname("P1")).unwrap();
        assert_eq!(value, json!({"nickname": "P1"}));
    }

    #[test]
    fn null_file_name_survives_deserialization() {
        let update: StatusUpdate = serde_json::from_value(json!({"fileName": null})).unwrap();
        assert_eq!(update.file_name, Some(None));

        let update: StatusUpdate = serde_json::from_value(json!({})).unwrap();
        assert_eq!(update.file_name, None);
    }

    #[test]
    fn session_config_from_host_json() {
        let config: SessionConfig = serde_json::from_value(json!({
            "id": "1",
            "address": "10.0.0.5",
            "folder": "/cap",
            "relayEnabled": true,
            "sceneSwitch": {
                "host": "127.0.0.1",
                "liveScene": "Game",
                "idleScene": "Crowd"
            }
        }))
        .unwrap();
        assert_eq!(config.port, None);
        assert!(config.relay_enabled);
        assert!(!config.real_time);
        let switch = config.scene_switch.unwrap();
        assert_eq!(switch.port, crate::DEFAULT_OBS_PORT);
        assert_eq!(switch.password, None);
    }

    #[test]
    fn status_display_matches_wire_name() {
        assert_eq!(ConnectionStatus::Connecting.to_string(), "connecting");
        assert_eq!(
            serde_json::to_value(ConnectionStatus::Connected).unwrap(),
            json!("connected")
        );
    }
}
