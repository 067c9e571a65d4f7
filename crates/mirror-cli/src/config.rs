//! Mirror configuration at `~/.console-mirror/config.toml`.
//!
//! Lists the consoles to mirror and where their captures go. CLI flags
//! override the file's capture root and relay port.

use anyhow::{bail, Context, Result};
use mirror_core::{
    SceneSwitchSettings, SessionConfig, DEFAULT_OBS_PORT, DEFAULT_RELAY_BASE_PORT,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureSection,

    #[serde(default)]
    pub relay: RelaySection,

    /// One `[[console]]` table per console.
    #[serde(default, rename = "console")]
    pub consoles: Vec<ConsoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSection {
    /// Directory under which consoles without their own folder get one.
    #[serde(default = "default_capture_root")]
    pub root: String,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            root: default_capture_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_relay_base_port")]
    pub base_port: u16,

    /// Address relays listen on.
    #[serde(default = "default_relay_bind")]
    pub bind: String,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            base_port: default_relay_base_port(),
            bind: default_relay_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub address: String,
    pub id: String,
    /// Capture folder; defaults to `<capture root>/<id>`.
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub relay: bool,
    #[serde(default)]
    pub real_time: bool,
    /// Start mirroring as soon as the session is up.
    #[serde(default)]
    pub mirror: bool,
    #[serde(default)]
    pub scene_switch: Option<SceneSwitchEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSwitchEntry {
    #[serde(default = "default_obs_host")]
    pub host: String,
    #[serde(default = "default_obs_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    pub live_scene: String,
    pub idle_scene: String,
}

fn default_capture_root() -> String {
    "~/ConsoleMirror".to_string()
}

fn default_relay_base_port() -> u16 {
    DEFAULT_RELAY_BASE_PORT
}

fn default_relay_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_obs_host() -> String {
    "127.0.0.1".to_string()
}

fn default_obs_port() -> u16 {
    DEFAULT_OBS_PORT
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config at {}", path.display()))?;

        debug!(path = %path.display(), consoles = config.consoles.len(), "loaded config");
        Ok(config)
    }

    /// Reject entries the worker would refuse anyway, before anything starts.
    pub fn validate(&self) -> Result<()> {
        let mut addresses = HashSet::new();
        for console in &self.consoles {
            if console.address.trim().is_empty() {
                bail!("console entry with empty address");
            }
            if console.id.trim().is_empty() {
                bail!("console {} has an empty id", console.address);
            }
            if !addresses.insert(console.address.as_str()) {
                bail!("console {} is listed twice", console.address);
            }
            if console.relay && console.id.parse::<u16>().is_err() {
                bail!(
                    "console {} enables the relay but its id {:?} is not a port offset",
                    console.address,
                    console.id
                );
            }
        }
        Ok(())
    }
}

impl ConsoleEntry {
    pub fn session_config(&self, capture_root: &Path) -> SessionConfig {
        let folder = match &self.folder {
            Some(folder) => expand_tilde_str(folder),
            None => capture_root.join(&self.id),
        };
        SessionConfig {
            id: self.id.clone(),
            address: self.address.clone(),
            folder,
            port: self.port,
            relay_enabled: self.relay,
            real_time: self.real_time,
            scene_switch: self.scene_switch.as_ref().map(|s| SceneSwitchSettings {
                host: s.host.clone(),
                port: s.port,
                password: s.password.clone(),
                live_scene: s.live_scene.clone(),
                idle_scene: s.idle_scene.clone(),
            }),
        }
    }
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.capture.root, "~/ConsoleMirror");
        assert_eq!(cfg.relay.base_port, 666);
        assert_eq!(cfg.relay.bind, "0.0.0.0");
        assert!(cfg.consoles.is_empty());
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[capture]
root = "/srv/captures"

[relay]
base_port = 7000

[[console]]
address = "192.168.1.20"
id = "1"
relay = true
mirror = true

[console.scene_switch]
password = "hunter2"
live_scene = "Game"
idle_scene = "Crowd"

[[console]]
address = "192.168.1.21"
id = "viewer-b"
folder = "/mnt/usb"
port = 53742
real_time = true
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.capture.root, "/srv/captures");
        assert_eq!(cfg.relay.base_port, 7000);
        assert_eq!(cfg.consoles.len(), 2);

        let first = cfg.consoles[0].session_config(Path::new("/srv/captures"));
        assert_eq!(first.folder, PathBuf::from("/srv/captures/1"));
        assert!(first.relay_enabled);
        assert_eq!(first.port, None);
        let switch = first.scene_switch.unwrap();
        assert_eq!(switch.host, "127.0.0.1");
        assert_eq!(switch.port, 4455);
        assert_eq!(switch.password.as_deref(), Some("hunter2"));
        assert_eq!(switch.live_scene, "Game");
        assert!(cfg.consoles[0].mirror);

        let second = cfg.consoles[1].session_config(Path::new("/srv/captures"));
        assert_eq!(second.folder, PathBuf::from("/mnt/usb"));
        assert_eq!(second.port, Some(53742));
        assert!(second.real_time);
        assert!(second.scene_switch.is_none());
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let toml_str = r#"
[[console]]
address = "10.0.0.5"
id = "1"

[[console]]
address = "10.0.0.5"
id = "2"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn relay_needs_numeric_id() {
        let toml_str = r#"
[[console]]
address = "10.0.0.5"
id = "left"
relay = true
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("port offset"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert!(cfg.consoles.is_empty());
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[console]]\naddress = 5\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde_str("/a/b"), PathBuf::from("/a/b"));
    }
}
