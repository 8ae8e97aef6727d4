use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use agent::ProviderPreset;
use channels::MqttSettings;
use gateway::{AttemptPolicy, CredentialBundle, FileStore};
use proto::{ConfigError, DEFAULT_ROOM, UserIdentity, is_valid_room};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// rumqttc rejects keep-alive intervals shorter than this.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Top-level CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Passphrase gate.
    #[serde(default)]
    pub gate: GateConfig,

    /// Local identity and starting room.
    #[serde(default)]
    pub user: UserConfig,

    /// Chat transport.
    #[serde(default)]
    pub transport: TransportConfig,

    /// AI provider defaults.
    #[serde(default)]
    pub ai: AiConfig,

    /// Credential storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Invite link or token from `NEXUS_INVITE`. Never read from the file.
    #[serde(skip)]
    pub invite: Option<String>,
}

/// `[gate]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Unlock passphrase.
    #[serde(default = "default_passphrase")]
    pub passphrase: String,
    /// Consecutive wrong passphrases before throttling. `0` disables throttling.
    #[serde(default)]
    pub max_failures: u32,
    /// Seconds attempts are refused once throttled.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            passphrase: default_passphrase(),
            max_failures: 0,
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl GateConfig {
    /// Throttling policy, if enabled.
    pub fn attempt_policy(&self) -> Option<AttemptPolicy> {
        (self.max_failures > 0).then(|| AttemptPolicy {
            max_failures: self.max_failures,
            cooldown: Duration::from_secs(self.cooldown_secs),
        })
    }
}

fn default_passphrase() -> String {
    "nexus".to_string()
}

fn default_cooldown_secs() -> u64 {
    30
}

/// `[user]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Name shown to peers.
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Avatar glyph shown to peers.
    #[serde(default = "default_avatar")]
    pub avatar: String,
    /// Room joined on start.
    #[serde(default = "default_room")]
    pub room: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            avatar: default_avatar(),
            room: default_room(),
        }
    }
}

impl UserConfig {
    /// Identity attached to outbound chat.
    pub fn identity(&self) -> UserIdentity {
        UserIdentity::new(self.display_name.clone(), self.avatar.clone())
    }
}

fn default_display_name() -> String {
    UserIdentity::default().display_name
}

fn default_avatar() -> String {
    UserIdentity::default().avatar
}

fn default_room() -> String {
    DEFAULT_ROOM.to_string()
}

/// Which chat transport to run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Public MQTT broker.
    #[default]
    Mqtt,
    /// In-process only; nothing leaves the machine.
    Loopback,
}

/// `[transport]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Transport implementation.
    #[serde(default)]
    pub kind: TransportKind,
    /// Broker host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Topic prefix shared with the other clients.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Delay between reconnect attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// MQTT keep-alive interval.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            host: default_host(),
            port: default_port(),
            topic_prefix: default_topic_prefix(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl TransportConfig {
    /// Broker settings for [`channels::MqttTransport`].
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.host.clone(),
            port: self.port,
            topic_prefix: self.topic_prefix.clone(),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            keep_alive: Duration::from_secs(self.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS)),
        }
    }
}

fn default_host() -> String {
    MqttSettings::default().host
}

fn default_port() -> u16 {
    MqttSettings::default().port
}

fn default_topic_prefix() -> String {
    MqttSettings::default().topic_prefix
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_keep_alive_secs() -> u64 {
    30
}

/// `[ai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Provider selected until the user picks another one.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Model selected until the user picks another one. Empty means the
    /// provider preset's default.
    #[serde(default)]
    pub default_model: String,
    /// Extra or overriding OpenAI-compatible endpoints, keyed by provider id.
    #[serde(default)]
    pub base_urls: BTreeMap<String, String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_model: String::new(),
            base_urls: BTreeMap::new(),
        }
    }
}

impl AiConfig {
    /// Returns the effective default model.
    /// Falls back to the preset default when `default_model` is empty.
    pub fn effective_model(&self) -> String {
        if !self.default_model.trim().is_empty() {
            return self.default_model.trim().to_string();
        }
        ProviderPreset::from_str(&self.default_provider)
            .unwrap_or_default()
            .default_model()
            .to_string()
    }

    /// Credential bundle used when nothing is persisted yet.
    pub fn default_bundle(&self) -> CredentialBundle {
        CredentialBundle {
            selected_provider: self.default_provider.trim().to_ascii_lowercase(),
            selected_model: self.effective_model(),
            ..CredentialBundle::default()
        }
    }
}

fn default_provider() -> String {
    ProviderPreset::default().name().to_string()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Storage document path. Defaults to `~/.nexus/storage.json`.
    #[serde(default)]
    pub path: Option<String>,
}

impl StorageConfig {
    /// Resolved storage document path.
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => expand_home(path),
            _ => FileStore::default_path(),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(rest);
    }
    PathBuf::from(path)
}

/// `~/.nexus`, or `./.nexus` when `HOME` is unset.
pub fn nexus_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".nexus")
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            // Look in current dir, then home dir
            let cwd = std::env::current_dir().ok()?.join("nexus.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home_config = nexus_home().join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        config.apply_env();
        config.validate()?;

        debug!(
            room = %config.user.room,
            transport = ?config.transport.kind,
            host = %config.transport.host,
            provider = %config.ai.default_provider,
            "Config loaded"
        );
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(passphrase) = std::env::var("NEXUS_PASSPHRASE") {
            self.gate.passphrase = passphrase;
        }
        if let Ok(user) = std::env::var("NEXUS_USER") {
            self.user.display_name = user;
        }
        if let Ok(avatar) = std::env::var("NEXUS_AVATAR") {
            self.user.avatar = avatar;
        }
        if let Ok(room) = std::env::var("NEXUS_ROOM") {
            self.user.room = room;
        }
        if let Ok(host) = std::env::var("NEXUS_BROKER_HOST") {
            self.transport.host = host;
        }
        if let Ok(port) = std::env::var("NEXUS_BROKER_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.transport.port = p,
                Err(e) => warn!("Ignoring NEXUS_BROKER_PORT={port}: {e}"),
            }
        }
        if let Ok(path) = std::env::var("NEXUS_STORAGE") {
            self.storage.path = Some(path);
        }
        if let Ok(invite) = std::env::var("NEXUS_INVITE")
            && !invite.trim().is_empty()
        {
            self.invite = Some(invite);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gate.passphrase.is_empty() {
            return Err(ConfigError::MissingField("gate.passphrase".to_string()));
        }
        if self.user.display_name.trim().is_empty() {
            return Err(ConfigError::MissingField("user.display_name".to_string()));
        }
        if self.transport.kind == TransportKind::Mqtt && self.transport.host.trim().is_empty() {
            return Err(ConfigError::MissingField("transport.host".to_string()));
        }
        if !self.user.room.trim().is_empty() && !is_valid_room(&self.user.room) {
            return Err(ConfigError::InvalidValue {
                field: "user.room".to_string(),
                reason: "must not contain '/', '+', '#' or control characters".to_string(),
            });
        }
        Ok(())
    }
}
