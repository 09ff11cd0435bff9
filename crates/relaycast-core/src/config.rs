//! Relaycast configuration system.
//!
//! One TOML file drives everything: storage, transport, the sequence catalog,
//! trigger modes and broadcast groups. Sequences and broadcast groups are
//! decoded entry by entry so one malformed definition never takes the others
//! down with it.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{RelayError, Result};
use crate::types::{BroadcastTarget, QuoteDecoration, SequenceDefinition};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub drip: DripConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    /// Raw sequence entries, validated one by one in [`RelayConfig::sequences`].
    #[serde(default)]
    pub sequences: Vec<toml::Value>,
}

impl RelayConfig {
    /// Load config from the default path (~/.relaycast/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RelayError::Config(format!("Failed to parse config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Relaycast home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".relaycast")
    }

    /// Decode and validate every sequence. Broken or duplicate entries are
    /// skipped with a logged config error.
    pub fn sequences(&self) -> Vec<SequenceDefinition> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.sequences.len());
        for (i, raw) in self.sequences.iter().enumerate() {
            let parsed = raw
                .clone()
                .try_into::<SequenceDefinition>()
                .map_err(|e| RelayError::Config(format!("sequence #{i}: {e}")))
                .and_then(SequenceDefinition::validated);
            match parsed {
                Ok(seq) if !seen.insert(seq.name.clone()) => {
                    tracing::warn!("⚠️ Skipping duplicate sequence '{}'", seq.name);
                }
                Ok(seq) => out.push(seq),
                Err(e) => tracing::warn!("⚠️ Skipping sequence: {e}"),
            }
        }
        out
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Pause after a composing/recording indicator before sending.
    #[serde(default = "default_settle_ms")]
    pub presence_settle_ms: u64,
    /// Resume in-flight sequences at boot.
    #[serde(default = "bool_true")]
    pub resume_on_boot: bool,
}

fn bool_true() -> bool { true }
fn default_data_dir() -> String { "~/.relaycast".into() }
fn default_settle_ms() -> u64 { 2000 }

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            presence_settle_ms: default_settle_ms(),
            resume_on_boot: true,
        }
    }
}

impl RuntimeConfig {
    pub fn data_dir(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Json,
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// SQLite file or JSON directory. Empty = inside `runtime.data_dir`.
    #[serde(default)]
    pub path: String,
}

impl StorageConfig {
    pub fn resolve_path(&self, data_dir: &Path) -> PathBuf {
        if !self.path.is_empty() {
            return expand_path(&self.path);
        }
        match self.backend {
            StorageBackend::Sqlite => data_dir.join("relaycast.db"),
            StorageBackend::Json | StorageBackend::Memory => data_dir.join("state"),
        }
    }
}

/// Outbound transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// "console" (dry-run logging) or "whatsapp" (Cloud API).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,
}

fn default_provider() -> String { "console".into() }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            whatsapp: None,
        }
    }
}

/// WhatsApp Business Cloud API credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Verify token for the webhook GET handshake.
    #[serde(default)]
    pub webhook_verify_token: String,
    /// App secret for X-Hub-Signature-256 checks. Empty disables verification.
    #[serde(default)]
    pub app_secret: String,
}

fn default_api_version() -> String { "v21.0".into() }

/// Inbound webhook gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 3000 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Mutually exclusive drip operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DripMode {
    /// Walk a fixed recipient list, one random sequence each.
    Recipients,
    /// Start sequences from inbound keyword matches.
    Keyword,
    Off,
}

/// Drip configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DripConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Pause between two recipients in recipients mode.
    #[serde(default = "default_global_interval")]
    pub global_interval_secs: u64,
    /// Keyword mode: trigger each recipient at most once ever.
    #[serde(default)]
    pub respond_once: bool,
}

fn default_mode() -> String { "recipients".into() }
fn default_global_interval() -> u64 { 3600 }

impl Default for DripConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            recipients: vec![],
            global_interval_secs: default_global_interval(),
            respond_once: false,
        }
    }
}

impl DripConfig {
    pub fn mode(&self) -> Result<DripMode> {
        match self.mode.trim().to_lowercase().as_str() {
            "recipients" | "destinatarios" => Ok(DripMode::Recipients),
            "keyword" | "palavrachave" => Ok(DripMode::Keyword),
            "off" | "none" | "" => Ok(DripMode::Off),
            other => Err(RelayError::Config(format!("unknown drip mode '{other}'"))),
        }
    }
}

/// Lead intake: every new private contact gets the lead sequence once.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IntakeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Sequence started for admitted leads; also the resume fallback.
    #[serde(default)]
    pub sequence: String,
    /// When this account itself sends exactly this text, the chat gets the sequence.
    #[serde(default)]
    pub trigger_phrase: String,
    /// Recipients that never enter the lead sequence.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Quiet window: deferral of broadcasts for one class of groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietWindowConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Case-insensitive substring of the group name selecting the class.
    #[serde(default = "default_quiet_name")]
    pub name_contains: String,
    #[serde(default = "default_quiet_hours")]
    pub hours: Vec<u32>,
    #[serde(default = "default_quiet_minutes")]
    pub window_minutes: u32,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_quiet_name() -> String { "pxg market".into() }
fn default_quiet_hours() -> Vec<u32> { vec![0, 9, 12, 15, 18, 21] }
fn default_quiet_minutes() -> u32 { 30 }
fn default_timezone() -> String { "America/Sao_Paulo".into() }

impl Default for QuietWindowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name_contains: default_quiet_name(),
            hours: default_quiet_hours(),
            window_minutes: default_quiet_minutes(),
            timezone: default_timezone(),
        }
    }
}

impl QuietWindowConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| RelayError::Config(format!("quiet_window.timezone: {e}")))
    }
}

/// Scheduled group broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default = "default_images_dir")]
    pub images_dir: String,
    #[serde(default = "default_videos_dir")]
    pub videos_dir: String,
    #[serde(default)]
    pub quote: QuoteDecoration,
    #[serde(default)]
    pub quiet_window: QuietWindowConfig,
    /// Raw group entries, validated one by one in [`BroadcastConfig::targets`].
    #[serde(default)]
    pub groups: Vec<toml::Value>,
}

fn default_images_dir() -> String { "media/images".into() }
fn default_videos_dir() -> String { "media/videos".into() }

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            messages: vec![],
            images_dir: default_images_dir(),
            videos_dir: default_videos_dir(),
            quote: QuoteDecoration::default(),
            quiet_window: QuietWindowConfig::default(),
            groups: vec![],
        }
    }
}

impl BroadcastConfig {
    pub fn targets(&self) -> Vec<BroadcastTarget> {
        self.groups
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| {
                let parsed = raw
                    .clone()
                    .try_into::<BroadcastTarget>()
                    .map_err(|e| RelayError::Config(format!("broadcast group #{i}: {e}")))
                    .and_then(BroadcastTarget::validated);
                match parsed {
                    Ok(t) => Some(t),
                    Err(e) => {
                        tracing::warn!("⚠️ Skipping broadcast group: {e}");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}
