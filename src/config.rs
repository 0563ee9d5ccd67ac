use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, Context, anyhow, bail};
use log::info;

use crate::client::{RequestSettings, DEFAULT_DEVICE_ID, DEFAULT_LANGUAGE};
use crate::opus_codec::{OpusApplication, OpusConfig};
use crate::recorder::RecorderSettings;
use crate::transport::TransportConfig;

/// Persistent client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceSettings,
    #[serde(default)]
    pub nlu: NluSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub audio: AudioSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub url: String,
    pub app_id: String,
    pub app_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluSettings {
    pub context_tag: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    pub receive_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    pub input_device: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    #[serde(default = "default_complexity")]
    pub complexity: u32,
    #[serde(default)]
    pub application: OpusApplication,
}

/// Flat credentials object, the shape of a `creds.json` file
#[derive(Debug, Deserialize)]
struct FlatCredentials {
    url: String,
    app_id: String,
    app_key: String,
    context_tag: Option<String>,
    language: Option<String>,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_user_id() -> String {
    "user1".to_string()
}

fn default_device_id() -> String {
    DEFAULT_DEVICE_ID.to_string()
}

fn default_bitrate() -> u32 {
    OpusConfig::default().bitrate
}

fn default_complexity() -> u32 {
    OpusConfig::default().complexity
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceSettings::default(),
            nlu: NluSettings::default(),
            session: SessionSettings::default(),
            audio: AudioSettings::default(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            url: "wss://ws.dev.nuance.com/v2".to_string(),
            app_id: String::new(),
            app_key: String::new(),
        }
    }
}

impl Default for NluSettings {
    fn default() -> Self {
        Self {
            context_tag: None,
            language: default_language(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            device_id: default_device_id(),
            receive_timeout_secs: None,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            sample_rate: None,
            channels: None,
            bitrate: default_bitrate(),
            complexity: default_complexity(),
            application: OpusApplication::default(),
        }
    }
}

impl From<FlatCredentials> for AppConfig {
    fn from(flat: FlatCredentials) -> Self {
        Self {
            service: ServiceSettings {
                url: flat.url,
                app_id: flat.app_id,
                app_key: flat.app_key,
            },
            nlu: NluSettings {
                context_tag: flat.context_tag,
                language: flat.language.unwrap_or_else(default_language),
            },
            ..Self::default()
        }
    }
}

impl AppConfig {
    /// Parse a configuration document; `.json` files may be nested or flat
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            match serde_json::from_str::<AppConfig>(contents) {
                Ok(config) => Ok(config),
                Err(_) => serde_json::from_str::<FlatCredentials>(contents)
                    .map(AppConfig::from)
                    .context("Failed to parse JSON credentials"),
            }
        } else {
            toml::from_str(contents).context("Failed to parse TOML configuration")
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.url.trim().is_empty() {
            bail!("service url must not be empty");
        }
        if self.service.app_id.trim().is_empty() {
            bail!("app_id must not be empty");
        }
        if self.service.app_key.trim().is_empty() {
            bail!("app_key must not be empty");
        }
        if let Some(channels) = self.audio.channels {
            if channels == 0 {
                bail!("audio channels must be positive");
            }
        }
        if let Some(rate) = self.audio.sample_rate {
            self.to_opus_config(rate)
                .validate()
                .map_err(|e| anyhow!("invalid audio settings: {}", e))?;
        }
        Ok(())
    }

    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            url: self.service.url.clone(),
            app_id: self.service.app_id.clone(),
            app_key: self.service.app_key.clone(),
        }
    }

    pub fn to_request_settings(&self, user_id: Option<&str>) -> RequestSettings {
        RequestSettings {
            user_id: user_id
                .map(str::to_string)
                .unwrap_or_else(|| self.session.user_id.clone()),
            device_id: self.session.device_id.clone(),
            context_tag: self.nlu.context_tag.clone(),
            language: self.nlu.language.clone(),
            receive_timeout: self.session.receive_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Encoder settings for a capture stream running at `sample_rate`
    pub fn to_opus_config(&self, sample_rate: u32) -> OpusConfig {
        OpusConfig {
            sample_rate,
            bitrate: self.audio.bitrate,
            complexity: self.audio.complexity,
            application: self.audio.application,
        }
    }

    pub fn to_recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            device_name: self.audio.input_device.clone(),
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
        }
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    /// Load from `path`, or from the platform config directory
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path,
            None => Self::default_config_path()?,
        };
        info!("Loading configuration from: {:?}", config_path);

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read configuration file {:?}", config_path))?;
        let config = AppConfig::parse(&contents, &config_path)?;
        config.validate()?;

        Ok(Self {
            config_path,
            config,
        })
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Write a TOML template to `path` unless a file already exists there
    pub fn write_template(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        let config_str = toml::to_string_pretty(&AppConfig::default())
            .context("Failed to serialize configuration template")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }
        fs::write(path, config_str)
            .context("Failed to write configuration template")?;

        info!("Configuration template written to: {:?}", path);
        Ok(true)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("ncs-client")
        } else {
            let home_dir = dirs::home_dir()
                .context("Could not determine home directory")?;
            home_dir.join(".ncs-client")
        };

        Ok(config_dir.join("config.toml"))
    }
}
