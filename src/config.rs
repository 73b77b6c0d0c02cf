use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub execution: ExecutionConfig,
    pub delivery: DeliveryConfig,
    pub storage: StorageConfig,
    pub access: AccessConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Shell,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutionConfig {
    pub timeout_seconds: u64,
    pub max_output_length: usize,
    pub enable_plots: bool,
    // Empty means ~/.coderun/outputs
    pub output_directory: String,
    pub language: Language,
    // Empty means python3 or sh depending on language
    pub interpreter: String,
    pub scan_recursive: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 90,
            max_output_length: 3000,
            enable_plots: true,
            output_directory: String::new(),
            language: Language::Python,
            interpreter: String::new(),
            scan_recursive: false,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn effective_interpreter(&self) -> String {
        if !self.interpreter.trim().is_empty() {
            return self.interpreter.trim().to_string();
        }
        match self.language {
            Language::Python => "python3".to_string(),
            Language::Shell => "sh".to_string(),
        }
    }

    pub fn effective_output_dir(&self) -> PathBuf {
        if self.output_directory.trim().is_empty() {
            base_dir().join("outputs")
        } else {
            PathBuf::from(self.output_directory.trim())
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DeliveryConfig {
    pub enable_routed_link_channel: bool,
    pub routed_link_host: String,
    pub served_port: u16,
    pub link_timeout_seconds: u64,
    pub enable_upload_api_channel: bool,
    pub upload_api_host: String,
    pub upload_api_port: u16,
    pub upload_timeout_seconds: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            enable_routed_link_channel: false,
            routed_link_host: "127.0.0.1".to_string(),
            served_port: 22334,
            link_timeout_seconds: 10,
            enable_upload_api_channel: false,
            upload_api_host: "127.0.0.1".to_string(),
            upload_api_port: 3000,
            upload_timeout_seconds: 10,
        }
    }
}

impl DeliveryConfig {
    pub fn link_timeout(&self) -> Duration {
        Duration::from_secs(self.link_timeout_seconds)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_seconds)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    // Empty means ~/.coderun
    pub data_directory: String,
}

impl StorageConfig {
    pub fn effective_data_dir(&self) -> PathBuf {
        if self.data_directory.trim().is_empty() {
            base_dir()
        } else {
            PathBuf::from(self.data_directory.trim())
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AccessConfig {
    /// Requester ids allowed to run snippets. Empty allows everyone.
    pub authorized_requesters: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub language: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
        }
    }
}

impl Config {
    /// Loads ~/.coderun/config.toml, writing the defaults there on first use.
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(config_dir) = path.parent() {
            fs::create_dir_all(config_dir)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn get_config_path() -> PathBuf {
        base_dir().join("config.toml")
    }

    pub fn get_effective_language(&self) -> String {
        if self.display.language == "auto" {
            // Try to get system language
            std::env::var("LANG")
                .unwrap_or_else(|_| "en_US".to_string())
                .split('.')
                .next()
                .unwrap_or("en")
                .to_string()
        } else {
            self.display.language.clone()
        }
    }
}

fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".coderun")
}
