use crate::scanner::{scan_options_for, EngineSettings, RebuildPolicy, ScanCategories, SETTING_MASK_TABLE};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: EngineSettings,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// humantime duration, e.g. "30s" or "5m".
    pub poll_interval: String,
    #[serde(default)]
    pub rebuild_policy: RebuildPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "all_categories")]
    pub categories: Vec<String>,
    #[serde(default = "num_cpus::get")]
    pub thread_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn all_categories() -> Vec<String> {
    SETTING_MASK_TABLE
        .iter()
        .map(|(name, _)| name.to_string())
        .collect()
}

fn default_level() -> String {
    "INFO".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            categories: all_categories(),
            thread_count: num_cpus::get(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_dir: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: PathBuf::from("/var/lib/clamav"),
                poll_interval: "5m".to_string(),
                rebuild_policy: RebuildPolicy::FailClosed,
            },
            limits: EngineSettings::default(),
            scan: ScanConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn poll_interval(&self) -> Result<Duration, anyhow::Error> {
        humantime::parse_duration(&self.poll_interval)
            .with_context(|| format!("无效的轮询间隔: {}", self.poll_interval))
    }
}

impl ScanConfig {
    pub fn categories(&self) -> ScanCategories {
        scan_options_for(&self.categories)
    }
}

impl EngineConfig {
    pub fn load(path: &PathBuf) -> Result<Self, anyhow::Error> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &PathBuf) -> Result<(), anyhow::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or(PathBuf::from("/etc"))
            .join("virus-engine")
            .join("config.yaml")
    }
}
