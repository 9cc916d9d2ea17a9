use serde::Deserialize;
use std::{fs, path::PathBuf};

pub const DEFAULT_API_URL: &str = "https://api.energidataservice.dk/dataset/ConsumptionDE35Hour";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Gcs,
    Local,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket_name: String,
    pub project: String,
    pub credentials_path: PathBuf,
    /// Directory standing in for the bucket when `backend = "local"`.
    #[serde(default)]
    pub local_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    #[serde(default = "default_api_url")]
    pub url: String,
    #[serde(default = "default_days_delay")]
    pub days_delay: i64,
    #[serde(default = "default_days_export")]
    pub days_export: i64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            days_delay: default_days_delay(),
            days_export: default_days_export(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureStoreConfig {
    #[serde(default = "default_version")]
    pub feature_group_version: u32,
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self {
            feature_group_version: default_version(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub model_path: PathBuf,
    /// Forecast horizon in hours.
    #[serde(default = "default_fh")]
    pub fh: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub textfile_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub output_dir: PathBuf,
    pub storage: StorageConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub feature_store: FeatureStoreConfig,
    pub batch: Option<BatchConfig>,
    pub metrics: Option<MetricsConfig>,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_days_delay() -> i64 {
    15
}

fn default_days_export() -> i64 {
    30
}

fn default_version() -> u32 {
    1
}

fn default_fh() -> usize {
    24
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("ENERGY_PIPELINE_CONFIG").unwrap_or_else(|_| "energy-pipeline.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        let mut cfg = Self::from_toml_str(&contents)?;
        cfg.apply_env_overrides(|key| env::var(key).ok());
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }

    /// Deployment settings may come from the environment instead of the file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("GOOGLE_CLOUD_BUCKET_NAME") {
            self.storage.bucket_name = v;
        }
        if let Some(v) = lookup("GOOGLE_CLOUD_PROJECT_NAME") {
            self.storage.project = v;
        }
        if let Some(v) = lookup("GOOGLE_CLOUD_SERVICE_ACCOUNT_JSON_PATH") {
            self.storage.credentials_path = v.into();
        }
        if let Some(v) = lookup("OUTPUT_DIR") {
            self.output_dir = v.into();
        }
    }
}
