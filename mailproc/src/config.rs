use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use mailproc_imf::DEFAULT_MAX_HEADER_BYTES;
use mailproc_ingest::{CommitMode, PipelineConfig, DEFAULT_CLAIM_LEASE};
use mailproc_store::storage::aws::AwsConf;

pub const BUCKET_NAME: &str = "BUCKET_NAME";
pub const TABLE_NAME: &str = "TABLE_NAME";

/// Optional tuning file, everything has a default.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TuningConfig {
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
    #[serde(default)]
    pub commit_mode: CommitMode,
    /// Where the receipt rule stores raw messages, keyed by SES message id
    #[serde(default = "default_object_key_prefix")]
    pub object_key_prefix: String,

    pub aws_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub dynamodb_endpoint: Option<String>,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: default_max_header_bytes(),
            claim_lease_secs: default_claim_lease_secs(),
            commit_mode: CommitMode::default(),
            object_key_prefix: default_object_key_prefix(),
            aws_region: None,
            s3_endpoint: None,
            dynamodb_endpoint: None,
        }
    }
}

fn default_max_header_bytes() -> usize {
    DEFAULT_MAX_HEADER_BYTES
}

fn default_claim_lease_secs() -> u64 {
    DEFAULT_CLAIM_LEASE.as_secs()
}

fn default_object_key_prefix() -> String {
    "mail/".into()
}

/// Resolved once at startup, then handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bucket: String,
    pub table: String,
    pub tuning: TuningConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    MissingVar(&'static str),
    #[error("unable to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path:?} is not a valid configuration file: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl Config {
    pub fn from_env(config_file: Option<PathBuf>) -> Result<Self, ConfigError> {
        let tuning = match config_file {
            Some(path) => read_config(path)?,
            None => TuningConfig::default(),
        };
        Self::from_lookup(|k| std::env::var(k).ok(), tuning)
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        tuning: TuningConfig,
    ) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingVar(name))
        };

        Ok(Self {
            bucket: required(BUCKET_NAME)?,
            table: required(TABLE_NAME)?,
            tuning,
        })
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            max_header_bytes: self.tuning.max_header_bytes,
            claim_lease: Duration::from_secs(self.tuning.claim_lease_secs),
            commit_mode: self.tuning.commit_mode,
        }
    }

    pub fn aws(&self) -> AwsConf {
        AwsConf {
            bucket: self.bucket.clone(),
            table: self.table.clone(),
            s3_endpoint: self.tuning.s3_endpoint.clone(),
            dynamodb_endpoint: self.tuning.dynamodb_endpoint.clone(),
        }
    }
}

pub fn read_config<T: DeserializeOwned>(config_file: PathBuf) -> Result<T, ConfigError> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(config_file.as_path())
        .map_err(|source| ConfigError::Io {
            path: config_file.clone(),
            source,
        })?;

    let mut config = String::new();
    file.read_to_string(&mut config)
        .map_err(|source| ConfigError::Io {
            path: config_file.clone(),
            source,
        })?;

    toml::from_str(&config).map_err(|source| ConfigError::Toml {
        path: config_file,
        source,
    })
}
