use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration for sockredir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The local proxy that redirected connections are sent to.
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Where the programs are attached.
    #[serde(default)]
    pub cgroup: CgroupSettings,

    /// Location of the compiled kernel programs.
    #[serde(default)]
    pub bpf: BpfSettings,

    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Port the proxy listens on at 127.0.0.1.
    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// PID of the proxy process. Its own connects are never redirected.
    #[serde(default)]
    pub pid: Option<u32>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            port: default_proxy_port(),
            pid: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CgroupSettings {
    /// cgroup v2 directory whose processes are intercepted.
    #[serde(default = "default_cgroup_path")]
    pub path: PathBuf,
}

impl Default for CgroupSettings {
    fn default() -> Self {
        Self {
            path: default_cgroup_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BpfSettings {
    #[serde(default = "default_bpf_object")]
    pub object: PathBuf,

    /// Seconds between table usage reports while attached. 0 disables them.
    #[serde(default = "default_usage_interval")]
    pub usage_interval_secs: u64,
}

impl Default for BpfSettings {
    fn default() -> Self {
        Self {
            object: default_bpf_object(),
            usage_interval_secs: default_usage_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_proxy_port() -> u16 {
    15001
}

fn default_cgroup_path() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_bpf_object() -> PathBuf {
    PathBuf::from("crates/sockredir-ebpf/target/bpfel-unknown-none/release/sockredir-ebpf")
}

fn default_usage_interval() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a YAML file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Generate a default configuration.
    pub fn default_config() -> Self {
        Self {
            proxy: ProxySettings::default(),
            cgroup: CgroupSettings::default(),
            bpf: BpfSettings::default(),
            log: LogSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.port == 0 {
            return Err(ConfigError::Invalid("proxy.port must be non-zero".into()));
        }
        if self.proxy.pid == Some(0) {
            return Err(ConfigError::Invalid("proxy.pid must be non-zero".into()));
        }
        if self.cgroup.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("cgroup.path must not be empty".into()));
        }
        if !LOG_LEVELS.contains(&self.log.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "log.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}
