use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to load eBPF object {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("{0} not found in eBPF object")]
    NotFound(&'static str),
    #[error("failed to load program {program}: {reason}")]
    Program { program: &'static str, reason: String },
    #[error("failed to attach {program} to {cgroup}: {reason}")]
    Attach {
        program: &'static str,
        cgroup: PathBuf,
        reason: String,
    },
    #[error("map {map}: {reason}")]
    Map { map: &'static str, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
