//! View maintenance configuration loaded via OrthoConfig.

use std::path::PathBuf;

use ortho_config::OrthoConfig;
use serde::Deserialize;

const DATABASE_URL_FALLBACK: &str = "DATABASE_URL";

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Configuration values shared by the view maintenance binaries.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "VIEWED_MODELS")]
pub struct ViewSettings {
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// Path to the JSON view manifest.
    pub registry_path: Option<PathBuf>,
    /// Emit one JSON object per log event instead of compact lines.
    #[ortho_config(default = false)]
    pub json_logs: bool,
}

impl ViewSettings {
    /// Connection string from the settings, falling back to `DATABASE_URL`.
    #[must_use]
    pub fn database_url(&self) -> Option<String> {
        self.database_url
            .clone()
            .or_else(|| std::env::var(DATABASE_URL_FALLBACK).ok())
    }

    /// Configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        if self.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }
}
