use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ITEMS_PER_PAGE: usize = 10;
pub const DEFAULT_REPORT_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_VIEWS_ENDPOINT: &str = "/api/views/batch";

const ENV_BASE_URL: &str = "FOLIO_VIEWS_BASE_URL";
const ENV_REPORT_INTERVAL_MS: &str = "FOLIO_VIEWS_REPORT_INTERVAL_MS";
const ENV_AUTH_TOKEN_FILE: &str = "FOLIO_VIEWS_AUTH_TOKEN_FILE";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub filter: FilterSettings,
    pub reporter: ReporterSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSettings {
    pub items_per_page: usize,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReporterSettings {
    pub base_url: String,
    pub endpoint: String,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub auth_token_file: Option<PathBuf>,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            endpoint: DEFAULT_VIEWS_ENDPOINT.to_string(),
            interval_ms: DEFAULT_REPORT_INTERVAL_MS,
            timeout_ms: 10_000,
            auth_token_file: None,
        }
    }
}

impl ReporterSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn report_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.endpoint)
    }
}

impl Settings {
    pub fn validate(&self) -> AppResult<()> {
        if self.reporter.base_url.trim().is_empty() {
            return Err(AppError::Config("reporter.baseUrl must not be empty".to_string()));
        }
        if !self.reporter.endpoint.starts_with('/') {
            return Err(AppError::Config(format!(
                "reporter.endpoint '{}' must start with '/'",
                self.reporter.endpoint
            )));
        }
        if self.reporter.interval_ms == 0 {
            return Err(AppError::Config("reporter.intervalMs must be positive".to_string()));
        }
        Ok(())
    }
}

pub fn load_settings(path: &Path, allow_missing: bool) -> AppResult<Settings> {
    let settings = match std::fs::read_to_string(path) {
        Ok(contents) => serde_yaml::from_str::<Settings>(&contents).map_err(|error| {
            AppError::Config(format!("failed to parse '{}': {error}", path.display()))
        })?,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            Settings::default()
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::Config(format!("settings file not found '{}'", path.display())));
        }
        Err(error) => return Err(error.into()),
    };
    settings.validate()?;
    Ok(settings)
}

pub fn apply_env_overrides(settings: &mut Settings) -> AppResult<()> {
    apply_overrides(settings, |name| std::env::var(name).ok())
}

fn apply_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> AppResult<()> {
    if let Some(base_url) = lookup(ENV_BASE_URL) {
        settings.reporter.base_url = base_url;
    }
    if let Some(raw) = lookup(ENV_REPORT_INTERVAL_MS) {
        settings.reporter.interval_ms = raw.trim().parse::<u64>().map_err(|error| {
            AppError::Config(format!("invalid {ENV_REPORT_INTERVAL_MS} '{raw}': {error}"))
        })?;
    }
    if let Some(path) = lookup(ENV_AUTH_TOKEN_FILE) {
        settings.reporter.auth_token_file = Some(PathBuf::from(path));
    }
    settings.validate()
}
