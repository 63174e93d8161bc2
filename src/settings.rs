//! Service configuration.
//!
//! Layers, later wins: built-in defaults, an optional JSON file, `NEGABOT_*`
//! environment variables (plus `HF_TOKEN`), then command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::model::DEFAULT_MODEL_NAME;

pub const DEFAULT_HUB_URL: &str = "https://router.huggingface.co/hf-inference/models";
pub const CONFIG_ENV: &str = "NEGABOT_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub model_name: String,
    pub hub_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_token: Option<String>,
    pub request_timeout_secs: u64,
    pub max_batch_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("negabot_predictions.db"),
            host: "0.0.0.0".into(),
            port: 8000,
            model_name: DEFAULT_MODEL_NAME.into(),
            hub_url: DEFAULT_HUB_URL.into(),
            hub_token: None,
            request_timeout_secs: 30,
            max_batch_size: 50,
        }
    }
}

impl Settings {
    /// Defaults, then the file at `path` if it exists, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("NEGABOT_DB_PATH") {
            self.db_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("NEGABOT_HOST") {
            self.host = value;
        }
        if let Some(value) = lookup("NEGABOT_PORT") {
            self.port = value
                .parse()
                .with_context(|| format!("NEGABOT_PORT is not a valid port: {value}"))?;
        }
        if let Some(value) = lookup("NEGABOT_MODEL") {
            self.model_name = value;
        }
        if let Some(value) = lookup("NEGABOT_HUB_URL") {
            self.hub_url = value;
        }
        if let Some(value) = lookup("NEGABOT_HUB_TOKEN").or_else(|| lookup("HF_TOKEN")) {
            self.hub_token = Some(value).filter(|token| !token.is_empty());
        }
        if let Some(value) = lookup("NEGABOT_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = value.parse().with_context(|| {
                format!("NEGABOT_REQUEST_TIMEOUT_SECS is not a number: {value}")
            })?;
        }
        if let Some(value) = lookup("NEGABOT_MAX_BATCH_SIZE") {
            self.max_batch_size = value
                .parse()
                .with_context(|| format!("NEGABOT_MAX_BATCH_SIZE is not a number: {value}"))?;
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Copy safe to print or persist next to logs.
    pub fn redacted(&self) -> Self {
        Self {
            hub_token: self.hub_token.as_ref().map(|_| "***".into()),
            ..self.clone()
        }
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::from_file(&dir.path().join("absent.json"))
            .unwrap_or_default();
        settings.apply_env(env(&[])).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn file_values_fill_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("negabot.json");
        fs::write(&path, r#"{ "port": 9100, "max_batch_size": 10 }"#).unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.port, 9100);
        assert_eq!(settings.max_batch_size, 10);
        assert_eq!(settings.host, "0.0.0.0");
    }

    #[test]
    fn env_overrides_file_values() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("NEGABOT_PORT", "8123"),
                ("NEGABOT_DB_PATH", "/tmp/log.db"),
                ("HF_TOKEN", "hf_secret"),
            ]))
            .unwrap();

        assert_eq!(settings.port, 8123);
        assert_eq!(settings.db_path, PathBuf::from("/tmp/log.db"));
        assert_eq!(settings.hub_token.as_deref(), Some("hf_secret"));
        assert_eq!(settings.bind_address(), "0.0.0.0:8123");
    }

    #[test]
    fn bad_env_numbers_are_reported() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(env(&[("NEGABOT_PORT", "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains("NEGABOT_PORT"));
    }

    #[test]
    fn persist_round_trips_and_redaction_hides_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("negabot.json");
        let settings = Settings {
            port: 9000,
            hub_token: Some("hf_secret".into()),
            ..Settings::default()
        };

        settings.persist(&path).unwrap();
        assert_eq!(Settings::from_file(&path).unwrap(), settings);

        let shown = serde_json::to_string(&settings.redacted()).unwrap();
        assert!(!shown.contains("hf_secret"));
    }
}
