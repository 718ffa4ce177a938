use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_A1111_BASE_URL: &str = "http://127.0.0.1:7860";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 700;

/// Settings loaded from `slotforge.json`. Every field has a default, so a
/// partial file (or none at all) is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotforgeConfig {
    /// `a1111` or `dryrun`.
    pub backend: String,
    pub a1111: A1111Config,
    pub gemini: GeminiConfig,
    pub poll_interval_ms: u64,
    pub out_dir: PathBuf,
}

impl Default for SlotforgeConfig {
    fn default() -> Self {
        Self {
            backend: "a1111".to_string(),
            a1111: A1111Config::default(),
            gemini: GeminiConfig::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            out_dir: PathBuf::from("slotforge-out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct A1111Config {
    pub base_url: String,
    /// `user:password`, sent as HTTP Basic auth.
    pub basic_auth: Option<String>,
    pub bearer_token: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for A1111Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_A1111_BASE_URL.to_string(),
            basic_auth: None,
            bearer_token: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint_base: String,
    pub timeout_secs: Option<u64>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            endpoint_base: DEFAULT_GEMINI_ENDPOINT.to_string(),
            timeout_secs: None,
        }
    }
}

impl SlotforgeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Missing file means defaults; an unreadable or invalid one is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("slotforge.json");
        std::fs::write(
            &path,
            r#"{"backend":"dryrun","a1111":{"bearer_token":"tok"},"poll_interval_ms":50}"#,
        )?;
        let config = SlotforgeConfig::load(&path)?;
        assert_eq!(config.backend, "dryrun");
        assert_eq!(config.a1111.base_url, DEFAULT_A1111_BASE_URL);
        assert_eq!(config.a1111.bearer_token.as_deref(), Some("tok"));
        assert_eq!(config.gemini.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        Ok(())
    }

    #[test]
    fn missing_file_yields_defaults() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = SlotforgeConfig::load_or_default(&temp.path().join("absent.json"))?;
        assert_eq!(config, SlotforgeConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(700));
        Ok(())
    }

    #[test]
    fn invalid_file_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("slotforge.json");
        std::fs::write(&path, "{not json")?;
        assert!(SlotforgeConfig::load_or_default(&path).is_err());
        Ok(())
    }
}
