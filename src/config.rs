//! Configuration: a YAML properties file in the app directory holding
//! paths, the company prefix and the connection settings for the
//! generator and the remote library service.

use crate::errors::{Result, ThreatsmithError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.yaml";

/// Environment variable that substitutes canned answers for the
/// generator, for offline runs and tests.
pub const TEST_MODE_ENV: &str = "THREATSMITH_TEST_MODE";

/// Environment variable overriding the app directory.
pub const HOME_ENV: &str = "THREATSMITH_HOME";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Folder scanned for importable components; empty means the app dir.
    #[serde(default)]
    pub component_input_path: String,
    /// Folder exports are written to; empty means the app dir.
    #[serde(default)]
    pub component_output_path: String,
    /// Prefix inserted into generated refs, e.g. "ACME-".
    #[serde(default)]
    pub company_name: String,

    #[serde(default = "default_openai_endpoint")]
    pub openai_endpoint: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default)]
    pub openai_api_key: String,

    #[serde(default)]
    pub remote_url: String,
    #[serde(default)]
    pub remote_api_token: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            component_input_path: String::new(),
            component_output_path: String::new(),
            company_name: String::new(),
            openai_endpoint: default_openai_endpoint(),
            openai_model: default_openai_model(),
            openai_api_key: String::new(),
            remote_url: String::new(),
            remote_api_token: String::new(),
        }
    }
}

fn default_openai_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

impl Config {
    /// Load from the app dir, falling back to defaults when no file
    /// exists yet.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ThreatsmithError::Config(format!("failed to read {}: {e}", path.display())))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ThreatsmithError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| ThreatsmithError::Config(e.to_string()))?;
        std::fs::write(&path, yaml)
            .map_err(|e| ThreatsmithError::Config(format!("failed to write {}: {e}", path.display())))?;
        Ok(())
    }

    /// Company prefix as inserted into refs: "ACME" becomes "ACME-".
    pub fn company_prefix(&self) -> String {
        if self.company_name.is_empty() {
            String::new()
        } else {
            format!("{}-", self.company_name)
        }
    }

    pub fn input_dir(&self, app_dir: &Path) -> PathBuf {
        if self.component_input_path.is_empty() {
            app_dir.to_path_buf()
        } else {
            PathBuf::from(&self.component_input_path)
        }
    }

    pub fn output_dir(&self, app_dir: &Path) -> PathBuf {
        if self.component_output_path.is_empty() {
            app_dir.to_path_buf()
        } else {
            PathBuf::from(&self.component_output_path)
        }
    }

    /// Set one property by key; unknown keys are a config error so typos
    /// do not vanish silently.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "component_input_path" => self.component_input_path = value.to_string(),
            "component_output_path" => self.component_output_path = value.to_string(),
            "company_name" => self.company_name = value.to_string(),
            "openai_endpoint" => self.openai_endpoint = value.to_string(),
            "openai_model" => self.openai_model = value.to_string(),
            "openai_api_key" => self.openai_api_key = value.to_string(),
            "remote_url" => self.remote_url = value.to_string(),
            "remote_api_token" => self.remote_api_token = value.to_string(),
            _ => {
                return Err(ThreatsmithError::Config(format!(
                    "unknown configuration key '{key}'"
                )))
            }
        }
        Ok(())
    }

    /// (key, value) pairs for display, secrets redacted.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let redact = |s: &str| {
            if s.is_empty() {
                String::new()
            } else {
                "********".to_string()
            }
        };
        vec![
            ("component_input_path", self.component_input_path.clone()),
            ("component_output_path", self.component_output_path.clone()),
            ("company_name", self.company_name.clone()),
            ("openai_endpoint", self.openai_endpoint.clone()),
            ("openai_model", self.openai_model.clone()),
            ("openai_api_key", redact(&self.openai_api_key)),
            ("remote_url", self.remote_url.clone()),
            ("remote_api_token", redact(&self.remote_api_token)),
        ]
    }
}

/// Resolve the application directory: `THREATSMITH_HOME` when set, else
/// the platform config dir. Created on first use.
pub fn app_dir() -> Result<PathBuf> {
    let dir = match std::env::var(HOME_ENV) {
        Ok(custom) if !custom.is_empty() => PathBuf::from(custom),
        _ => dirs::config_dir()
            .ok_or_else(|| ThreatsmithError::Config("no config directory available".to_string()))?
            .join("threatsmith"),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| ThreatsmithError::Config(format!("cannot create {}: {e}", dir.display())))?;
    Ok(dir)
}

pub fn test_mode() -> bool {
    std::env::var(TEST_MODE_ENV).map(|v| v == "1").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_no_file() {
        let dir = TempDir::new().expect("tempdir");
        let config = Config::load(dir.path()).expect("load");
        assert_eq!(config, Config::default());
        assert_eq!(config.openai_model, "gpt-4o");
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = Config::default();
        config.company_name = "ACME".to_string();
        config.remote_url = "https://example.iriusrisk.com".to_string();
        config.save(dir.path()).expect("save");

        let loaded = Config::load(dir.path()).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_company_prefix() {
        let mut config = Config::default();
        assert_eq!(config.company_prefix(), "");
        config.company_name = "ACME".to_string();
        assert_eq!(config.company_prefix(), "ACME-");
    }

    #[test]
    fn test_set_known_and_unknown_keys() {
        let mut config = Config::default();
        config.set("company_name", "ACME").expect("set");
        assert_eq!(config.company_name, "ACME");
        assert!(config.set("no_such_key", "x").is_err());
    }

    #[test]
    fn test_paths_fall_back_to_app_dir() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = Config::default();
        assert_eq!(config.input_dir(dir.path()), dir.path());
        config.component_input_path = "/srv/components".to_string();
        assert_eq!(config.input_dir(dir.path()), PathBuf::from("/srv/components"));
    }

    #[test]
    fn test_entries_redact_secrets() {
        let mut config = Config::default();
        config.openai_api_key = "sk-secret".to_string();
        let entries = config.entries();
        let (_, key) = entries
            .iter()
            .find(|(k, _)| *k == "openai_api_key")
            .expect("entry");
        assert_eq!(key, "********");
    }

    #[test]
    fn test_partial_file_uses_field_defaults() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), "company_name: ACME\n").expect("write");
        let config = Config::load(dir.path()).expect("load");
        assert_eq!(config.company_name, "ACME");
        assert_eq!(config.openai_endpoint, "https://api.openai.com/v1");
    }
}
