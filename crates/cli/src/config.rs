//! CLI configuration utilities

use anyhow::Result;
use serde::{Deserialize, Serialize};
use servicegpt_http::{ClientConfig, RefreshMode};
use std::path::{Path, PathBuf};

/// Environment prefix, e.g. `SERVICEGPT_API__BASE_URL`
const ENV_PREFIX: &str = "SERVICEGPT";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// API client settings
    pub api: ClientConfig,

    /// Where the session file and logs are kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Settings {
    /// Load settings from defaults, an optional file and the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong type
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = ClientConfig::default();
        let refresh_mode = match defaults.refresh_mode {
            RefreshMode::Cookie => "cookie",
            RefreshMode::Body => "body",
        };

        Ok(config::Config::builder()
            .set_default("api.base_url", defaults.base_url)?
            .set_default("api.timeout_secs", defaults.timeout_secs)?
            .set_default("api.user_agent", defaults.user_agent)?
            .set_default("api.token_key", defaults.token_key)?
            .set_default("api.refresh_mode", refresh_mode)?
            .set_default("api.queue_timeout_secs", defaults.queue_timeout_secs)?)
    }
}

/// Save settings to a TOML file
pub fn save_settings<P: AsRef<Path>>(settings: &Settings, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Generate a default configuration file
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    save_settings(&Settings::default(), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_without_file_uses_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.api.token_key, "token");
        assert_eq!(settings.api.refresh_mode, RefreshMode::Cookie);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servicegpt.toml");
        std::fs::write(
            &path,
            "data_dir = \"/tmp/servicegpt\"\n\n[api]\nbase_url = \"https://chat.example.com\"\nrefresh_mode = \"body\"\nqueue_timeout_secs = 5\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.api.base_url, "https://chat.example.com");
        assert_eq!(settings.api.refresh_mode, RefreshMode::Body);
        assert_eq!(settings.api.queue_timeout_secs, 5);
        assert_eq!(settings.api.token_key, "token");
        assert_eq!(settings.data_dir, Some(PathBuf::from("/tmp/servicegpt")));
    }

    #[test]
    fn test_generated_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        generate_default_config(&path).unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.api, ClientConfig::default());
    }
}
