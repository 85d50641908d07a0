//! Installed apps and their profiles, stored as YAML.
//!
//! ```yaml
//! apps:
//!   petstore:
//!     spec: ./petstore.yaml
//!     default_profile: prod
//!     profiles:
//!       prod:
//!         base_url: https://petstore.example.com/v3
//!         headers: {x-tenant: acme}
//!         timeout_secs: 30
//!         safety: {read_only_mode: true}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::safety::SafetyPolicy;

pub const CONFIG_ENV: &str = "OB_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub apps: BTreeMap<String, AppConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Spec file path, relative paths resolved against the config file.
    pub spec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
    pub profiles: BTreeMap<String, Profile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub safety: SafetyPolicy,
}

/// `<config dir>/openbridge/config.yaml`, if the platform has a config dir.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("openbridge").join("config.yaml"))
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml_ng::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Like [`Config::load`], but a missing file is an empty config.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file");
            return Ok(Config::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = serde_yaml_ng::to_string(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(write_err)
    }

    pub fn app(&self, name: &str) -> Result<&AppConfig, ConfigError> {
        self.apps.get(name).ok_or_else(|| ConfigError::AppNotFound {
            name: name.to_string(),
        })
    }

    /// The requested profile, else the app's default profile, else none.
    pub fn profile(&self, app: &str, profile: Option<&str>) -> Result<Option<&Profile>, ConfigError> {
        let app_config = self.app(app)?;
        let Some(name) = profile.or(app_config.default_profile.as_deref()) else {
            return Ok(None);
        };
        app_config
            .profiles
            .get(name)
            .map(Some)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                app: app.to_string(),
                profile: name.to_string(),
            })
    }
}

impl AppConfig {
    /// Spec location with relative paths resolved against `config_path`.
    pub fn spec_path(&self, config_path: &Path) -> PathBuf {
        let spec = Path::new(&self.spec);
        match config_path.parent() {
            Some(dir) if spec.is_relative() => dir.join(spec),
            _ => spec.to_path_buf(),
        }
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
apps:
  petstore:
    spec: specs/petstore.yaml
    default_profile: prod
    profiles:
      prod:
        base_url: https://petstore.example.com/v3
        headers:
          x-tenant: acme
        timeout_secs: 30
        safety:
          read_only_mode: true
      dev:
        base_url: http://localhost:8080
"#;

    #[test]
    fn loads_apps_and_profiles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, SAMPLE).unwrap();

        let config = Config::load(&path).unwrap();
        let app = config.app("petstore").unwrap();
        assert_eq!(app.spec_path(&path), dir.path().join("specs/petstore.yaml"));
        assert_eq!(app.profile_names(), vec!["dev", "prod"]);

        let prod = config.profile("petstore", None).unwrap().unwrap();
        assert_eq!(prod.timeout_secs, Some(30));
        assert_eq!(prod.headers.get("x-tenant").map(String::as_str), Some("acme"));
        assert!(prod.safety.read_only_mode);

        let dev = config.profile("petstore", Some("dev")).unwrap().unwrap();
        assert_eq!(dev.base_url.as_deref(), Some("http://localhost:8080"));
        assert!(dev.safety.is_unrestricted());
    }

    #[test]
    fn lookup_errors() {
        let config: Config = serde_yaml_ng::from_str(SAMPLE).unwrap();
        assert!(matches!(config.app("stripe"), Err(ConfigError::AppNotFound { .. })));
        assert!(matches!(
            config.profile("petstore", Some("staging")),
            Err(ConfigError::ProfileNotFound { .. })
        ));
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.yaml");
        assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());
        assert!(matches!(Config::load(&path), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn invalid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "apps: [1, 2").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let mut config = Config::default();
        config.apps.insert(
            "stripe".into(),
            AppConfig {
                spec: "/abs/stripe.json".into(),
                default_profile: None,
                profiles: BTreeMap::from([(
                    "live".to_string(),
                    Profile {
                        safety: SafetyPolicy::allow(["listCustomers"]),
                        ..Profile::default()
                    },
                )]),
            },
        );
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        let app = loaded.app("stripe").unwrap();
        assert_eq!(app.spec_path(&path), PathBuf::from("/abs/stripe.json"));
        assert_eq!(loaded.profile("stripe", None).unwrap(), None);
    }
}
