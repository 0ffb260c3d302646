//! Provider configuration.
//!
//! Values are resolved from, in order of precedence:
//!
//! 1. the provider block sent by the host,
//! 2. `SCW_*` environment variables,
//! 3. the selected profile of the `scw` CLI configuration file,
//! 4. the top-level defaults of that file.
//!
//! Nothing is hardcoded: a resource in a zone needs a zone from one of
//! these sources or on the resource itself.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::locality::{Region, Zone};
use crate::schema::{Attribute, Diagnostic, Schema, Validator};

/// Default Scaleway API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.scaleway.com";

/// Environment variable names understood by the provider.
pub mod env {
    /// Access key.
    pub const ACCESS_KEY: &str = "SCW_ACCESS_KEY";
    /// Secret key.
    pub const SECRET_KEY: &str = "SCW_SECRET_KEY";
    /// Default project.
    pub const PROJECT_ID: &str = "SCW_DEFAULT_PROJECT_ID";
    /// Default organization.
    pub const ORGANIZATION_ID: &str = "SCW_DEFAULT_ORGANIZATION_ID";
    /// Default region.
    pub const REGION: &str = "SCW_DEFAULT_REGION";
    /// Default zone.
    pub const ZONE: &str = "SCW_DEFAULT_ZONE";
    /// API endpoint override.
    pub const API_URL: &str = "SCW_API_URL";
    /// Profile name.
    pub const PROFILE: &str = "SCW_PROFILE";
    /// Path of the CLI configuration file.
    pub const CONFIG_PATH: &str = "SCW_CONFIG_PATH";
}

/// The provider block as written by the user.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderBlock {
    /// Access key.
    pub access_key: Option<String>,
    /// Secret key.
    pub secret_key: Option<String>,
    /// Default project for new resources.
    pub project_id: Option<String>,
    /// Default organization.
    pub organization_id: Option<String>,
    /// Default region.
    pub region: Option<String>,
    /// Default zone.
    pub zone: Option<String>,
    /// API endpoint override.
    pub api_url: Option<String>,
    /// Profile to load from the configuration file.
    pub profile: Option<String>,
    /// Path of the configuration file.
    pub config_file: Option<String>,
}

/// One profile of the `scw` configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ProfileEntry {
    access_key: Option<String>,
    secret_key: Option<String>,
    default_project_id: Option<String>,
    default_organization_id: Option<String>,
    default_region: Option<String>,
    default_zone: Option<String>,
    api_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    #[serde(flatten)]
    defaults: ProfileEntry,
    active_profile: Option<String>,
    profiles: BTreeMap<String, ProfileEntry>,
}

/// Where configuration comes from besides the provider block.
#[derive(Clone)]
pub struct ConfigSources {
    env: fn(&str) -> Option<String>,
    default_file: Option<PathBuf>,
}

impl ConfigSources {
    /// The process environment and `~/.config/scw/config.yaml`.
    pub fn system() -> Self {
        Self {
            env: |key| std::env::var(key).ok().filter(|v| !v.is_empty()),
            default_file: dirs::home_dir().map(|home| home.join(".config/scw/config.yaml")),
        }
    }

    /// Only the provider block (and an explicit `config_file`).
    pub fn isolated() -> Self {
        Self {
            env: |_| None,
            default_file: None,
        }
    }

    /// Use a custom environment lookup.
    pub fn with_env(mut self, env: fn(&str) -> Option<String>) -> Self {
        self.env = env;
        self
    }

    fn var(&self, key: &str) -> Option<String> {
        (self.env)(key)
    }
}

impl Default for ConfigSources {
    fn default() -> Self {
        Self::system()
    }
}

/// Resolved provider configuration.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Access key.
    pub access_key: Option<String>,
    /// Secret key; never printed.
    pub secret_key: Option<String>,
    /// Default project for new resources.
    pub project_id: Option<String>,
    /// Default organization.
    pub organization_id: Option<String>,
    /// Default region.
    pub region: Option<Region>,
    /// Default zone.
    pub zone: Option<Zone>,
    /// API endpoint.
    pub api_url: Option<String>,
    /// Profile that was loaded, if any.
    pub profile: Option<String>,
    /// Configuration file that was read, if any.
    pub config_file: Option<PathBuf>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("access_key", &self.access_key)
            .field(
                "secret_key",
                &self.secret_key.as_ref().map(|_| "<redacted>"),
            )
            .field("project_id", &self.project_id)
            .field("organization_id", &self.organization_id)
            .field("region", &self.region)
            .field("zone", &self.zone)
            .field("api_url", &self.api_url)
            .field("profile", &self.profile)
            .field("config_file", &self.config_file)
            .finish()
    }
}

impl ProviderConfig {
    /// The schema of the provider block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "access_key",
                Attribute::optional_string().with_description("Scaleway access key"),
            )
            .with_attribute(
                "secret_key",
                Attribute::optional_string()
                    .sensitive()
                    .with_validator(Validator::Uuid)
                    .with_description("Scaleway secret key"),
            )
            .with_attribute(
                "project_id",
                Attribute::optional_string()
                    .with_validator(Validator::Uuid)
                    .with_description("Default project for new resources"),
            )
            .with_attribute(
                "organization_id",
                Attribute::optional_string().with_validator(Validator::Uuid),
            )
            .with_attribute(
                "region",
                Attribute::optional_string().with_validator(Validator::Region),
            )
            .with_attribute(
                "zone",
                Attribute::optional_string().with_validator(Validator::Zone),
            )
            .with_attribute(
                "api_url",
                Attribute::optional_string().with_description("Override of the API endpoint"),
            )
            .with_attribute("profile", Attribute::optional_string())
            .with_attribute("config_file", Attribute::optional_string())
    }

    /// Resolve the configuration from the host's provider block.
    ///
    /// All problems are reported together.
    pub fn from_value(value: &Value, sources: &ConfigSources) -> Result<Self, Vec<Diagnostic>> {
        let block: ProviderBlock = match value {
            Value::Null => ProviderBlock::default(),
            other => serde_json::from_value(other.clone()).map_err(|e| {
                vec![Diagnostic::error("Invalid provider configuration").with_detail(e.to_string())]
            })?,
        };
        Self::resolve(block, sources)
    }

    /// Resolve the configuration from an already parsed provider block.
    pub fn resolve(block: ProviderBlock, sources: &ConfigSources) -> Result<Self, Vec<Diagnostic>> {
        let mut diagnostics = Vec::new();

        let explicit_file = block
            .config_file
            .clone()
            .or_else(|| sources.var(env::CONFIG_PATH))
            .map(PathBuf::from);
        let file_path = explicit_file.clone().or_else(|| sources.default_file.clone());
        let file = match &file_path {
            Some(path) => match load_config_file(path) {
                Ok(file) => file,
                Err(FileError::Missing) if explicit_file.is_none() => None,
                Err(FileError::Missing) => {
                    diagnostics.push(
                        Diagnostic::error("Configuration file not found")
                            .with_detail(path.display().to_string())
                            .with_attribute("config_file"),
                    );
                    None
                }
                Err(FileError::Invalid(message)) => {
                    diagnostics.push(
                        Diagnostic::error("Invalid configuration file")
                            .with_detail(format!("{}: {}", path.display(), message))
                            .with_attribute("config_file"),
                    );
                    None
                }
            },
            None => None,
        };

        let profile_name = block
            .profile
            .clone()
            .or_else(|| sources.var(env::PROFILE))
            .or_else(|| file.as_ref().and_then(|f| f.active_profile.clone()));
        let (profile, defaults) = match &file {
            Some(file) => {
                let profile = match &profile_name {
                    Some(name) => match file.profiles.get(name) {
                        Some(profile) => Some(profile.clone()),
                        None => {
                            diagnostics.push(
                                Diagnostic::error(format!("Unknown profile '{}'", name))
                                    .with_attribute("profile"),
                            );
                            None
                        }
                    },
                    None => None,
                };
                (profile.unwrap_or_default(), file.defaults.clone())
            }
            None => (ProfileEntry::default(), ProfileEntry::default()),
        };

        let pick = |explicit: &Option<String>,
                    var: &str,
                    from_profile: &Option<String>,
                    from_defaults: &Option<String>| {
            explicit
                .clone()
                .filter(|v| !v.is_empty())
                .or_else(|| sources.var(var))
                .or_else(|| from_profile.clone())
                .or_else(|| from_defaults.clone())
        };

        let access_key = pick(
            &block.access_key,
            env::ACCESS_KEY,
            &profile.access_key,
            &defaults.access_key,
        );
        let secret_key = pick(
            &block.secret_key,
            env::SECRET_KEY,
            &profile.secret_key,
            &defaults.secret_key,
        );
        let project_id = pick(
            &block.project_id,
            env::PROJECT_ID,
            &profile.default_project_id,
            &defaults.default_project_id,
        );
        let organization_id = pick(
            &block.organization_id,
            env::ORGANIZATION_ID,
            &profile.default_organization_id,
            &defaults.default_organization_id,
        );
        let region = pick(
            &block.region,
            env::REGION,
            &profile.default_region,
            &defaults.default_region,
        );
        let zone = pick(
            &block.zone,
            env::ZONE,
            &profile.default_zone,
            &defaults.default_zone,
        );
        let api_url = pick(
            &block.api_url,
            env::API_URL,
            &profile.api_url,
            &defaults.api_url,
        );

        if secret_key.is_none() {
            diagnostics.push(
                Diagnostic::error("Missing secret key")
                    .with_detail(format!(
                        "set secret_key in the provider block, {} or a profile",
                        env::SECRET_KEY
                    ))
                    .with_attribute("secret_key"),
            );
        }
        if let Some(secret) = &secret_key {
            if Uuid::parse_str(secret).is_err() {
                diagnostics.push(
                    Diagnostic::error("Invalid secret key")
                        .with_detail("the secret key must be a UUID")
                        .with_attribute("secret_key"),
                );
            }
        }
        if let Some(access) = &access_key {
            if !is_access_key(access) {
                diagnostics.push(
                    Diagnostic::error("Invalid access key")
                        .with_detail("access keys look like SCWXXXXXXXXXXXXXXXXX")
                        .with_attribute("access_key"),
                );
            }
        }
        for (name, value) in [
            ("project_id", &project_id),
            ("organization_id", &organization_id),
        ] {
            if let Some(value) = value {
                if Uuid::parse_str(value).is_err() {
                    diagnostics.push(
                        Diagnostic::error(format!("Invalid {}", name))
                            .with_detail(format!("{:?} is not a UUID", value))
                            .with_attribute(name),
                    );
                }
            }
        }

        let zone = match zone.map(|z| Zone::parse(&z)) {
            Some(Ok(zone)) => Some(zone),
            Some(Err(e)) => {
                diagnostics.push(
                    Diagnostic::error("Invalid zone")
                        .with_detail(e.to_string())
                        .with_attribute("zone"),
                );
                None
            }
            None => None,
        };
        let region = match region.map(|r| Region::parse(&r)) {
            Some(Ok(region)) => Some(region),
            Some(Err(e)) => {
                diagnostics.push(
                    Diagnostic::error("Invalid region")
                        .with_detail(e.to_string())
                        .with_attribute("region"),
                );
                None
            }
            None => None,
        };
        if let (Some(zone), Some(region)) = (&zone, &region) {
            if !region.contains(zone) {
                diagnostics.push(
                    Diagnostic::error("Zone is not in region")
                        .with_detail(format!("zone {} is not part of region {}", zone, region))
                        .with_attribute("zone"),
                );
            }
        }

        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }

        Ok(Self {
            access_key,
            secret_key,
            project_id,
            organization_id,
            region,
            zone,
            api_url,
            profile: profile_name,
            config_file: file.is_some().then_some(file_path).flatten(),
        })
    }

    /// The default region, derived from the zone when not set explicitly.
    pub fn effective_region(&self) -> Option<Region> {
        self.region
            .clone()
            .or_else(|| self.zone.as_ref().map(Zone::region))
    }

    /// The API endpoint, without a trailing slash.
    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
    }
}

enum FileError {
    Missing,
    Invalid(String),
}

fn load_config_file(path: &Path) -> Result<Option<ConfigFile>, FileError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(FileError::Missing),
        Err(e) => return Err(FileError::Invalid(e.to_string())),
    };
    if raw.trim().is_empty() {
        return Ok(Some(ConfigFile::default()));
    }
    serde_yaml::from_str(&raw)
        .map(Some)
        .map_err(|e| FileError::Invalid(e.to_string()))
}

fn is_access_key(value: &str) -> bool {
    value.len() == 20
        && value.starts_with("SCW")
        && value[3..]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const SECRET: &str = "11111111-1111-1111-1111-111111111111";
    const PROJECT: &str = "22222222-2222-2222-2222-222222222222";

    fn fake_env(key: &str) -> Option<String> {
        match key {
            "SCW_SECRET_KEY" => Some("33333333-3333-3333-3333-333333333333".to_string()),
            "SCW_DEFAULT_ZONE" => Some("nl-ams-1".to_string()),
            _ => None,
        }
    }

    fn write_file(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("scw-config-{}.yaml", Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_explicit_block() {
        let config = ProviderConfig::from_value(
            &json!({"secret_key": SECRET, "project_id": PROJECT, "zone": "fr-par-2"}),
            &ConfigSources::isolated(),
        )
        .unwrap();
        assert_eq!(config.zone.as_ref().unwrap().as_str(), "fr-par-2");
        assert_eq!(config.effective_region().unwrap().as_str(), "fr-par");
        assert_eq!(config.api_url(), DEFAULT_API_URL);
    }

    #[test]
    fn test_explicit_beats_env() {
        let sources = ConfigSources::isolated().with_env(fake_env);
        let config =
            ProviderConfig::from_value(&json!({"secret_key": SECRET}), &sources).unwrap();
        assert_eq!(config.secret_key.as_deref(), Some(SECRET));
        assert_eq!(config.zone.as_ref().unwrap().as_str(), "nl-ams-1");
    }

    #[test]
    fn test_profile_and_file_defaults() {
        let path = write_file(
            "secret_key: 44444444-4444-4444-4444-444444444444\n\
             default_zone: fr-par-1\n\
             active_profile: staging\n\
             profiles:\n  \
               staging:\n    \
                 default_zone: pl-waw-1\n    \
                 default_project_id: 22222222-2222-2222-2222-222222222222\n",
        );
        let config = ProviderConfig::from_value(
            &json!({"config_file": path.display().to_string()}),
            &ConfigSources::isolated(),
        )
        .unwrap();
        assert_eq!(config.profile.as_deref(), Some("staging"));
        assert_eq!(config.zone.as_ref().unwrap().as_str(), "pl-waw-1");
        assert_eq!(config.project_id.as_deref(), Some(PROJECT));
        assert_eq!(
            config.secret_key.as_deref(),
            Some("44444444-4444-4444-4444-444444444444")
        );
        assert_eq!(config.config_file.as_deref(), Some(path.as_path()));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_unknown_profile() {
        let path = write_file("profiles: {}\n");
        let diagnostics = ProviderConfig::from_value(
            &json!({"secret_key": SECRET, "profile": "nope", "config_file": path.display().to_string()}),
            &ConfigSources::isolated(),
        )
        .unwrap_err();
        assert!(diagnostics.iter().any(|d| d.summary.contains("nope")));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_all_problems_reported() {
        let diagnostics = ProviderConfig::from_value(
            &json!({
                "access_key": "nope",
                "project_id": "not-a-uuid",
                "zone": "fr-par-1",
                "region": "nl-ams",
            }),
            &ConfigSources::isolated(),
        )
        .unwrap_err();
        let summaries: Vec<_> = diagnostics.iter().map(|d| d.summary.as_str()).collect();
        assert!(summaries.contains(&"Missing secret key"));
        assert!(summaries.contains(&"Invalid access key"));
        assert!(summaries.contains(&"Invalid project_id"));
        assert!(summaries.contains(&"Zone is not in region"));
    }

    #[test]
    fn test_missing_explicit_file() {
        let diagnostics = ProviderConfig::from_value(
            &json!({"secret_key": SECRET, "config_file": "/nonexistent/scw.yaml"}),
            &ConfigSources::isolated(),
        )
        .unwrap_err();
        assert_eq!(diagnostics[0].summary, "Configuration file not found");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = ProviderConfig {
            secret_key: Some(SECRET.to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains(SECRET));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_access_key_format() {
        assert!(is_access_key("SCWABCDEFGHJK1234567"));
        assert!(!is_access_key("SCW123"));
        assert!(!is_access_key("ABCABCDEFGHJK1234567"));
    }
}
