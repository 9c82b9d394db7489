//! Loading `halldyll.vpn.yaml`.
//!
//! A configuration is read in three steps: `${NAME}` placeholders are
//! replaced from the process environment (so shared keys stay out of the
//! file), the YAML is deserialized, then `HALLDYLL_*` variables override
//! the deployment identity.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, Result, VpnError};

use super::spec::DeployConfig;

/// File names searched for, in order, by [`find_config_file`].
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "halldyll.vpn.yaml",
    "halldyll.vpn.yml",
    "vpn-gateway.yaml",
    "vpn-gateway.yml",
];

type Field = fn(&mut DeployConfig) -> &mut String;

const fn resource_group(c: &mut DeployConfig) -> &mut String {
    &mut c.resource_group_name
}

const fn location(c: &mut DeployConfig) -> &mut String {
    &mut c.location
}

const fn environment(c: &mut DeployConfig) -> &mut String {
    &mut c.environment
}

const fn gateway_name(c: &mut DeployConfig) -> &mut String {
    &mut c.vpn_gateway_name
}

/// Identity fields that an environment variable may replace.
const ENV_OVERRIDES: &[(&str, Field)] = &[
    ("HALLDYLL_RESOURCE_GROUP", resource_group),
    ("HALLDYLL_LOCATION", location),
    ("HALLDYLL_ENVIRONMENT", environment),
    ("HALLDYLL_VPN_GATEWAY_NAME", gateway_name),
];

/// Reads deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Directory holding the config file and its `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a parser rooted at the current directory.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Roots the parser at the directory of the config file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads `.env` from the base directory, if there is one.
    ///
    /// Variables already set in the process win over the file.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the file exists but is malformed.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_deref()
            .unwrap_or_else(|| Path::new("."))
            .join(".env");

        if !env_path.is_file() {
            debug!("No .env at {}", env_path.display());
            return Ok(());
        }

        dotenvy::from_path(&env_path).map_err(|e| {
            VpnError::Config(ConfigError::ParseError {
                message: format!("Invalid .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })
        })?;
        info!("Loaded environment from {}", env_path.display());
        Ok(())
    }

    /// Reads a config file, expands placeholders and applies `HALLDYLL_*` overrides.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound`, a parse error, or `MissingEnvVar` for an
    /// unset placeholder.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VpnError::Config(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                })
            } else {
                VpnError::Config(ConfigError::ParseError {
                    message: format!("Cannot read configuration: {e}"),
                    location: Some(path.display().to_string()),
                })
            }
        })?;
        info!("Loading configuration from {}", path.display());

        let expanded = expand_placeholders(&raw, |name| std::env::var(name).ok())?;
        let mut config = self.parse_yaml(&expanded, Some(path))?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Deserializes a configuration from YAML text, as written.
    ///
    /// # Errors
    ///
    /// Returns a parse error naming `source` when given.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            VpnError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!(
            "Parsed configuration for {}/{}",
            config.resource_group_name, config.vpn_gateway_name
        );
        Ok(config)
    }

    fn apply_env_overrides(config: &mut DeployConfig, lookup: impl Fn(&str) -> Option<String>) {
        for (name, field) in ENV_OVERRIDES {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                debug!("{} overrides the configured value", name);
                *field(config) = value;
            }
        }
    }

    /// Reads a required environment variable.
    ///
    /// # Errors
    ///
    /// Returns `MissingEnvVar` if the variable is unset or empty.
    pub fn required_env(name: &str) -> Result<String> {
        std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                VpnError::Config(ConfigError::MissingEnvVar {
                    name: name.to_string(),
                })
            })
    }
}

/// Replaces every `${NAME}` with `lookup(NAME)`. `$$` escapes a dollar sign.
fn expand_placeholders(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
        } else if let Some(body) = tail.strip_prefix('{') {
            let end = body.find('}').ok_or_else(|| {
                VpnError::Config(ConfigError::ParseError {
                    message: String::from("Unterminated ${ placeholder"),
                    location: None,
                })
            })?;
            let name = &body[..end];
            let value = lookup(name).ok_or_else(|| {
                VpnError::Config(ConfigError::MissingEnvVar {
                    name: name.to_string(),
                })
            })?;
            out.push_str(&value);
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = tail;
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Looks for a config file in `start_dir` and then in each parent.
///
/// # Errors
///
/// Returns `FileNotFound` naming the first default file name.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let absolute = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());

    for dir in absolute.ancestors() {
        if let Some(found) = DEFAULT_CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
        {
            info!("Found configuration file: {}", found.display());
            return Ok(found);
        }
    }

    Err(VpnError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
