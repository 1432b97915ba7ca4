//! Hook configuration, read once at startup.
//!
//! Settings come from `git config` under the `hooks.*`, `meta.*` and
//! `gitweb.*` keys. A TOML file can provide defaults with the same keys as
//! tables (`[hooks]`, `[meta]`, `[gitweb]`); anything set in git config wins.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::delivery::{ContentType, Credentials, DeliveryTarget};
use crate::error::{NotifyError, Result};
use crate::git::GitRunner;

/// Flat `section.key -> value` view of every configuration source.
pub type ConfigEntries = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliverySettings {
    pub webhook_url: Option<String>,
    pub webhook_urls: Vec<String>,
    pub auth_user: Option<String>,
    pub auth_password: Option<String>,
    pub auth_realm: Option<String>,
    pub content_type: ContentType,
    pub secret_token: Option<String>,
    pub timeout: Option<Duration>,
    pub debug: bool,
}

impl DeliverySettings {
    /// The single URL first, then the list, in configured order.
    pub fn destinations(&self) -> Vec<&str> {
        self.webhook_url
            .iter()
            .chain(&self.webhook_urls)
            .map(String::as_str)
            .collect()
    }

    pub fn has_destinations(&self) -> bool {
        self.webhook_url.is_some() || !self.webhook_urls.is_empty()
    }

    fn credentials(&self) -> Option<Credentials> {
        self.auth_user.as_ref().map(|user| Credentials {
            user: user.clone(),
            password: self.auth_password.clone().unwrap_or_default(),
        })
    }

    /// One target per destination, all sharing the same auth and encoding.
    pub fn targets(&self) -> Vec<DeliveryTarget> {
        let credentials = self.credentials();
        self.destinations()
            .into_iter()
            .map(|url| DeliveryTarget {
                url: url.to_string(),
                content_type: self.content_type,
                credentials: credentials.clone(),
                realm: self.auth_realm.clone(),
                secret: self.secret_token.clone(),
                timeout: self.timeout,
            })
            .collect()
    }
}

/// Repository metadata overrides; see `repository` for the fallbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaSettings {
    pub url: Option<String>,
    pub commit_url: Option<String>,
    pub compare_url: Option<String>,
    pub description: Option<String>,
    pub owner_name: Option<String>,
    pub owner_email: Option<String>,
    pub gitweb_description: Option<String>,
    pub gitweb_owner: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub delivery: DeliverySettings,
    pub meta: MetaSettings,
}

impl Config {
    /// Reads the optional TOML defaults, then `git config --list`.
    pub async fn load<G: GitRunner>(git: &G, file: Option<&Path>) -> Result<Self> {
        let mut entries = ConfigEntries::new();
        if let Some(path) = file {
            let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
                NotifyError::ConfigError(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            entries.extend(parse_toml_entries(&contents)?);
            debug!("Loaded defaults from {}", path.display());
        }
        let listing = git.run(&["config", "--list", "-z"]).await?;
        entries.extend(parse_config_list(&listing));
        Self::from_entries(&entries)
    }

    pub fn from_entries(entries: &ConfigEntries) -> Result<Self> {
        let get = |key: &str| {
            entries
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let content_type = match get("hooks.webhook-contenttype") {
            Some(value) => value.parse()?,
            None => ContentType::default(),
        };
        let timeout = get("hooks.timeout").map(|v| parse_timeout(&v)).transpose()?;
        let debug = get("hooks.webhook-debug")
            .map(|v| parse_bool(&v))
            .transpose()?
            .unwrap_or(false);
        let webhook_urls = get("hooks.webhookurls")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            delivery: DeliverySettings {
                webhook_url: get("hooks.webhookurl"),
                webhook_urls,
                auth_user: get("hooks.authuser"),
                auth_password: get("hooks.authpassword"),
                auth_realm: get("hooks.authrealm"),
                content_type,
                secret_token: get("hooks.secrettoken"),
                timeout,
                debug,
            },
            meta: MetaSettings {
                url: get("meta.url"),
                commit_url: get("meta.commiturl"),
                compare_url: get("meta.compareurl"),
                description: get("meta.description"),
                owner_name: get("meta.ownername"),
                owner_email: get("meta.owneremail"),
                gitweb_description: get("gitweb.description"),
                gitweb_owner: get("gitweb.owner"),
            },
        })
    }
}

/// Parses `git config --list -z`: NUL-terminated records of `key\nvalue`.
/// Later records override earlier ones, matching git's own precedence.
pub fn parse_config_list(output: &str) -> ConfigEntries {
    output
        .split('\0')
        .filter(|record| !record.is_empty())
        .map(|record| match record.split_once('\n') {
            Some((key, value)) => (key.to_lowercase(), value.to_string()),
            // a bare key is a boolean set to true
            None => (record.to_lowercase(), "true".to_string()),
        })
        .collect()
}

/// Flattens `[section] key = value` tables into `section.key` entries.
pub fn parse_toml_entries(contents: &str) -> Result<ConfigEntries> {
    let table: toml::Table = toml::from_str(contents)?;
    let mut entries = ConfigEntries::new();
    flatten_toml("", &table, &mut entries)?;
    Ok(entries)
}

fn flatten_toml(prefix: &str, table: &toml::Table, entries: &mut ConfigEntries) -> Result<()> {
    for (key, value) in table {
        let name = if prefix.is_empty() {
            key.to_lowercase()
        } else {
            format!("{}.{}", prefix, key.to_lowercase())
        };
        let scalar = match value {
            toml::Value::Table(inner) => {
                flatten_toml(&name, inner, entries)?;
                continue;
            }
            toml::Value::String(s) => s.clone(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    toml::Value::String(s) => Ok(s.clone()),
                    other => Err(NotifyError::ConfigError(format!(
                        "'{}' may only list strings, found {}",
                        name, other
                    ))),
                })
                .collect::<Result<Vec<_>>>()?
                .join(","),
            toml::Value::Datetime(d) => d.to_string(),
        };
        entries.insert(name, scalar);
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(NotifyError::ConfigError(format!(
            "expected a boolean, found '{}'",
            other
        ))),
    }
}

fn parse_timeout(value: &str) -> Result<Duration> {
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| {
            NotifyError::ConfigError(format!("hooks.timeout must be positive seconds, found '{}'", value))
        })
}
