//! Configuration management for the backup daemon.
//!
//! Settings are layered: built-in defaults, an optional TOML file, the
//! process environment (with `.env` support), and finally CLI overrides
//! applied by the binary. The result is an immutable [`AppConfig`] that is
//! built once at startup and shared by `Arc`.

use crate::utils::errors::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_cron_scheduler::Job;

const DEFAULT_BACKUP_DIR: &str = "db";
const DEFAULT_DUMP_BINARY: &str = "mariadb-dump";
const DEFAULT_SCHEDULE: &str = "0 * * * *";
const DEFAULT_LOG_LEVEL: &str = "info";

/// A credential that must never be printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw value, only for handing to the child process.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// How the dump utility receives the database password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordVia {
    /// `MYSQL_PWD` in the child's environment only.
    Env,
    /// `--password=...` on the argument list.
    Arg,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub dump: DumpConfig,

    /// Webhook receiving status embeds
    pub webhook_url: String,

    /// Directory where `.sql` artifacts land
    pub backup_dir: PathBuf,

    /// Six-field cron expression (seconds first)
    pub schedule: String,

    /// Append a random `_g1234` tag to artifact names and messages
    pub job_tags: bool,

    /// Permit concurrent jobs for the same database
    pub allow_overlap: bool,

    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: String,
    pub password: Secret,

    /// Primary database, used when a trigger names none
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub binary: String,
    pub password_via: PasswordVia,

    /// `None` waits for the dump indefinitely.
    pub timeout: Option<Duration>,
}

/// One configuration layer. Every field is optional so layers can be merged.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    pub db_host: Option<String>,
    pub db_port: Option<u16>,
    pub db_user: Option<String>,
    pub db_password: Option<Secret>,
    pub db_name: Option<String>,
    pub webhook_url: Option<String>,
    pub backup_dir: Option<PathBuf>,
    pub dump_binary: Option<String>,
    pub backup_schedule: Option<String>,
    pub dump_timeout_secs: Option<u64>,
    pub password_via: Option<String>,
    pub job_tags: Option<bool>,
    pub allow_overlap: Option<bool>,
    pub log_level: Option<String>,
}

impl RawConfig {
    /// Load a layer from a TOML file whose keys mirror the lower-cased
    /// environment names (`db_user`, `webhook_url`, ...).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load a layer from environment-style key lookups.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            db_host: get("DB_HOST"),
            db_port: parse_opt(get("DB_PORT"), "DB_PORT")?,
            db_user: get("DB_USER"),
            db_password: get("DB_PASSWORD").map(Secret::new),
            db_name: get("DB_NAME"),
            webhook_url: get("WEBHOOK_URL"),
            backup_dir: get("BACKUP_DIR").map(PathBuf::from),
            dump_binary: get("DUMP_BINARY"),
            backup_schedule: get("BACKUP_SCHEDULE"),
            dump_timeout_secs: parse_opt(get("DUMP_TIMEOUT_SECS"), "DUMP_TIMEOUT_SECS")?,
            password_via: get("PASSWORD_VIA"),
            job_tags: parse_bool(get("JOB_TAGS"), "JOB_TAGS")?,
            allow_overlap: parse_bool(get("ALLOW_OVERLAP"), "ALLOW_OVERLAP")?,
            log_level: get("LOG_LEVEL"),
        })
    }

    /// Values set in `other` win.
    pub fn merge(self, other: RawConfig) -> RawConfig {
        RawConfig {
            db_host: other.db_host.or(self.db_host),
            db_port: other.db_port.or(self.db_port),
            db_user: other.db_user.or(self.db_user),
            db_password: other.db_password.or(self.db_password),
            db_name: other.db_name.or(self.db_name),
            webhook_url: other.webhook_url.or(self.webhook_url),
            backup_dir: other.backup_dir.or(self.backup_dir),
            dump_binary: other.dump_binary.or(self.dump_binary),
            backup_schedule: other.backup_schedule.or(self.backup_schedule),
            dump_timeout_secs: other.dump_timeout_secs.or(self.dump_timeout_secs),
            password_via: other.password_via.or(self.password_via),
            job_tags: other.job_tags.or(self.job_tags),
            allow_overlap: other.allow_overlap.or(self.allow_overlap),
            log_level: other.log_level.or(self.log_level),
        }
    }
}

fn parse_opt<T: std::str::FromStr>(
    value: Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: fmt::Display,
{
    value
        .map(|v| {
            v.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                reason: format!("{:?}: {}", v, e),
            })
        })
        .transpose()
}

fn parse_bool(value: Option<String>, key: &'static str) -> Result<Option<bool>, ConfigError> {
    value
        .map(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid {
                key,
                reason: format!("expected a boolean, got {:?}", other),
            }),
        })
        .transpose()
}

/// Accept classic five-field cron (`0 * * * *`) and the scheduler's
/// seconds-first six/seven-field form. Five-field input fires at second 0.
/// The result is checked with the scheduler's own parser.
pub fn normalize_schedule(expr: &str) -> Result<String, ConfigError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        n => {
            return Err(ConfigError::Invalid {
                key: "BACKUP_SCHEDULE",
                reason: format!("expected 5 to 7 cron fields, got {} in {:?}", n, expr),
            })
        }
    };

    if let Err(e) = Job::new_async(normalized.as_str(), |_uuid, _lock| Box::pin(async {})) {
        return Err(ConfigError::Invalid {
            key: "BACKUP_SCHEDULE",
            reason: format!("{:?}: {}", expr, e),
        });
    }

    Ok(normalized)
}

impl AppConfig {
    /// Build the configuration from an optional TOML file plus the process
    /// environment. A `.env` file in the working directory is honoured.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let file_layer = match config_file {
            Some(path) => RawConfig::from_file(path)?,
            None => RawConfig::default(),
        };
        let env_layer = RawConfig::from_lookup(|key| std::env::var(key).ok())?;

        Self::from_raw(file_layer.merge(env_layer))
    }

    /// Validate a merged layer and fill in defaults.
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let user = raw.db_user.ok_or(ConfigError::Missing("DB_USER"))?;
        let password = raw.db_password.ok_or(ConfigError::Missing("DB_PASSWORD"))?;
        let name = raw.db_name.ok_or(ConfigError::Missing("DB_NAME"))?;
        let webhook_url = raw.webhook_url.ok_or(ConfigError::Missing("WEBHOOK_URL"))?;

        if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                key: "WEBHOOK_URL",
                reason: "must be an http(s) URL".to_string(),
            });
        }

        let password_via = match raw.password_via.as_deref().map(str::trim) {
            None | Some("env") => PasswordVia::Env,
            Some("arg") => PasswordVia::Arg,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "PASSWORD_VIA",
                    reason: format!("expected \"env\" or \"arg\", got {:?}", other),
                })
            }
        };

        let timeout = match raw.dump_timeout_secs {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        };

        let schedule =
            normalize_schedule(raw.backup_schedule.as_deref().unwrap_or(DEFAULT_SCHEDULE))?;

        Ok(Self {
            database: DatabaseConfig {
                host: raw.db_host,
                port: raw.db_port,
                user,
                password,
                name,
            },
            dump: DumpConfig {
                binary: raw
                    .dump_binary
                    .unwrap_or_else(|| DEFAULT_DUMP_BINARY.to_string()),
                password_via,
                timeout,
            },
            webhook_url,
            backup_dir: raw
                .backup_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
            schedule,
            job_tags: raw.job_tags.unwrap_or(true),
            allow_overlap: raw.allow_overlap.unwrap_or(false),
            log_level: raw
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }

    /// Create the backup directory if it does not exist yet.
    pub fn ensure_backup_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.backup_dir)
    }
}
