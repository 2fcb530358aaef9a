//! Backup job description: artifact naming and dump command construction.

use crate::config::{AppConfig, PasswordVia, Secret};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt;
use std::path::PathBuf;

/// Environment variable the MariaDB/MySQL client tools read the password from.
pub const PASSWORD_ENV: &str = "MYSQL_PWD";

/// Short random number used to correlate log lines, notifications and the
/// artifact. Collisions are harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTag(u16);

impl JobTag {
    /// Random four-digit tag (1000..=9999).
    pub fn random() -> Self {
        Self(rand::thread_rng().gen_range(1000..=9999))
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl From<u16> for JobTag {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A single backup attempt. Built at trigger time and never mutated.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub database: String,
    pub user: String,
    pub password: Secret,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub tag: Option<JobTag>,
}

impl BackupJob {
    /// Build a job for `database` from the shared configuration, stamped now.
    pub fn new(config: &AppConfig, database: &str) -> Self {
        Self::at(config, database, Utc::now())
    }

    pub fn at(config: &AppConfig, database: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            database: database.to_string(),
            user: config.database.user.clone(),
            password: config.database.password.clone(),
            host: config.database.host.clone(),
            port: config.database.port,
            output_dir: config.backup_dir.clone(),
            started_at,
            tag: config.job_tags.then(JobTag::random),
        }
    }

    /// `<dir>/<database>_backup_<timestamp>[_g<tag>].sql`
    pub fn artifact_path(&self) -> PathBuf {
        let timestamp = sanitize_timestamp(&self.started_at);
        let file_name = match self.tag {
            Some(tag) => format!("{}_backup_{}_{}.sql", self.database, timestamp, tag),
            None => format!("{}_backup_{}.sql", self.database, timestamp),
        };
        self.output_dir.join(file_name)
    }

    /// Label used in logs and notifications, e.g. `shop (g1234)`.
    pub fn label(&self) -> String {
        match self.tag {
            Some(tag) => format!("{} ({})", self.database, tag),
            None => self.database.clone(),
        }
    }

    /// Argument list for the dump utility. The password goes into the
    /// child's environment unless `PasswordVia::Arg` is configured.
    pub fn dump_command(&self, binary: &str, password_via: PasswordVia) -> DumpCommand {
        let mut args = vec![format!("--user={}", self.user)];
        if let Some(host) = &self.host {
            args.push(format!("--host={}", host));
        }
        if let Some(port) = self.port {
            args.push(format!("--port={}", port));
        }

        let mut secret_arg = None;
        let mut env = Vec::new();
        match password_via {
            PasswordVia::Env => env.push((PASSWORD_ENV.to_string(), self.password.clone())),
            PasswordVia::Arg => {
                secret_arg = Some(args.len());
                args.push(format!("--password={}", self.password.expose()));
            }
        }
        args.push(self.database.clone());

        DumpCommand {
            program: binary.to_string(),
            args,
            env,
            secret_arg,
        }
    }
}

/// ISO-8601 with millisecond precision and the characters that are illegal
/// (or awkward) in file names replaced: `2024-05-01T13-00-00-123Z`.
pub fn sanitize_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
        .replace([':', '.'], "-")
}

/// Structured command invocation; no shell is involved.
#[derive(Clone)]
pub struct DumpCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, Secret)>,
    /// Index into `args` holding a credential, redacted when displayed.
    secret_arg: Option<usize>,
}

impl DumpCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            secret_arg: None,
        }
    }
}

impl fmt::Display for DumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for (i, arg) in self.args.iter().enumerate() {
            if Some(i) == self.secret_arg {
                f.write_str(" --password=***")?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DumpCommand({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfig;
    use chrono::TimeZone;

    fn config(job_tags: bool) -> AppConfig {
        let mut config = AppConfig::from_raw(RawConfig {
            db_user: Some("backup".into()),
            db_password: Some(Secret::new("s3cret")),
            db_name: Some("shop".into()),
            webhook_url: Some("http://localhost/hook".into()),
            backup_dir: Some(PathBuf::from("/srv/db")),
            ..RawConfig::default()
        })
        .unwrap();
        config.job_tags = job_tags;
        config
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 7).unwrap()
            + chrono::Duration::milliseconds(42)
    }

    #[test]
    fn test_sanitize_timestamp() {
        assert_eq!(sanitize_timestamp(&fixed_time()), "2024-05-01T13-00-07-042Z");
    }

    #[test]
    fn test_artifact_path_without_tag() {
        let job = BackupJob::at(&config(false), "shop", fixed_time());
        assert_eq!(job.tag, None);
        assert_eq!(
            job.artifact_path(),
            PathBuf::from("/srv/db/shop_backup_2024-05-01T13-00-07-042Z.sql")
        );
        assert_eq!(job.label(), "shop");
    }

    #[test]
    fn test_artifact_path_with_tag() {
        let mut job = BackupJob::at(&config(true), "orders", fixed_time());
        job.tag = Some(JobTag::from(4821));
        assert_eq!(
            job.artifact_path(),
            PathBuf::from("/srv/db/orders_backup_2024-05-01T13-00-07-042Z_g4821.sql")
        );
        assert_eq!(job.label(), "orders (g4821)");
    }

    #[test]
    fn test_distinct_timestamps_give_distinct_paths() {
        let config = config(false);
        let a = BackupJob::at(&config, "shop", fixed_time());
        let b = BackupJob::at(&config, "shop", fixed_time() + chrono::Duration::milliseconds(1));
        assert_ne!(a.artifact_path(), b.artifact_path());
    }

    #[test]
    fn test_random_tag_is_four_digits() {
        for _ in 0..200 {
            let tag = JobTag::random();
            assert!((1000..=9999).contains(&tag.value()));
            assert_eq!(tag.to_string().len(), 5);
        }
    }

    #[test]
    fn test_dump_command_password_in_env() {
        let job = BackupJob::at(&config(false), "shop", fixed_time());
        let cmd = job.dump_command("mariadb-dump", PasswordVia::Env);

        assert_eq!(cmd.program, "mariadb-dump");
        assert_eq!(cmd.args, vec!["--user=backup", "shop"]);
        assert_eq!(cmd.env.len(), 1);
        assert_eq!(cmd.env[0].0, PASSWORD_ENV);
        assert_eq!(cmd.env[0].1.expose(), "s3cret");
        assert!(!cmd.to_string().contains("s3cret"));
    }

    #[test]
    fn test_dump_command_password_as_argument_is_redacted() {
        let mut job = BackupJob::at(&config(false), "shop", fixed_time());
        job.host = Some("db.internal".into());
        job.port = Some(3307);
        let cmd = job.dump_command("mysqldump", PasswordVia::Arg);

        assert_eq!(
            cmd.args,
            vec![
                "--user=backup",
                "--host=db.internal",
                "--port=3307",
                "--password=s3cret",
                "shop"
            ]
        );
        assert!(cmd.env.is_empty());
        assert_eq!(
            cmd.to_string(),
            "mysqldump --user=backup --host=db.internal --port=3307 --password=*** shop"
        );
        assert!(!format!("{:?}", cmd).contains("s3cret"));
    }

    #[test]
    fn test_database_name_passed_verbatim() {
        let job = BackupJob::at(&config(false), "legacy db", fixed_time());
        let cmd = job.dump_command("mariadb-dump", PasswordVia::Env);
        assert_eq!(cmd.args.last().map(String::as_str), Some("legacy db"));
    }
}
