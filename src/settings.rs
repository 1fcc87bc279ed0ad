use serde::Deserialize;
use toml;

use crate::error::Error;
use crate::utils::{path_absolute_join, path_absolute_parent, path_join};

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    pub name: String,

    pub log: LoggingSettings,
    pub postgres: PostgresSettings,
    pub server: ServerSettings,
    #[serde(default)]
    pub pagination: PaginationSettings,

    #[serde(skip)]
    pub reldir: String,
}

/// Logging settings
#[derive(Deserialize, Debug, Clone)]
pub struct LoggingSettings {
    /// Directory where to store log messages
    pub dir: String,

    /// Whether to output debug messages.
    pub verbose: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PostgresSettings {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,

    /// Seconds to wait for the database before giving up on a connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u16,

    /// Maximum number of connections the server keeps open.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_connect_timeout() -> u16 {
    10
}

fn default_pool_size() -> u32 {
    10
}

impl PostgresSettings {
    /// libpq keyword/value connection string. Values are quoted so that
    /// passwords with spaces or quotes survive.
    pub fn connection_string(&self) -> String {
        fn quote(v: &str) -> String {
            format!("'{}'", v.replace('\\', "\\\\").replace('\'', "\\'"))
        }
        format!(
            "host={} port={} user={} password={} dbname={} connect_timeout={}",
            quote(&self.host),
            self.port,
            quote(&self.user),
            quote(&self.password),
            quote(&self.dbname),
            self.connect_timeout_seconds
        )
    }
}

/// Settings for the HTTP API
#[derive(Deserialize, Debug, Clone)]
pub struct ServerSettings {
    pub address: String,
    pub port: u16,

    /// Maximum size of a JSON request body, in bytes
    pub max_payload: usize,

    /// Origins allowed to make cross-origin requests. An empty list allows
    /// any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

/// Defaults and bounds for paginated listings
#[derive(Deserialize, Debug, Clone)]
pub struct PaginationSettings {
    /// Page size used when the request does not specify a limit
    pub default_limit: i64,

    /// Larger limits are clamped to this value
    pub max_limit: i64,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        PaginationSettings {
            default_limit: 10,
            max_limit: 100,
        }
    }
}

fn env_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "t" | "yes" | "y" | "1")
}

impl Settings {
    /// Loads settings from the specified path
    pub fn load(path: &str) -> Result<Self, Error> {
        let contents: String = std::fs::read_to_string(path)
            .inspect_err(|e| eprintln!("Could not load settings from \"{path}\": {e}"))?;
        let reldir = path_absolute_parent(path)?;
        Self::parse(&contents, &reldir)
            .inspect_err(|e| eprintln!("Error parsing settings from \"{path}\": {e}"))
    }

    /// Parses settings from a TOML string. Relative paths are resolved
    /// against `reldir`, after which environment overrides are applied.
    pub fn parse(contents: &str, reldir: &str) -> Result<Self, Error> {
        Self::parse_with_env(contents, reldir, |key| std::env::var(key).ok())
    }

    /// Same as [`Settings::parse`], but overrides are looked up through `env`
    /// instead of the process environment.
    pub fn parse_with_env<F>(contents: &str, reldir: &str, env: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut s: Settings = toml::from_str(contents)?;

        s.reldir = reldir.to_string();
        s.log.dir = path_absolute_join(&s.reldir, &s.log.dir)?;

        s.apply_env_overrides(env)?;
        s.validate()?;
        Ok(s)
    }

    fn apply_env_overrides<F>(&mut self, env: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(log_dir) = env("STIKNES_LOG_DIR") {
            self.log.dir = log_dir;
        }
        if let Some(truth_value) = env("STIKNES_LOG_VERBOSE") {
            self.log.verbose = env_truthy(&truth_value);
        }

        // Postgres
        if let Some(user) = env("STIKNES_POSTGRES_USER") {
            self.postgres.user = user;
        }
        if let Some(password) = env("STIKNES_POSTGRES_PASSWORD") {
            self.postgres.password = password;
        }
        if let Some(host) = env("STIKNES_POSTGRES_HOST") {
            self.postgres.host = host;
        }
        if let Some(port) = env("STIKNES_POSTGRES_PORT") {
            self.postgres.port = port
                .parse()
                .map_err(|e| Error::from(format!("Invalid postgres port value \"{port}\": {e}")))?;
        }
        if let Some(dbname) = env("STIKNES_POSTGRES_DBNAME") {
            self.postgres.dbname = dbname;
        }

        // Server
        if let Some(address) = env("STIKNES_SERVER_ADDRESS") {
            self.server.address = address;
        }
        if let Some(port) = env("STIKNES_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| Error::from(format!("Invalid server port value \"{port}\": {e}")))?;
        }
        Ok(())
    }

    /// Checks the values that serde cannot check for us.
    pub fn validate(&self) -> Result<(), Error> {
        if self.pagination.default_limit < 1 {
            return Error::err_string(format!(
                "pagination.default_limit must be at least 1, got {}",
                self.pagination.default_limit
            ));
        }
        if self.pagination.max_limit < self.pagination.default_limit {
            return Error::err_string(format!(
                "pagination.max_limit ({}) must not be smaller than pagination.default_limit ({})",
                self.pagination.max_limit, self.pagination.default_limit
            ));
        }
        if self.postgres.pool_size == 0 {
            return Error::err_str("postgres.pool_size must be at least 1");
        }
        if self.postgres.connect_timeout_seconds == 0 {
            return Error::err_str("postgres.connect_timeout_seconds must be at least 1");
        }
        if self.server.max_payload == 0 {
            return Error::err_str("server.max_payload must be larger than 0");
        }
        Ok(())
    }

    /// Sets up logging for the current process.
    pub fn setup_logging(&self, prockind: &str) -> Result<(), Error> {
        use log::LevelFilter::{Debug, Info};

        std::fs::create_dir_all(&self.log.dir).map_err(|e| {
            eprintln!(
                "Error creating directory {} for the log file: {}",
                &self.log.dir, e
            );
            e.to_string()
        })?;

        let path_logfile = path_join(&self.log.dir, "log.out")?;
        let prockind = prockind.to_string();
        fern::Dispatch::new()
            .format(move |out, message, record| {
                out.finish(format_args!(
                    "[{0} {1} ({4}-{5}) {2}:{3}] {6}",
                    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.target(),
                    record.line().unwrap_or(0),
                    prockind,
                    std::process::id(),
                    message
                ))
            })
            .level(if self.log.verbose { Debug } else { Info })
            .chain(std::io::stderr())
            .chain(
                fern::log_file(&path_logfile).inspect_err(|e| {
                    eprintln!("Error setting up log file {}: {}", &path_logfile, e)
                })?,
            )
            .apply()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asserting::prelude::*;
    use std::io::Write;

    const EXAMPLE_SETTINGS: &str = r#"
name = "stiknes-test"

[log]
dir = "logs"
verbose = false

[postgres]
user = "stiknes"
password = "secret"
host = "127.0.0.1"
port = 1
dbname = "stiknes"
connect_timeout_seconds = 1

[server]
address = "127.0.0.1"
port = 3000
max_payload = 65536
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_defaults() {
        let s = Settings::parse_with_env(EXAMPLE_SETTINGS, "/srv/stiknes", no_env).unwrap();
        assert_that!(&s.name).is_equal_to("stiknes-test");
        assert_that!(s.pagination.default_limit).is_equal_to(10);
        assert_that!(s.pagination.max_limit).is_equal_to(100);
        assert_that!(s.postgres.pool_size).is_equal_to(10);
        assert_that!(s.server.cors_allowed_origins.is_empty()).is_true();
        assert_that!(&s.reldir).is_equal_to("/srv/stiknes");
    }

    #[test]
    fn test_log_dir_is_relative_to_reldir() {
        let s = Settings::parse_with_env(EXAMPLE_SETTINGS, "/srv/stiknes", no_env).unwrap();
        assert_that!(&s.log.dir).is_equal_to("/srv/stiknes/logs");
    }

    #[test]
    fn test_load_uses_settings_file_directory() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(EXAMPLE_SETTINGS.as_bytes()).unwrap();
        let path = f.path().to_str().unwrap().to_string();

        let s = Settings::load(&path).unwrap();
        let parent = f.path().parent().unwrap();
        assert_that!(&s.reldir).is_equal_to(parent.to_str().unwrap());
    }

    #[test]
    fn test_env_overrides() {
        let env = |key: &str| match key {
            "STIKNES_LOG_DIR" => Some(String::from("/var/log/stiknes")),
            "STIKNES_POSTGRES_HOST" => Some(String::from("db.internal")),
            "STIKNES_POSTGRES_PORT" => Some(String::from("5433")),
            "STIKNES_SERVER_PORT" => Some(String::from("8080")),
            _ => None,
        };
        let s = Settings::parse_with_env(EXAMPLE_SETTINGS, "/srv/stiknes", env).unwrap();
        assert_that!(&s.log.dir).is_equal_to("/var/log/stiknes");
        assert_that!(&s.postgres.host).is_equal_to("db.internal");
        assert_that!(s.postgres.port).is_equal_to(5433);
        assert_that!(s.server.port).is_equal_to(8080);
        assert_that!(&s.postgres.user).is_equal_to("stiknes");
    }

    #[test]
    fn test_invalid_port_override_is_rejected() {
        let env = |key: &str| (key == "STIKNES_POSTGRES_PORT").then(|| String::from("fivefour"));
        assert_that!(Settings::parse_with_env(EXAMPLE_SETTINGS, "/tmp", env)).is_err();

        let env = |key: &str| (key == "STIKNES_SERVER_PORT").then(|| String::from("70000"));
        assert_that!(Settings::parse_with_env(EXAMPLE_SETTINGS, "/tmp", env)).is_err();
    }

    #[test]
    fn test_invalid_pagination_is_rejected() {
        let contents = format!(
            "{EXAMPLE_SETTINGS}\n[pagination]\ndefault_limit = 20\nmax_limit = 5\n"
        );
        assert_that!(Settings::parse_with_env(&contents, "/tmp", no_env)).is_err();

        let contents = format!(
            "{EXAMPLE_SETTINGS}\n[pagination]\ndefault_limit = 0\nmax_limit = 5\n"
        );
        assert_that!(Settings::parse_with_env(&contents, "/tmp", no_env)).is_err();
    }

    #[test]
    fn test_zero_pool_size_is_rejected() {
        let contents = EXAMPLE_SETTINGS.replace(
            "connect_timeout_seconds = 1",
            "connect_timeout_seconds = 1\npool_size = 0",
        );
        assert_that!(Settings::parse_with_env(&contents, "/tmp", no_env)).is_err();
    }

    #[test]
    fn test_missing_section_is_an_error() {
        assert_that!(Settings::parse_with_env("name = \"x\"", "/tmp", no_env)).is_err();
    }

    #[test]
    fn test_connection_string_quotes_values() {
        let s = Settings::parse_with_env(EXAMPLE_SETTINGS, "/tmp", no_env).unwrap();
        let mut pg = s.postgres.clone();
        pg.password = String::from("it's secret");
        pg.host = String::from("db");
        pg.port = 5432;
        pg.user = String::from("stiknes");
        pg.dbname = String::from("stiknes");
        assert_that!(pg.connection_string()).is_equal_to(
            "host='db' port=5432 user='stiknes' password='it\\'s secret' dbname='stiknes' connect_timeout=1",
        );
    }

    #[test]
    fn test_env_truthy() {
        assert_that!(env_truthy("Yes")).is_true();
        assert_that!(env_truthy("1")).is_true();
        assert_that!(env_truthy("nope")).is_false();
    }
}
