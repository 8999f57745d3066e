use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::validation;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub probes: ProbeSettings,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
    pub flags: FlagsConfig,
    pub regions: Vec<RegionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// libsql database file holding probe results
    pub path: path::PathBuf,
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: path::PathBuf::from("regionpulse.db"), pool_size: 8 }
    }
}

/// Timeouts and default parameters applied by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Bound on a single connection attempt (and each latency iteration)
    pub connect_timeout_secs: u64,
    /// Bound on a whole probe call
    pub deadline_secs: u64,
    pub default_iterations: u32,
    pub default_concurrency: u32,
    pub max_concurrent_per_region: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            deadline_secs: 30,
            default_iterations: 5,
            default_concurrency: 10,
            max_concurrent_per_region: 4,
        }
    }
}

impl ProbeSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Longest retention horizon accepted, about ten years
pub const MAX_HORIZON_DAYS: u64 = 3650;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub horizon_days: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { horizon_days: 7, sweep_interval_secs: 3600 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

/// Static enablement answers used when no external flag service is wired in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagsConfig {
    pub load_testing: bool,
    pub health_checks: bool,
    pub test_all_regions: bool,
    pub disabled_regions: Vec<String>,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            load_testing: true,
            health_checks: true,
            test_all_regions: true,
            disabled_regions: Vec::new(),
        }
    }
}

/// Region entry as written in the config file
///
/// The endpoint is given either as a `url` (`postgres://user@host:port/db`) or
/// through the discrete `host`/`port`/`database`/`user` keys. The password is
/// never stored here, only the name of the environment variable holding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub id: String,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    /// `disable` or `require`; a `sslmode` query parameter in `url` wins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<path::PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

fn default_true() -> bool {
    true
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/regionpulse/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("regionpulse/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Configuration:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Pool Size", &self.database.pool_size)?;
        write_title_1(f, "Probes")?;
        write_1(f, "Connect Timeout (s)", &self.probes.connect_timeout_secs)?;
        write_1(f, "Deadline (s)", &self.probes.deadline_secs)?;
        write_1(f, "Default Iterations", &self.probes.default_iterations)?;
        write_1(f, "Default Concurrency", &self.probes.default_concurrency)?;
        write_1(f, "Max Concurrent Per Region", &self.probes.max_concurrent_per_region)?;
        write_title_1(f, "Retention")?;
        write_1(f, "Horizon (days)", &self.retention.horizon_days)?;
        write_1(f, "Sweep Interval (s)", &self.retention.sweep_interval_secs)?;
        write_title_1(f, "Flags")?;
        write_1(f, "Load Testing", &self.flags.load_testing)?;
        write_1(f, "Health Checks", &self.flags.health_checks)?;
        write_1(f, "Test All Regions", &self.flags.test_all_regions)?;
        write_title_1(f, "Regions")?;
        for region in &self.regions {
            write_1(f, &region.id, &region.display_name)?;
            let target = match (&region.url, &region.host) {
                (Some(_), _) => "<url>".to_string(),
                (None, Some(host)) => format!("{}:{}", host, region.port.unwrap_or(5432)),
                (None, None) => "<missing>".to_string(),
            };
            write_2(f, "Endpoint", &target)?;
            write_2(f, "Enabled", &region.enabled)?;
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/regionpulse/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            Self::from_toml(&raw_string)?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, Error> {
        Ok(toml::from_str(raw)?)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.database.pool_size == 0 {
            return Err(Error::Invalid("database.pool_size must be at least 1".into()));
        }
        validation::validate_timeout(self.probes.connect_timeout_secs)
            .map_err(|e| Error::Invalid(format!("probes.connect_timeout_secs: {e}")))?;
        validation::validate_timeout(self.probes.deadline_secs)
            .map_err(|e| Error::Invalid(format!("probes.deadline_secs: {e}")))?;
        if self.probes.deadline_secs < self.probes.connect_timeout_secs {
            return Err(Error::Invalid(format!(
                "probes.deadline_secs ({}) must not be shorter than probes.connect_timeout_secs ({})",
                self.probes.deadline_secs, self.probes.connect_timeout_secs
            )));
        }
        if self.probes.max_concurrent_per_region == 0 {
            return Err(Error::Invalid("probes.max_concurrent_per_region must be at least 1".into()));
        }
        if !(1..=MAX_HORIZON_DAYS).contains(&self.retention.horizon_days) {
            return Err(Error::Invalid(format!(
                "retention.horizon_days must be between 1 and {MAX_HORIZON_DAYS}"
            )));
        }
        if self.retention.sweep_interval_secs == 0 {
            return Err(Error::Invalid("retention.sweep_interval_secs must be at least 1".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for region in &self.regions {
            if region.id.trim().is_empty() {
                return Err(Error::Invalid("region id cannot be empty".into()));
            }
            if !seen.insert(region.id.as_str()) {
                return Err(Error::Invalid(format!("duplicate region id: {}", region.id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[database]
path = "/var/lib/regionpulse/results.db"

[probes]
deadline_secs = 20

[flags]
load_testing = false
disabled_regions = ["asia-pacific"]

[[regions]]
id = "us-east"
display_name = "US East"
url = "postgres://avnadmin@pg-us-east.example.com:12345/defaultdb?sslmode=require"
password_env = "US_EAST_PASSWORD"
latitude = 39.04
longitude = -77.49

[[regions]]
id = "eu-west"
display_name = "EU West"
host = "pg-eu-west.example.com"
database = "defaultdb"
user = "avnadmin"
enabled = false
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.database.path, path::PathBuf::from("/var/lib/regionpulse/results.db"));
        assert_eq!(config.database.pool_size, 8);
        assert_eq!(config.probes.deadline_secs, 20);
        assert_eq!(config.probes.connect_timeout_secs, 10);
        assert!(!config.flags.load_testing);
        assert!(config.flags.health_checks);
        assert_eq!(config.regions.len(), 2);
        assert!(config.regions[0].enabled);
        assert!(!config.regions[1].enabled);
        assert_eq!(config.retention.horizon_days, 7);
        config.validate().unwrap();
    }

    #[test]
    fn test_duplicate_region_ids_rejected() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        let duplicate = config.regions[0].clone();
        config.regions.push(duplicate);
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_out_of_range_deadline_rejected() {
        let mut config = Config::default();
        config.probes.deadline_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deadline_shorter_than_connect_timeout_rejected() {
        let mut config = Config::default();
        config.probes.connect_timeout_secs = 5;
        config.probes.deadline_secs = 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("probes.deadline_secs"));

        config.probes.deadline_secs = 5;
        config.validate().unwrap();
    }

    #[test]
    fn test_horizon_days_capped() {
        let mut config = Config::default();
        config.retention.horizon_days = MAX_HORIZON_DAYS;
        config.validate().unwrap();

        config.retention.horizon_days = MAX_HORIZON_DAYS + 1;
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));
        config.retention.horizon_days = 1_000_000_000_000_000;
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_default_config_written_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config");
        let config = Config::from_config(Some(&path)).unwrap();

        let written = dir.path().join("nested").join("config.toml");
        assert!(written.exists());
        assert!(config.regions.is_empty());

        let reloaded = Config::from_config(Some(&written)).unwrap();
        assert_eq!(reloaded.probes, config.probes);
    }

    #[test]
    fn test_display_hides_urls() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let rendered = config.to_string();
        assert!(rendered.contains("US East"));
        assert!(rendered.contains("pg-eu-west.example.com:5432"));
        assert!(!rendered.contains("avnadmin@"));
    }
}
