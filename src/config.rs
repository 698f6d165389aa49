/// Supervisor configuration
///
/// Layered loading: built-in defaults, then an optional TOML/JSON/YAML file,
/// then `SUPERVISOR_*` environment variables. Durations accept humantime
/// strings (`"30s"`, `"1m 30s"`) or plain integer seconds.
use crate::{SupervisorError, SupervisorResult, PRIMARY_STORE, SECONDARY_STORE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default interval between health-check cycles
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Default budget for one round of health checks
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default budget for a single recovery attempt
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Consecutive failures before a component qualifies for recovery
pub const DEFAULT_RECOVERY_THRESHOLD: u32 = 3;

/// Environment variable prefix
const ENV_PREFIX: &str = "SUPERVISOR";

/// Paths of the embedded SQLite stores watched by the built-in checks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub primary: Option<PathBuf>,
    pub secondary: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    #[serde(with = "duration_format")]
    pub check_interval: Duration,

    #[serde(with = "duration_format")]
    pub check_timeout: Duration,

    #[serde(with = "duration_format")]
    pub recovery_timeout: Duration,

    pub recovery_threshold: u32,

    /// Components whose failure escalates straight to Emergency
    pub critical_components: Vec<String>,

    pub stores: StoreConfig,

    pub backup_dir: PathBuf,

    /// Backups kept per store by `prune`
    pub backup_retention: usize,

    /// Recovery outcomes retained for status reporting
    pub recovery_history: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            recovery_threshold: DEFAULT_RECOVERY_THRESHOLD,
            critical_components: vec![PRIMARY_STORE.to_string(), SECONDARY_STORE.to_string()],
            stores: StoreConfig::default(),
            backup_dir: PathBuf::from("backups"),
            backup_retention: 7,
            recovery_history: 50,
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from defaults, an optional file and the environment
    ///
    /// When `path` is `None` the per-user config file is used if it exists.
    pub fn load(path: Option<&Path>) -> SupervisorResult<Self> {
        let file = path.map(Path::to_path_buf).or_else(Self::default_config_path);

        let mut builder = ::config::Config::builder();

        if let Some(file) = file {
            tracing::debug!(path = %file.display(), "Loading supervisor configuration file");
            // An explicit path must exist, the per-user default is optional
            builder = builder.add_source(::config::File::from(file).required(path.is_some()));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: SupervisorConfig = settings.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Per-user configuration file location
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "service-supervisor")
            .map(|dirs| dirs.config_dir().join("supervisor.toml"))
    }

    /// Reject settings the background cycle cannot run with
    pub fn validate(&self) -> SupervisorResult<()> {
        if self.check_interval.is_zero() {
            return Err(SupervisorError::InvalidConfig(
                "check_interval must be greater than zero".to_string(),
            ));
        }
        if self.check_timeout.is_zero() {
            return Err(SupervisorError::InvalidConfig(
                "check_timeout must be greater than zero".to_string(),
            ));
        }
        if self.recovery_timeout.is_zero() {
            return Err(SupervisorError::InvalidConfig(
                "recovery_timeout must be greater than zero".to_string(),
            ));
        }
        if self.recovery_threshold == 0 {
            return Err(SupervisorError::InvalidConfig(
                "recovery_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_format {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration such as \"30s\" or a number of seconds")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            humantime::parse_duration(value.trim()).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration must not be negative"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml_file() -> NamedTempFile {
        tempfile::Builder::new().suffix(".toml").tempfile().unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = SupervisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.check_timeout, Duration::from_secs(10));
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.recovery_threshold, 3);
        assert!(config.critical_components.contains(&PRIMARY_STORE.to_string()));
        assert!(config.critical_components.contains(&SECONDARY_STORE.to_string()));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = SupervisorConfig {
            check_interval: Duration::ZERO,
            ..SupervisorConfig::default()
        };
        assert!(config.validate().is_err());

        config.check_interval = Duration::from_secs(1);
        config.recovery_threshold = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("recovery_threshold"));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = toml_file();
        writeln!(
            file,
            r#"
check_interval = "5s"
recovery_threshold = 5
critical_components = ["database"]

[stores]
primary = "/var/lib/app/main.db"
"#
        )
        .unwrap();

        let config = SupervisorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.check_interval, Duration::from_secs(5));
        assert_eq!(config.recovery_threshold, 5);
        assert_eq!(config.critical_components, vec!["database".to_string()]);
        assert_eq!(
            config.stores.primary,
            Some(PathBuf::from("/var/lib/app/main.db"))
        );
        // Untouched keys keep their defaults
        assert_eq!(config.recovery_timeout, DEFAULT_RECOVERY_TIMEOUT);
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let mut file = toml_file();
        writeln!(file, "check_interval = \"5s\"").unwrap();

        std::env::set_var("SUPERVISOR_CHECK_INTERVAL", "1m");
        let result = SupervisorConfig::load(Some(file.path()));
        std::env::remove_var("SUPERVISOR_CHECK_INTERVAL");

        assert_eq!(result.unwrap().check_interval, Duration::from_secs(60));
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_an_error() {
        let result = SupervisorConfig::load(Some(Path::new("/nonexistent/supervisor.toml")));
        assert!(matches!(result, Err(SupervisorError::ConfigLoad(_))));
    }

    #[test]
    fn test_duration_accepts_integer_seconds() {
        let config: SupervisorConfig =
            serde_json::from_str(r#"{"check_timeout": 15}"#).unwrap();
        assert_eq!(config.check_timeout, Duration::from_secs(15));
    }
}
