//! Service configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use common::{Tenant, TenantError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("invalid process tenant: {0}")]
    Tenant(#[from] TenantError),

    /// Some of the tenant variables are set and some are not.
    #[error("incomplete process tenant: {0} is not set")]
    IncompleteTenant(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Service configuration.
///
/// | Variable | Default |
/// |---|---|
/// | `HOST` | `0.0.0.0` |
/// | `PORT` | `8080` |
/// | `TENANT_ID`, `REGION`, `MAJOR_VERSION`, `MINOR_VERSION` | unset |
/// | `DATABASE_URL` | unset, sagas kept in memory |
/// | `HTTP_CLIENT_TIMEOUT` | `5000` ms |
/// | `SAGA_STEP_TIMEOUT` | `30000` ms |
/// | `SAGA_SWEEP_INTERVAL` | `1000` ms |
/// | `BUS_PARTITIONS` | `8` |
/// | `CONVERSATION_DIR` | unset |
/// | `SAGA_ORCHESTRATOR_HOST` | unset, conversations use the local orchestrator |
/// | `LOG_FORMAT` | `pretty` (`json` for JSON lines) |
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Installed as the process tenant; graphs from `conversation_dir` are
    /// installed for it.
    pub tenant: Option<Tenant>,
    pub database_url: Option<String>,
    pub http_client_timeout: Duration,
    pub step_timeout: Duration,
    pub sweep_interval: Duration,
    pub bus_partitions: usize,
    /// Directory of NPC conversation graphs (`*.json`) installed for the
    /// process tenant at startup.
    pub conversation_dir: Option<PathBuf>,
    /// Remote orchestrator for conversation sagas.
    pub saga_orchestrator_host: Option<String>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tenant: None,
            database_url: None,
            http_client_timeout: Duration::from_millis(5000),
            step_timeout: Duration::from_millis(30_000),
            sweep_interval: Duration::from_millis(1000),
            bus_partitions: 8,
            conversation_dir: None,
            saga_orchestrator_host: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any variable source. Unset and empty
    /// variables take their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parsed(&var, "PORT")?.unwrap_or(defaults.port),
            tenant: tenant(&var)?,
            database_url: var("DATABASE_URL"),
            http_client_timeout: millis(&var, "HTTP_CLIENT_TIMEOUT")?.unwrap_or(defaults.http_client_timeout),
            step_timeout: millis(&var, "SAGA_STEP_TIMEOUT")?.unwrap_or(defaults.step_timeout),
            sweep_interval: millis(&var, "SAGA_SWEEP_INTERVAL")?.unwrap_or(defaults.sweep_interval),
            bus_partitions: parsed::<usize>(&var, "BUS_PARTITIONS")?
                .filter(|p| *p > 0)
                .unwrap_or(defaults.bus_partitions),
            conversation_dir: var("CONVERSATION_DIR").map(PathBuf::from),
            saga_orchestrator_host: var("SAGA_ORCHESTRATOR_HOST"),
            log_format: match var("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase).as_deref() {
                None | Some("pretty") | Some("text") => LogFormat::Pretty,
                Some("json") => LogFormat::Json,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        key: "LOG_FORMAT",
                        value: other.to_string(),
                    });
                }
            },
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    var(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::Invalid { key, value })
        })
        .transpose()
}

fn millis(var: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(parsed::<u64>(var, key)?.map(Duration::from_millis))
}

fn tenant(var: &impl Fn(&str) -> Option<String>) -> Result<Option<Tenant>, ConfigError> {
    const KEYS: [&str; 4] = ["TENANT_ID", "REGION", "MAJOR_VERSION", "MINOR_VERSION"];
    let values: Vec<Option<String>> = KEYS.iter().map(|k| var(*k)).collect();
    if values.iter().all(Option::is_none) {
        return Ok(None);
    }
    if let Some((missing, _)) = KEYS.iter().zip(&values).find(|(_, v)| v.is_none()) {
        return Err(ConfigError::IncompleteTenant(*missing));
    }
    let value = |i: usize| values[i].as_deref().unwrap_or_default();
    Ok(Some(Tenant::parse(value(0), value(1), value(2), value(3))?))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:8080");
        assert!(config.tenant.is_none());
        assert!(config.database_url.is_none());
        assert_eq!(config.step_timeout, Duration::from_secs(30));
        assert_eq!(config.bus_partitions, 8);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("DATABASE_URL", "postgres://localhost/sagas"),
            ("SAGA_STEP_TIMEOUT", "250"),
            ("LOG_FORMAT", "JSON"),
            ("TENANT_ID", "083839c6-c47c-42a6-9585-76492795d123"),
            ("REGION", "GMS"),
            ("MAJOR_VERSION", "83"),
            ("MINOR_VERSION", "1"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/sagas"));
        assert_eq!(config.step_timeout, Duration::from_millis(250));
        assert_eq!(config.log_format, LogFormat::Json);
        let tenant = config.tenant.unwrap();
        assert_eq!(tenant.region(), "GMS");
        assert_eq!(tenant.major_version(), 83);
    }

    #[test]
    fn malformed_number_is_rejected() {
        let err = Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn partial_tenant_is_rejected() {
        let err = Config::from_lookup(lookup(&[("TENANT_ID", "083839c6-c47c-42a6-9585-76492795d123")])).unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteTenant("REGION")));
    }
}
