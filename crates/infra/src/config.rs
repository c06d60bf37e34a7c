//! Service configuration, read from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use contractdesk_ai::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL};

use crate::admission::AdmissionPolicy;
use crate::jobs::OrchestratorSettings;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres URL. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Redis URL. `None` selects the in-memory cache.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub admission: AdmissionPolicy,
    pub document_text_ttl: Duration,
    pub store_timeout: Duration,
    pub collaborator_timeout: Duration,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    /// Age after which a `running` job is considered abandoned. `None` disables the sweeper.
    pub stale_job_timeout: Option<Duration>,
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            redis_url: None,
            key_prefix: "contractdesk".to_string(),
            admission: AdmissionPolicy::default(),
            document_text_ttl: Duration::from_secs(30 * 60),
            store_timeout: Duration::from_secs(10),
            collaborator_timeout: Duration::from_secs(120),
            openai_api_key: None,
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            openai_model: DEFAULT_MODEL.to_string(),
            stale_job_timeout: None,
            log_format: "json".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let admission = AdmissionPolicy {
            limit: parse_or(&get, "RATE_LIMIT_MAX", defaults.admission.limit)?,
            window: secs_or(&get, "RATE_LIMIT_WINDOW_SECS", defaults.admission.window)?,
        };

        let config = Self {
            bind_addr: parse_or(&get, "BIND_ADDR", defaults.bind_addr)?,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            key_prefix: get("KEY_PREFIX").unwrap_or(defaults.key_prefix),
            admission,
            document_text_ttl: secs_or(&get, "DOCUMENT_TEXT_TTL_SECS", defaults.document_text_ttl)?,
            store_timeout: secs_or(&get, "STORE_TIMEOUT_SECS", defaults.store_timeout)?,
            collaborator_timeout: secs_or(
                &get,
                "COLLABORATOR_TIMEOUT_SECS",
                defaults.collaborator_timeout,
            )?,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            stale_job_timeout: match get("STALE_JOB_TIMEOUT_SECS") {
                Some(raw) => Some(parse_secs("STALE_JOB_TIMEOUT_SECS", &raw)?),
                None => None,
            },
            log_format: get("LOG_FORMAT").unwrap_or(defaults.log_format),
        };
        config.check_stale_job_timeout()?;
        Ok(config)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            store_timeout: self.store_timeout,
            collaborator_timeout: self.collaborator_timeout,
            document_text_ttl: self.document_text_ttl,
        }
    }

    /// A job that is still running must never look abandoned.
    fn check_stale_job_timeout(&self) -> Result<(), ConfigError> {
        let Some(stale) = self.stale_job_timeout else {
            return Ok(());
        };
        let longest = self.orchestrator_settings().max_job_duration();
        if stale <= longest {
            return Err(ConfigError::Invalid {
                var: "STALE_JOB_TIMEOUT_SECS",
                value: stale.as_secs().to_string(),
                reason: format!(
                    "must exceed the longest possible job duration ({}s)",
                    longest.as_secs()
                ),
            });
        }
        Ok(())
    }
}

fn parse_value<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => parse_value(var, &raw),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => parse_secs(var, &raw),
        None => Ok(default),
    }
}

fn parse_secs(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_value(var, raw)?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.admission.limit, 5);
        assert_eq!(config.admission.window, Duration::from_secs(60));
        assert_eq!(config.document_text_ttl, Duration::from_secs(1800));
        assert!(config.database_url.is_none());
        assert!(config.stale_job_timeout.is_none());
        assert_eq!(config.openai_model, DEFAULT_MODEL);
    }

    #[test]
    fn overrides_are_applied() {
        let config = from_pairs(&[
            ("RATE_LIMIT_MAX", "10"),
            ("RATE_LIMIT_WINDOW_SECS", "30"),
            ("DATABASE_URL", "postgres://localhost/contracts"),
            ("REDIS_URL", "  "),
            ("STALE_JOB_TIMEOUT_SECS", "900"),
            ("KEY_PREFIX", "cd-test"),
        ])
        .unwrap();
        assert_eq!(config.admission.limit, 10);
        assert_eq!(config.admission.window, Duration::from_secs(30));
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/contracts")
        );
        assert!(config.redis_url.is_none());
        assert_eq!(config.stale_job_timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.key_prefix, "cd-test");
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = from_pairs(&[("RATE_LIMIT_MAX", "five")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "RATE_LIMIT_MAX", .. }));

        let err = from_pairs(&[("STORE_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "STORE_TIMEOUT_SECS", .. }));

        assert!(from_pairs(&[("BIND_ADDR", "not-an-addr")]).is_err());
    }

    #[test]
    fn stale_job_timeout_must_outlast_a_live_job() {
        let err = from_pairs(&[("STALE_JOB_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "STALE_JOB_TIMEOUT_SECS", .. }));

        // Defaults allow a job up to 4 x 120 s of collaborator calls plus 6 x 10 s of store calls.
        let err = from_pairs(&[("STALE_JOB_TIMEOUT_SECS", "300")]).unwrap_err();
        assert!(err.to_string().contains("540s"));
        assert!(from_pairs(&[("STALE_JOB_TIMEOUT_SECS", "540")]).is_err());
        assert!(from_pairs(&[("STALE_JOB_TIMEOUT_SECS", "541")]).is_ok());

        // Shorter collaborator timeouts allow a shorter stale age.
        let config = from_pairs(&[
            ("COLLABORATOR_TIMEOUT_SECS", "30"),
            ("STALE_JOB_TIMEOUT_SECS", "300"),
        ])
        .unwrap();
        assert_eq!(config.stale_job_timeout, Some(Duration::from_secs(300)));
    }
}
