//! Environment-based configuration
//!
//! Values are read from the process environment after loading an optional
//! `.env` file. Only the two API keys are required.
//!
//! | Variable | Default |
//! |---|---|
//! | `OPENAI_API_KEY` | required |
//! | `OPENAI_BASE_URL` | `https://api.openai.com/v1` |
//! | `FORGELOOP_MODEL` | `gpt-4.1` |
//! | `FORGELOOP_TEMPERATURE` | `0.1` |
//! | `FORGELOOP_MAX_ITERATIONS` | `15` |
//! | `FORGELOOP_SANDBOX_API_KEY` | required |
//! | `FORGELOOP_SANDBOX_API_URL` | `https://api.e2b.dev` |
//! | `FORGELOOP_SANDBOX_DOMAIN` | `e2b.app` |
//! | `FORGELOOP_SANDBOX_TEMPLATE` | `vibe-nextjs-kc-test-2` |
//! | `FORGELOOP_SANDBOX_TIMEOUT_SECS` | `1800` |
//! | `FORGELOOP_DATA_DIR` | `~/.forgeloop` |
//! | `FORGELOOP_QUOTA_POINTS` | `5` (0 disables the gate) |
//! | `FORGELOOP_QUOTA_WINDOW_SECS` | `2592000` (30 days) |
//! | `FORGELOOP_OTLP_ENDPOINT` | unset (no export) |
//! | `FORGELOOP_LOG_JSON` | `false` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::agent::AgentConfig;
use crate::sandbox::{RemoteSandboxConfig, SANDBOX_TIMEOUT};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Everything the CLI needs to wire a controller
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_base_url: String,
    pub openai_api_key: String,
    pub agent: AgentConfig,
    pub sandbox: RemoteSandboxConfig,
    pub data_dir: PathBuf,
    pub quota_points: u64,
    pub quota_window: Duration,
    pub otlp_endpoint: Option<String>,
    pub log_json: bool,
}

impl Settings {
    /// Load `.env` (if present) and read settings from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let defaults = AgentConfig::default();
        let agent = AgentConfig {
            model: get("FORGELOOP_MODEL").unwrap_or(defaults.model),
            temperature: parse(&get, "FORGELOOP_TEMPERATURE")?.unwrap_or(defaults.temperature),
            max_iterations: parse(&get, "FORGELOOP_MAX_ITERATIONS")?.unwrap_or(defaults.max_iterations),
            sandbox_template: get("FORGELOOP_SANDBOX_TEMPLATE").unwrap_or(defaults.sandbox_template),
            ..defaults
        };

        let mut sandbox = RemoteSandboxConfig::new(
            get("FORGELOOP_SANDBOX_API_URL").unwrap_or_else(|| "https://api.e2b.dev".to_string()),
            get("FORGELOOP_SANDBOX_API_KEY").ok_or(ConfigError::Missing("FORGELOOP_SANDBOX_API_KEY"))?,
            get("FORGELOOP_SANDBOX_DOMAIN").unwrap_or_else(|| "e2b.app".to_string()),
        );
        sandbox.timeout = parse(&get, "FORGELOOP_SANDBOX_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(SANDBOX_TIMEOUT);

        let data_dir = get("FORGELOOP_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            let home = get("HOME").unwrap_or_else(|| ".".to_string());
            PathBuf::from(home).join(".forgeloop")
        });

        Ok(Self {
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            openai_api_key: get("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?,
            agent,
            sandbox,
            data_dir,
            quota_points: parse(&get, "FORGELOOP_QUOTA_POINTS")?.unwrap_or(5),
            quota_window: parse(&get, "FORGELOOP_QUOTA_WINDOW_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(30 * 24 * 60 * 60)),
            otlp_endpoint: get("FORGELOOP_OTLP_ENDPOINT"),
            log_json: parse(&get, "FORGELOOP_LOG_JSON")?.unwrap_or(false),
        })
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn conversation_dir(&self) -> PathBuf {
        self.data_dir.join("conversations")
    }

    /// Credit buckets shared by every CLI invocation
    pub fn quota_path(&self) -> PathBuf {
        self.data_dir.join("quota.json")
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    const REQUIRED: &[(&str, &str)] = &[("OPENAI_API_KEY", "sk-test"), ("FORGELOOP_SANDBOX_API_KEY", "e2b-test")];

    #[test]
    fn test_defaults() {
        let s = settings(REQUIRED).unwrap();
        assert_eq!(s.agent.model, "gpt-4.1");
        assert_eq!(s.agent.max_iterations, 15);
        assert_eq!(s.sandbox.timeout, Duration::from_secs(1800));
        assert_eq!(s.quota_points, 5);
        assert!(s.otlp_endpoint.is_none());
        assert!(!s.log_json);
    }

    #[test]
    fn test_missing_key() {
        let err = settings(&[("OPENAI_API_KEY", "sk-test")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("FORGELOOP_SANDBOX_API_KEY")));
    }

    #[test]
    fn test_overrides_and_invalid_numbers() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FORGELOOP_MAX_ITERATIONS", "8"));
        pairs.push(("FORGELOOP_DATA_DIR", "/tmp/fl"));
        pairs.push(("FORGELOOP_LOG_JSON", "true"));
        let s = settings(&pairs).unwrap();
        assert_eq!(s.agent.max_iterations, 8);
        assert_eq!(s.checkpoint_dir(), PathBuf::from("/tmp/fl/checkpoints"));
        assert_eq!(s.quota_path(), PathBuf::from("/tmp/fl/quota.json"));
        assert!(s.log_json);

        pairs.push(("FORGELOOP_QUOTA_POINTS", "lots"));
        let err = settings(&pairs).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FORGELOOP_QUOTA_POINTS", .. }));
    }
}
