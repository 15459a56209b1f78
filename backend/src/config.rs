//! Runtime configuration, injected into the service at construction.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub view: ViewConfig,
    pub edit: EditPolicy,
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Upper bound for any single call into the PDF backend.
    pub timeout_ms: u64,
    pub max_upload_bytes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ViewConfig {
    pub min_scale: f64,
    pub max_scale: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            min_scale: 0.5,
            max_scale: 3.0,
        }
    }
}

/// Which rewrite paths the edit engine may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EditStrategy {
    #[default]
    SubstituteThenRedraw,
    SubstituteOnly,
    RedrawOnly,
}

/// How many literal candidates a substitution tolerates inside the target
/// text-showing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// Exactly one occurrence; anything else is ambiguous.
    #[default]
    Unique,
    /// Replace the first occurrence when there are several.
    First,
}

/// The single policy point deciding between substitution and whiteout redraw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EditPolicy {
    pub strategy: EditStrategy,
    pub match_policy: MatchPolicy,
    /// Padding around the original bounding box when painting the whiteout.
    pub whiteout_margin: f64,
}

impl Default for EditPolicy {
    fn default() -> Self {
        Self {
            strategy: EditStrategy::default(),
            match_policy: MatchPolicy::default(),
            whiteout_margin: 1.0,
        }
    }
}

/// What happens to an edit buffer when its input loses focus without an
/// explicit confirm or cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlurPolicy {
    #[default]
    Commit,
    Discard,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OverlayConfig {
    pub blur_policy: BlurPolicy,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {key}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

impl Config {
    /// Build a configuration from `RETEXT_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        Ok(Config {
            server: ServerConfig {
                host: env::var("RETEXT_HOST").unwrap_or(defaults.server.host),
                port: parse_var("RETEXT_PORT", defaults.server.port)?,
            },
            backend: BackendConfig {
                timeout_ms: parse_var("RETEXT_BACKEND_TIMEOUT_MS", defaults.backend.timeout_ms)?,
                max_upload_bytes: parse_var(
                    "RETEXT_MAX_UPLOAD_BYTES",
                    defaults.backend.max_upload_bytes,
                )?,
            },
            view: ViewConfig {
                min_scale: parse_var("RETEXT_MIN_SCALE", defaults.view.min_scale)?,
                max_scale: parse_var("RETEXT_MAX_SCALE", defaults.view.max_scale)?,
            },
            edit: EditPolicy {
                strategy: match env::var("RETEXT_EDIT_STRATEGY").ok().as_deref() {
                    None => defaults.edit.strategy,
                    Some("substitute-then-redraw") => EditStrategy::SubstituteThenRedraw,
                    Some("substitute-only") => EditStrategy::SubstituteOnly,
                    Some("redraw-only") => EditStrategy::RedrawOnly,
                    Some(other) => {
                        return Err(ConfigError {
                            key: "RETEXT_EDIT_STRATEGY",
                            value: other.to_string(),
                        })
                    }
                },
                match_policy: match env::var("RETEXT_MATCH_POLICY").ok().as_deref() {
                    None => defaults.edit.match_policy,
                    Some("unique") => MatchPolicy::Unique,
                    Some("first") => MatchPolicy::First,
                    Some(other) => {
                        return Err(ConfigError {
                            key: "RETEXT_MATCH_POLICY",
                            value: other.to_string(),
                        })
                    }
                },
                whiteout_margin: parse_var("RETEXT_WHITEOUT_MARGIN", defaults.edit.whiteout_margin)?,
            },
            overlay: OverlayConfig {
                blur_policy: match env::var("RETEXT_BLUR_POLICY").ok().as_deref() {
                    None => defaults.overlay.blur_policy,
                    Some("commit") => BlurPolicy::Commit,
                    Some("discard") => BlurPolicy::Discard,
                    Some(other) => {
                        return Err(ConfigError {
                            key: "RETEXT_BLUR_POLICY",
                            value: other.to_string(),
                        })
                    }
                },
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError { key, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.view.min_scale, 0.5);
        assert_eq!(config.view.max_scale, 3.0);
        assert_eq!(config.edit.whiteout_margin, 1.0);
        assert_eq!(config.edit.strategy, EditStrategy::SubstituteThenRedraw);
        assert_eq!(config.overlay.blur_policy, BlurPolicy::Commit);
        assert_eq!(config.backend.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn policy_deserializes_from_kebab_case() {
        let policy: EditPolicy = serde_json::from_str(
            r#"{"strategy":"redraw-only","match_policy":"first","whiteout_margin":2.0}"#,
        )
        .unwrap();
        assert_eq!(policy.strategy, EditStrategy::RedrawOnly);
        assert_eq!(policy.match_policy, MatchPolicy::First);
    }
}
