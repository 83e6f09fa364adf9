//! Gateway configuration loaded from `config.toml` in the workspace
//! directory, with serde defaults for every field so a missing or partial
//! file still yields a runnable config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default state directory (tilde-expanded at load time).
pub const DEFAULT_WORKSPACE: &str = "~/.hearth";

/// Environment variable that overrides `[auth] token_secret`.
pub const TOKEN_SECRET_ENV: &str = "HEARTH_TOKEN_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding SQLite state (`users.db`, `devices.db`).
    pub workspace_dir: PathBuf,
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS. Empty list = any origin.
    pub cors_allowed_origins: Vec<String>,
    /// Sliding-window budget for `/api/login` per client key. 0 = unlimited.
    pub login_rate_limit_per_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC key for credential signing. `HEARTH_TOKEN_SECRET` takes priority.
    pub token_secret: Option<String>,
    /// Credential lifetime from issuance. Fixed expiry, not refreshable.
    pub token_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from(DEFAULT_WORKSPACE),
            gateway: GatewayConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7420,
            cors_allowed_origins: Vec::new(),
            login_rate_limit_per_minute: 10,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_ttl_secs: 24 * 3600,
        }
    }
}

impl Config {
    /// Load config from an explicit path, or from `<workspace>/config.toml`
    /// when none is given. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = expand_path(Path::new(DEFAULT_WORKSPACE)).join("config.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.workspace_dir = expand_path(&config.workspace_dir);
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config at {}", path.display()))
    }

    /// Ensure the workspace directory exists and return it.
    pub fn ensure_workspace(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.workspace_dir).with_context(|| {
            format!(
                "failed to create workspace dir {}",
                self.workspace_dir.display()
            )
        })?;
        Ok(&self.workspace_dir)
    }
}

impl AuthConfig {
    /// Resolve the signing secret. Priority: environment variable > config
    /// file. Returns `None` when neither is set (the gateway then generates
    /// an ephemeral process-lifetime secret).
    pub fn resolve_secret(&self) -> Option<String> {
        std::env::var(TOKEN_SECRET_ENV)
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.token_secret
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToOwned::to_owned)
            })
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let config = Config::default();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 7420);
        assert_eq!(config.auth.token_ttl_secs, 86_400);
        assert!(config.gateway.cors_allowed_origins.is_empty());
    }

    #[test]
    fn partial_toml_fills_missing_sections() {
        let config: Config = toml::from_str("[gateway]\nport = 9000\n").unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.auth.token_ttl_secs, 86_400);
    }

    #[test]
    fn load_missing_explicit_path_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/hearth/config.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_from_file_round_trips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "workspace_dir = \"/tmp/hearth-test\"\n\n[auth]\ntoken_ttl_secs = 60\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.workspace_dir, PathBuf::from("/tmp/hearth-test"));
        assert_eq!(config.auth.token_ttl_secs, 60);
    }

    #[test]
    fn config_secret_is_trimmed_and_empty_is_none() {
        let auth = AuthConfig {
            token_secret: Some("   ".into()),
            token_ttl_secs: 60,
        };
        assert_eq!(auth.resolve_secret(), None);

        let auth = AuthConfig {
            token_secret: Some("  hunter2  ".into()),
            token_ttl_secs: 60,
        };
        assert_eq!(auth.resolve_secret(), Some("hunter2".into()));
    }

    #[test]
    fn tilde_workspace_is_expanded() {
        let config: Config = toml::from_str("workspace_dir = \"~/.hearth\"\n").unwrap();
        let expanded = expand_path(&config.workspace_dir);
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
