//! Startup configuration, loaded from environment variables with a
//! command-line override for read-only mode.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

/// Application configuration — see SPEC_FULL.md §4.J / §12.
#[derive(Debug, Clone)]
pub struct Config {
    pub vibe_root: PathBuf,
    pub vibe_port: u16,
    pub vibe_db: PathBuf,
    pub auth_token: Option<String>,
    pub read_only: bool,
    pub webhooks_enabled: bool,
    pub sync_interval: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `read_only_override`, when set, takes precedence over `VIBE_READ_ONLY`
    /// — this is how the CLI `--read-only` flag wins over the environment.
    pub fn from_env(read_only_override: Option<bool>) -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let default_root = home.join(".vibe");
        let vibe_root = expand_tilde(
            &env::var("VIBE_ROOT").unwrap_or_else(|_| default_root.display().to_string()),
        );

        let port_str = env::var("VIBE_PORT").unwrap_or_else(|_| "8080".to_string());
        let vibe_port: u16 = port_str
            .parse()
            .with_context(|| format!("invalid VIBE_PORT value '{port_str}'"))?;
        if vibe_port == 0 {
            bail!("port must be between 1 and 65535, got {vibe_port}");
        }

        let default_db = vibe_root.join("index.db");
        let vibe_db = expand_tilde(
            &env::var("VIBE_DB").unwrap_or_else(|_| default_db.display().to_string()),
        );

        let auth_token = env::var("VIBE_AUTH_TOKEN").ok();
        if let Some(ref token) = auth_token {
            if token.len() < 32 {
                bail!("VIBE_AUTH_TOKEN must be at least 32 characters for security");
            }
        }

        let read_only = match read_only_override {
            Some(v) => v,
            None => is_truthy(&env::var("VIBE_READ_ONLY").unwrap_or_default()),
        };

        let webhooks_enabled = !is_falsy(
            &env::var("VIBE_WEBHOOKS_ENABLED").unwrap_or_else(|_| "true".to_string()),
        );

        let sync_interval_str = env::var("VIBE_SYNC_INTERVAL").unwrap_or_else(|_| "30".to_string());
        let sync_interval: i64 = sync_interval_str
            .parse()
            .with_context(|| format!("invalid VIBE_SYNC_INTERVAL value '{sync_interval_str}'"))?;
        if sync_interval < 0 {
            bail!("sync interval must be >= 0, got {sync_interval}");
        }

        Ok(Self {
            vibe_root,
            vibe_port,
            vibe_db,
            auth_token,
            read_only,
            webhooks_enabled,
            sync_interval: sync_interval as u64,
        })
    }
}

fn is_truthy(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "1" | "true" | "yes")
}

fn is_falsy(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "0" | "false" | "no")
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "VIBE_ROOT",
            "VIBE_PORT",
            "VIBE_DB",
            "VIBE_AUTH_TOKEN",
            "VIBE_READ_ONLY",
            "VIBE_WEBHOOKS_ENABLED",
            "VIBE_SYNC_INTERVAL",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn defaults_are_sane() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let cfg = Config::from_env(None).unwrap();
        assert_eq!(cfg.vibe_port, 8080);
        assert!(!cfg.read_only);
        assert!(cfg.webhooks_enabled);
        assert_eq!(cfg.sync_interval, 30);
        assert!(cfg.auth_token.is_none());
    }

    #[test]
    fn cli_override_wins_over_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("VIBE_READ_ONLY", "false");
        let cfg = Config::from_env(Some(true)).unwrap();
        assert!(cfg.read_only);
        clear_env();
    }

    #[test]
    fn short_auth_token_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("VIBE_AUTH_TOKEN", "too-short");
        let err = Config::from_env(None);
        assert!(err.is_err());
        clear_env();
    }

    #[test]
    fn invalid_port_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("VIBE_PORT", "99999");
        let err = Config::from_env(None);
        assert!(err.is_err());
        clear_env();
    }

    #[test]
    fn webhooks_disabled_by_falsy_value() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("VIBE_WEBHOOKS_ENABLED", "no");
        let cfg = Config::from_env(None).unwrap();
        assert!(!cfg.webhooks_enabled);
        clear_env();
    }
}
