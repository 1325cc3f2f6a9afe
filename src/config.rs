//! Environment-driven service configuration and browser binary discovery.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub chromium_path: PathBuf,
    pub server_port: u16,
    pub pool_size: usize,
    /// Empty means "no durable store": the service falls back to the
    /// in-memory index and sessions do not survive a restart.
    pub redis_addr: String,
    pub redis_password: String,
    pub redis_db: i64,
    pub session_ttl: Duration,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        let chromium_path = find_chromium()?;
        Ok(Self {
            chromium_path,
            server_port: env_parsed("SERVER_PORT", 8080),
            pool_size: env_parsed("MAX_BROWSERS", 5),
            redis_addr: env_or("REDIS_ADDR", "127.0.0.1:6379"),
            redis_password: env_or("REDIS_PASSWORD", ""),
            redis_db: env_parsed("REDIS_DB", 0),
            session_ttl: Duration::from_secs(env_parsed("SESSION_TTL_SECS", 3600)),
            idle_timeout: Duration::from_secs(env_parsed("SESSION_IDLE_SECS", 1800)),
            sweep_interval: Duration::from_secs(env_parsed("SWEEP_INTERVAL_SECS", 300)),
        })
    }

    /// Connection URL for the durable store, or `None` when unset.
    pub fn redis_url(&self) -> Option<String> {
        if self.redis_addr.is_empty() {
            return None;
        }
        let auth = if self.redis_password.is_empty() {
            String::new()
        } else {
            format!(":{}@", self.redis_password)
        };
        Some(format!("redis://{auth}{}/{}", self.redis_addr, self.redis_db))
    }
}

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) => value,
        Err(_) => default.to_string(),
    }
}

fn env_parsed<T: FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

const CHROMIUM_NAMES: [&str; 4] = [
    "chromium",
    "chromium-browser",
    "google-chrome-stable",
    "google-chrome",
];

/// Resolution ladder: explicit `CHROMIUM_PATH`, then `$PATH`, then common
/// install locations for the current OS.
fn find_chromium() -> Result<PathBuf> {
    if let Ok(custom) = env::var("CHROMIUM_PATH") {
        let custom = PathBuf::from(custom.trim());
        if !custom.is_file() {
            bail!("chromium binary not found at {}", custom.display());
        }
        if !is_executable(&custom) {
            bail!(
                "chromium binary found but not executable: {}",
                custom.display()
            );
        }
        return Ok(custom);
    }

    for name in CHROMIUM_NAMES {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    for candidate in os_candidate_paths() {
        if candidate.is_file() && is_executable(&candidate) {
            return Ok(candidate);
        }
    }

    bail!("chromium not found in common paths, set CHROMIUM_PATH")
}

fn os_candidate_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        ]
    }

    #[cfg(target_os = "linux")]
    {
        vec![
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/snap/bin/chromium"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Vec::new()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parsed_falls_back_on_missing_or_garbage() {
        env::remove_var("BROWSERHIVE_TEST_MISSING");
        assert_eq!(env_parsed("BROWSERHIVE_TEST_MISSING", 42u16), 42);

        env::set_var("BROWSERHIVE_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_parsed("BROWSERHIVE_TEST_GARBAGE", 7usize), 7);
        env::remove_var("BROWSERHIVE_TEST_GARBAGE");

        env::set_var("BROWSERHIVE_TEST_PORT", "9090");
        assert_eq!(env_parsed("BROWSERHIVE_TEST_PORT", 8080u16), 9090);
        env::remove_var("BROWSERHIVE_TEST_PORT");
    }

    #[test]
    fn redis_url_composition() {
        let mut cfg = Config {
            chromium_path: PathBuf::from("/usr/bin/chromium"),
            server_port: 8080,
            pool_size: 5,
            redis_addr: "cache.internal:6380".to_string(),
            redis_password: String::new(),
            redis_db: 2,
            session_ttl: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(300),
        };
        assert_eq!(
            cfg.redis_url().unwrap(),
            "redis://cache.internal:6380/2"
        );

        cfg.redis_password = "hunter2".to_string();
        assert_eq!(
            cfg.redis_url().unwrap(),
            "redis://:hunter2@cache.internal:6380/2"
        );

        cfg.redis_addr = String::new();
        assert!(cfg.redis_url().is_none());
    }
}
