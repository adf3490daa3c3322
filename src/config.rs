use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/filled_forms.db")
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// URL prefix under which upload-directory files are served.
    #[serde(default = "default_public_base_path")]
    pub public_base_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
            public_base_path: default_public_base_path(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3001".to_string()
}
fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}
fn default_public_base_path() -> String {
    "/uploads".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Largest signature image accepted, in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    15
}
fn default_max_concurrent() -> usize {
    4
}
fn default_max_image_bytes() -> usize {
    5 * 1024 * 1024
}

impl Config {
    /// Overrides file settings with `UPLOAD_DIR`, `DB_FILE` and `PORT`.
    ///
    /// `lookup` is normally `std::env::var`; tests pass a closure instead.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("UPLOAD_DIR").filter(|v| !v.is_empty()) {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(db) = lookup("DB_FILE").filter(|v| !v.is_empty()) {
            self.db.path = PathBuf::from(db);
        }
        if let Some(port) = lookup("PORT").filter(|v| !v.is_empty()) {
            let port: u16 = port
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got '{}'", port))?;
            self.server.bind = format!("0.0.0.0:{}", port);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.db.max_connections == 0 {
            anyhow::bail!("db.max_connections must be >= 1");
        }
        if self.fetch.max_concurrent == 0 {
            anyhow::bail!("fetch.max_concurrent must be >= 1");
        }
        if self.fetch.timeout_secs == 0 {
            anyhow::bail!("fetch.timeout_secs must be >= 1");
        }
        if self.fetch.max_image_bytes == 0 {
            anyhow::bail!("fetch.max_image_bytes must be > 0");
        }
        if self.server.max_upload_bytes == 0 {
            anyhow::bail!("server.max_upload_bytes must be > 0");
        }
        let base = &self.server.public_base_path;
        if !base.starts_with('/') || base.trim_end_matches('/').is_empty() {
            anyhow::bail!(
                "server.public_base_path must be an absolute path below '/', got '{}'",
                self.server.public_base_path
            );
        }
        Ok(())
    }
}

/// Parses a TOML config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

/// [`load_config`] followed by environment overrides.
pub fn load_config_with_env(path: &Path) -> Result<Config> {
    let mut config = load_config(path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load_config(Path::new("/nonexistent/formfill.toml")).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:3001");
        assert_eq!(cfg.fetch.max_concurrent, 4);
        assert_eq!(cfg.fetch.max_image_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.db.max_connections, 4);
        assert_eq!(cfg.db.busy_timeout_ms, 5000);
        assert_eq!(cfg.storage.upload_dir, PathBuf::from("./uploads"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("formfill.toml");
        std::fs::write(&path, "[fetch]\ntimeout_secs = 3\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.fetch.timeout_secs, 3);
        assert_eq!(cfg.fetch.max_concurrent, 4);
        assert_eq!(cfg.db.path, PathBuf::from("./data/filled_forms.db"));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("formfill.toml");
        std::fs::write(&path, "[fetch]\nmax_concurrent = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_concurrent"));
    }

    #[test]
    fn rejects_zero_image_limit() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("formfill.toml");
        std::fs::write(&path, "[fetch]\nmax_image_bytes = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_image_bytes"));
    }

    #[test]
    fn rejects_empty_connection_pool() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("formfill.toml");
        std::fs::write(&path, "[db]\nmax_connections = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("db.max_connections"));
    }

    #[test]
    fn env_overrides_replace_paths_and_port() {
        let vars: HashMap<&str, &str> = [
            ("UPLOAD_DIR", "/srv/uploads"),
            ("DB_FILE", "/srv/forms.db"),
            ("PORT", "8080"),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::default();
        cfg.apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.storage.upload_dir, PathBuf::from("/srv/uploads"));
        assert_eq!(cfg.db.path, PathBuf::from("/srv/forms.db"));
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
    }

    #[test]
    fn bad_port_is_an_error() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides(|k| (k == "PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
