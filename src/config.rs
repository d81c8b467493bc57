use crate::catalog::Granularity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub granularity: Granularity,
    #[serde(default = "default_scrape_timeout_secs")]
    pub scrape_timeout_secs: u64,
    #[serde(default)]
    pub library_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            granularity: Granularity::default(),
            scrape_timeout_secs: default_scrape_timeout_secs(),
            library_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        self.bind_address()?;
        if self.scrape_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "scrape_timeout_secs должно быть >= 1".to_string(),
            ));
        }
        if let Some(path) = &self.library_path {
            if path.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "library_path не должен быть пустым".to_string(),
                ));
            }
        }
        Ok(())
    }

    // ":8080" listens on every interface; host names are resolved at bind time.
    pub fn bind_address(&self) -> Result<String, ConfigError> {
        let listen = self.listen.trim();
        let invalid = || {
            ConfigError::Validation(format!(
                "поле listen должно быть адресом host:port или :port, получено '{listen}'"
            ))
        };
        let (host, port) = listen.rsplit_once(':').ok_or_else(invalid)?;
        port.parse::<u16>().map_err(|_| invalid())?;
        if host.is_empty() {
            return Ok(format!("0.0.0.0:{port}"));
        }
        if host.starts_with('[') != host.ends_with(']') || host.contains(char::is_whitespace) {
            return Err(invalid());
        }
        Ok(format!("{host}:{port}"))
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    pub fn library_path(&self) -> Option<PathBuf> {
        self.library_path.as_ref().map(PathBuf::from)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

const fn default_scrape_timeout_secs() -> u64 {
    10
}
