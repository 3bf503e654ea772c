use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_SQLITE_PATH: &str = "movies.db";
pub const KINOPOISK_BASE_URL: &str = "https://api.kinopoisk.dev";
pub const OMDB_BASE_URL: &str = "http://www.omdbapi.com";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Configuration {
    pub database: Option<DatabaseConfig>,
    pub resolver: Option<ResolverConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(rename = "sqlitePath")]
    pub sqlite_path: Option<String>,
    #[serde(rename = "poolSize")]
    pub pool_size: Option<u32>,
    #[serde(rename = "connectTimeoutSeconds")]
    pub connect_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResolverConfig {
    #[serde(rename = "timeoutSeconds")]
    pub timeout_seconds: Option<u64>,
    pub kinopoisk: Option<ApiConfig>,
    pub omdb: Option<ApiConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(rename = "apikey")]
    pub api_key: String,
    #[serde(rename = "baseUrl")]
    pub base_url: Option<String>,
}

impl Configuration {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Configuration = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Reads `path` if it exists, then layers the process environment on top.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            info!("Configuration loaded from: {}", path);
            Self::from_file(path)?
        } else {
            info!("No configuration file at {}, using defaults", path);
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// `DATABASE_URL`, `KINOPOISK_API_KEY` and `OMDB_API_KEY` win over the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("DATABASE_URL") {
            debug!("DATABASE_URL taken from environment");
            self.database.get_or_insert_with(DatabaseConfig::default).url = Some(url);
        }
        if let Some(key) = non_empty("KINOPOISK_API_KEY") {
            let resolver = self.resolver.get_or_insert_with(ResolverConfig::default);
            set_api_key(&mut resolver.kinopoisk, key);
        }
        if let Some(key) = non_empty("OMDB_API_KEY") {
            let resolver = self.resolver.get_or_insert_with(ResolverConfig::default);
            set_api_key(&mut resolver.omdb, key);
        }
    }

    pub fn database_url(&self) -> Option<String> {
        self.database
            .as_ref()
            .and_then(|d| d.url.clone())
            .filter(|url| !url.trim().is_empty())
    }

    pub fn sqlite_path(&self) -> String {
        self.database
            .as_ref()
            .and_then(|d| d.sqlite_path.clone())
            .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string())
    }

    pub fn pool_size(&self) -> u32 {
        self.database
            .as_ref()
            .and_then(|d| d.pool_size)
            .unwrap_or(5)
    }

    /// How long to wait for the networked database before falling back.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.database
                .as_ref()
                .and_then(|d| d.connect_timeout_seconds)
                .unwrap_or(3),
        )
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_secs(
            self.resolver
                .as_ref()
                .and_then(|r| r.timeout_seconds)
                .unwrap_or(5)
        )
    }

    pub fn kinopoisk(&self) -> Option<ApiConfig> {
        self.resolver
            .as_ref()
            .and_then(|r| r.kinopoisk.clone())
            .filter(|api| !api.api_key.is_empty())
    }

    pub fn omdb(&self) -> Option<ApiConfig> {
        self.resolver
            .as_ref()
            .and_then(|r| r.omdb.clone())
            .filter(|api| !api.api_key.is_empty())
    }
}

impl ApiConfig {
    pub fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| default.to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

fn set_api_key(slot: &mut Option<ApiConfig>, key: String) {
    match slot {
        Some(api) => api.api_key = key,
        None => {
            *slot = Some(ApiConfig {
                api_key: key,
                base_url: None,
            })
        }
    }
}
