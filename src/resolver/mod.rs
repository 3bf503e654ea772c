mod kinopoisk;
mod omdb;

pub use kinopoisk::KinopoiskSource;
pub use omdb::OmdbSource;

use crate::config::{Configuration, KINOPOISK_BASE_URL, OMDB_BASE_URL};
use crate::http::HttpClient;
use crate::models::Metadata;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One rating/genre lookup backend.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means the backend answered but knows no such title.
    async fn lookup(&self, title: &str) -> Result<Option<Metadata>>;
}

/// Combines up to two sources. The first source's answer wins field by
/// field; the second only fills ratings, urls and genre it left empty.
/// Failures and timeouts degrade to empty metadata, never to an error.
pub struct MetadataResolver {
    primary: Option<Box<dyn MetadataSource>>,
    secondary: Option<Box<dyn MetadataSource>>,
    timeout: Duration,
}

impl MetadataResolver {
    pub fn new(
        primary: Option<Box<dyn MetadataSource>>,
        secondary: Option<Box<dyn MetadataSource>>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, None, Duration::from_secs(1))
    }

    /// Kinopoisk first, OMDb second; a backend without an API key is skipped.
    pub fn from_config(config: &Configuration, http: HttpClient) -> Self {
        let primary = config.kinopoisk().map(|api| {
            let base_url = api.base_url_or(KINOPOISK_BASE_URL);
            Box::new(KinopoiskSource::new(http.clone(), api.api_key, base_url)) as Box<dyn MetadataSource>
        });
        let secondary = config.omdb().map(|api| {
            let base_url = api.base_url_or(OMDB_BASE_URL);
            Box::new(OmdbSource::new(http.clone(), api.api_key, base_url)) as Box<dyn MetadataSource>
        });

        info!(
            "Metadata sources: kinopoisk={}, omdb={}",
            primary.is_some(),
            secondary.is_some()
        );
        Self::new(primary, secondary, config.resolver_timeout())
    }

    pub async fn resolve(&self, title: &str) -> Metadata {
        let primary = self.query(self.primary.as_deref(), title).await;

        // Cyrillic titles are looked up in OMDb by the original name when known.
        let secondary_title = match &primary {
            Some(found) if contains_cyrillic(title) => found
                .original_title
                .clone()
                .unwrap_or_else(|| title.to_string()),
            _ => title.to_string(),
        };
        let secondary = self.query(self.secondary.as_deref(), &secondary_title).await;

        let merged = match (primary, secondary) {
            (Some(mut first), Some(second)) => {
                first.merge_missing(second);
                first
            }
            (Some(first), None) => first,
            (None, Some(second)) => second,
            (None, None) => Metadata::default(),
        };
        if merged.is_empty() {
            info!("No metadata found for '{}'", title);
        }
        merged
    }

    async fn query(&self, source: Option<&dyn MetadataSource>, title: &str) -> Option<Metadata> {
        let source = source?;
        match tokio::time::timeout(self.timeout, source.lookup(title)).await {
            Ok(Ok(Some(metadata))) => {
                debug!("{} found '{}'", source.name(), title);
                Some(metadata)
            }
            Ok(Ok(None)) => {
                debug!("{} has no match for '{}'", source.name(), title);
                None
            }
            Ok(Err(e)) => {
                warn!("{} lookup for '{}' failed: {}", source.name(), title, e);
                None
            }
            Err(_) => {
                warn!("{} lookup for '{}' timed out after {:?}", source.name(), title, self.timeout);
                None
            }
        }
    }
}

pub fn contains_cyrillic(text: &str) -> bool {
    text.chars().any(|c| matches!(c, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё'))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Canned source that records the titles it was asked about.
    pub(crate) struct StubSource {
        pub answer: Option<Metadata>,
        pub fail: bool,
        pub delay: Option<Duration>,
        pub seen: Arc<Mutex<Vec<String>>>,
    }

    impl StubSource {
        pub(crate) fn answering(answer: Metadata) -> Self {
            Self {
                answer: Some(answer),
                fail: false,
                delay: None,
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing() -> Self {
            Self {
                answer: None,
                fail: true,
                delay: None,
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl MetadataSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        async fn lookup(&self, title: &str) -> Result<Option<Metadata>> {
            self.seen.lock().unwrap().push(title.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                anyhow::bail!("backend exploded");
            }
            Ok(self.answer.clone())
        }
    }

    fn resolver(primary: StubSource, secondary: StubSource) -> MetadataResolver {
        MetadataResolver::new(
            Some(Box::new(primary)),
            Some(Box::new(secondary)),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_secondary_only_fills_gaps() {
        let primary = StubSource::answering(Metadata {
            title: Some("Inception".to_string()),
            year: Some("2010".to_string()),
            kp_rating: Some(8.7),
            ..Default::default()
        });
        let secondary = StubSource::answering(Metadata {
            title: Some("Other".to_string()),
            year: Some("1999".to_string()),
            kp_rating: Some(1.0),
            imdb_rating: Some(8.8),
            genre: Some("Action".to_string()),
            ..Default::default()
        });

        let merged = resolver(primary, secondary).resolve("Inception").await;

        assert_eq!(merged.title.as_deref(), Some("Inception"));
        assert_eq!(merged.year.as_deref(), Some("2010"));
        assert_eq!(merged.kp_rating, Some(8.7));
        assert_eq!(merged.imdb_rating, Some(8.8));
        assert_eq!(merged.genre.as_deref(), Some("Action"));
    }

    #[tokio::test]
    async fn test_secondary_used_whole_when_primary_fails() {
        let secondary = StubSource::answering(Metadata {
            title: Some("Inception".to_string()),
            year: Some("2010".to_string()),
            imdb_rating: Some(8.8),
            ..Default::default()
        });

        let merged = resolver(StubSource::failing(), secondary).resolve("Inception").await;

        assert_eq!(merged.year.as_deref(), Some("2010"));
        assert_eq!(merged.imdb_rating, Some(8.8));
    }

    #[tokio::test]
    async fn test_total_failure_is_empty() {
        let merged = resolver(StubSource::failing(), StubSource::failing())
            .resolve("Inception")
            .await;
        assert!(merged.is_empty());

        assert!(MetadataResolver::disabled().resolve("Inception").await.is_empty());
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let mut slow = StubSource::answering(Metadata {
            kp_rating: Some(9.9),
            ..Default::default()
        });
        slow.delay = Some(Duration::from_secs(30));
        let secondary = StubSource::answering(Metadata {
            imdb_rating: Some(8.8),
            ..Default::default()
        });

        let merged = resolver(slow, secondary).resolve("Inception").await;

        assert!(merged.kp_rating.is_none());
        assert_eq!(merged.imdb_rating, Some(8.8));
    }

    #[tokio::test]
    async fn test_cyrillic_title_queries_secondary_by_original_title() {
        let primary = StubSource::answering(Metadata {
            title: Some("Начало".to_string()),
            original_title: Some("Inception".to_string()),
            ..Default::default()
        });
        let secondary = StubSource::answering(Metadata::default());
        let seen = Arc::clone(&secondary.seen);

        resolver(primary, secondary).resolve("Начало").await;

        assert_eq!(*seen.lock().unwrap(), vec!["Inception".to_string()]);
    }

    #[test]
    fn test_contains_cyrillic() {
        assert!(contains_cyrillic("Ёлки"));
        assert!(contains_cyrillic("Матрица 2"));
        assert!(!contains_cyrillic("The Matrix"));
    }
}
