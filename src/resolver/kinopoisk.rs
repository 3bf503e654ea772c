use super::MetadataSource;
use crate::http::HttpClient;
use crate::models::{round_rating, ItemKind, Metadata};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

pub struct KinopoiskSource {
    http: HttpClient,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<KinopoiskFilm>,
}

#[derive(Debug, Clone, Deserialize)]
struct KinopoiskFilm {
    id: Option<i64>,
    name: Option<String>,
    #[serde(rename = "alternativeName")]
    alternative_name: Option<String>,
    year: Option<i32>,
    #[serde(default)]
    genres: Vec<KinopoiskGenre>,
    rating: Option<KinopoiskRating>,
    #[serde(rename = "type")]
    film_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct KinopoiskGenre {
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct KinopoiskRating {
    kp: Option<f64>,
    imdb: Option<f64>,
}

impl KinopoiskSource {
    pub fn new(http: HttpClient, api_key: String, base_url: String) -> Self {
        Self {
            http,
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl MetadataSource for KinopoiskSource {
    fn name(&self) -> &str {
        "kinopoisk"
    }

    #[instrument(skip(self))]
    async fn lookup(&self, title: &str) -> Result<Option<Metadata>> {
        let url = format!(
            "{}/v1.4/movie/search?page=1&limit=3&query={}",
            self.base_url,
            urlencoding::encode(title)
        );

        let response: SearchResponse = self
            .http
            .get_json(&url, &[("X-API-KEY", self.api_key.as_str())])
            .await?;

        let Some(film) = response.docs.into_iter().next() else {
            return Ok(None);
        };
        info!("Kinopoisk matched '{}' to {:?}", title, film.name);
        Ok(Some(film_metadata(film)))
    }
}

fn film_metadata(film: KinopoiskFilm) -> Metadata {
    let genres: Vec<String> = film
        .genres
        .into_iter()
        .filter_map(|g| g.name)
        .filter(|name| !name.is_empty())
        .take(3)
        .collect();

    // Kinopoisk reports 0 for "no rating yet".
    let rating = |value: Option<f64>| value.filter(|v| *v > 0.0).map(round_rating);
    let (kp_rating, imdb_rating) = match &film.rating {
        Some(r) => (rating(r.kp), rating(r.imdb)),
        None => (None, None),
    };

    let kind = film.film_type.as_deref().map(|t| {
        if t.contains("series") {
            ItemKind::Series
        } else {
            ItemKind::Movie
        }
    });

    Metadata {
        original_title: film.alternative_name.clone().or_else(|| film.name.clone()),
        title: film.name,
        year: film.year.map(|y| y.to_string()),
        genre: (!genres.is_empty()).then(|| genres.join(", ")),
        kp_rating,
        imdb_rating,
        kp_url: film.id.map(|id| format!("https://www.kinopoisk.ru/film/{}", id)),
        imdb_url: None,
        kind,
    }
}
