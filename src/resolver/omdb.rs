use super::MetadataSource;
use crate::http::HttpClient;
use crate::models::{round_rating, ItemKind, Metadata};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

pub struct OmdbSource {
    http: HttpClient,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OmdbResponse {
    #[serde(rename = "Response")]
    response: String,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Year")]
    year: Option<String>,
    #[serde(rename = "Genre")]
    genre: Option<String>,
    #[serde(rename = "Type")]
    media_type: Option<String>,
    #[serde(rename = "imdbID")]
    imdb_id: Option<String>,
    #[serde(rename = "Ratings", default)]
    ratings: Vec<OmdbRating>,
}

#[derive(Debug, Deserialize)]
struct OmdbRating {
    #[serde(rename = "Source")]
    source: String,
    #[serde(rename = "Value")]
    value: String,
}

impl OmdbSource {
    pub fn new(http: HttpClient, api_key: String, base_url: String) -> Self {
        Self {
            http,
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl MetadataSource for OmdbSource {
    fn name(&self) -> &str {
        "omdb"
    }

    #[instrument(skip(self))]
    async fn lookup(&self, title: &str) -> Result<Option<Metadata>> {
        let url = format!(
            "{}/?t={}&apikey={}",
            self.base_url,
            urlencoding::encode(title),
            self.api_key
        );

        let response: OmdbResponse = self.http.get_json(&url, &[]).await?;
        let metadata = response_metadata(response);
        if let Some(ref found) = metadata {
            info!("OMDb matched '{}' to {:?}", title, found.title);
        }
        Ok(metadata)
    }
}

fn response_metadata(response: OmdbResponse) -> Option<Metadata> {
    if response.response != "True" {
        return None;
    }

    let imdb_rating = response
        .ratings
        .iter()
        .find(|r| r.source == "Internet Movie Database")
        .and_then(|r| r.value.split('/').next())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(round_rating);

    // Only the leading genre is kept from OMDb's comma list.
    let genre = response
        .genre
        .as_deref()
        .and_then(|g| g.split(',').next())
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty() && g != "N/A");

    let kind = match response.media_type.as_deref() {
        Some("movie") => Some(ItemKind::Movie),
        Some("series") => Some(ItemKind::Series),
        _ => None,
    };

    Some(Metadata {
        original_title: response.title.clone(),
        title: response.title,
        year: response.year.filter(|y| y != "N/A"),
        genre,
        kp_rating: None,
        imdb_rating,
        kp_url: None,
        imdb_url: response
            .imdb_id
            .map(|id| format!("https://www.imdb.com/title/{}", id)),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_found_title() {
        let body = r#"{
            "Title": "Inception", "Year": "2010", "Genre": "Action, Adventure, Sci-Fi",
            "Type": "movie", "imdbID": "tt1375666", "Response": "True",
            "Ratings": [
                {"Source": "Rotten Tomatoes", "Value": "87%"},
                {"Source": "Internet Movie Database", "Value": "8.8/10"}
            ]
        }"#;
        let metadata = response_metadata(serde_json::from_str(body).unwrap()).unwrap();

        assert_eq!(metadata.title.as_deref(), Some("Inception"));
        assert_eq!(metadata.year.as_deref(), Some("2010"));
        assert_eq!(metadata.genre.as_deref(), Some("Action"));
        assert_eq!(metadata.imdb_rating, Some(8.8));
        assert_eq!(metadata.imdb_url.as_deref(), Some("https://www.imdb.com/title/tt1375666"));
        assert_eq!(metadata.kind, Some(ItemKind::Movie));
        assert!(metadata.kp_rating.is_none());
    }

    #[test]
    fn test_not_found() {
        let body = r#"{"Response": "False", "Error": "Movie not found!"}"#;
        assert!(response_metadata(serde_json::from_str(body).unwrap()).is_none());
    }

    #[test]
    fn test_unrated_series() {
        let body = r#"{"Title": "Dark", "Year": "2017–2020", "Genre": "N/A", "Type": "series", "Response": "True"}"#;
        let metadata = response_metadata(serde_json::from_str(body).unwrap()).unwrap();

        assert!(metadata.imdb_rating.is_none());
        assert!(metadata.genre.is_none());
        assert_eq!(metadata.kind, Some(ItemKind::Series));
    }
}
