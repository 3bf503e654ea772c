use anyhow::Result;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, instrument};

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("cinelist/0.1.0")
            .build()?;

        Ok(Self { client })
    }

    // Query strings carry API keys, so only the path is recorded.
    #[instrument(skip_all, fields(path = %path_of(url)))]
    pub async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Response> {
        debug!("Making GET request");
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            error!("HTTP request failed with status: {}", response.status());
            return Err(anyhow::anyhow!("HTTP request failed: {}", response.status()));
        }

        Ok(response)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, headers: &[(&str, &str)]) -> Result<T> {
        let response = self.get(url, headers).await?;
        let json = response.json::<T>().await?;
        Ok(json)
    }
}

fn path_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path()),
        Err(_) => "<invalid url>".to_string(),
    }
}
