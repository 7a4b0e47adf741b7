use image::DynamicImage;
use log::debug;
use serde::Deserialize;
use std::io::Cursor;
use thiserror::Error;

use super::window::ComicId;

const BASE_URL: &str = "https://xkcd.com";

/// One comic's metadata as served by `GET /{id}/info.0.json`.
/// Immutable once fetched; day/month/year are strings on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct Comic {
    #[serde(rename = "num")]
    pub id: ComicId,
    pub title: String,
    #[serde(rename = "img")]
    pub image_url: String,
    #[serde(rename = "alt")]
    pub alt_text: String,
    pub day: String,
    pub month: String,
    pub year: String,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub news: String,
}

impl Comic {
    pub fn published(&self) -> String {
        format!("{}/{}/{}", self.day, self.month, self.year)
    }

    pub fn page_url(&self) -> String {
        format!("{}/{}/", BASE_URL, self.id)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid comic id: {0}")]
    InvalidId(u32),
    #[error("xkcd returned status {0}")]
    Upstream(reqwest::StatusCode),
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct XkcdClient {
    http: reqwest::Client,
    base_url: String,
}

impl XkcdClient {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Points the client at a different host. Used by tests to run
    /// against a local mock server.
    pub fn with_base_url(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("xkcd-tui/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetches one comic by id. Id 0 is rejected before any I/O.
    pub async fn fetch_comic(&self, id: ComicId) -> Result<Comic, FetchError> {
        if id == 0 {
            return Err(FetchError::InvalidId(id));
        }
        self.fetch_json(&format!("{}/{}/info.0.json", self.base_url, id))
            .await
    }

    /// Fetches the latest published comic.
    pub async fn fetch_latest(&self) -> Result<Comic, FetchError> {
        self.fetch_json(&format!("{}/info.0.json", self.base_url))
            .await
    }

    /// List-path adapter: any failure collapses to `None` so the batch
    /// fetcher's per-id failure path triggers instead of an error surfacing.
    pub async fn fetch_comic_opt(&self, id: ComicId) -> Option<Comic> {
        match self.fetch_comic(id).await {
            Ok(comic) => Some(comic),
            Err(e) => {
                debug!("list fetch for #{id} failed: {e}");
                None
            }
        }
    }

    async fn fetch_json(&self, url: &str) -> Result<Comic, FetchError> {
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Upstream(status));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn fetch_image(&self, image_url: &str) -> Option<DynamicImage> {
        if image_url.is_empty() {
            return None;
        }

        let response = self.http.get(image_url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let bytes = response.bytes().await.ok()?;

        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?
            .decode()
            .ok()
    }
}

impl Default for XkcdClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn comic_body(id: u32, title: &str) -> serde_json::Value {
        serde_json::json!({
            "num": id,
            "title": title,
            "img": format!("https://imgs.xkcd.com/comics/{id}.png"),
            "alt": "alt text",
            "day": "17",
            "month": "3",
            "year": "2021",
            "transcript": "",
            "news": "",
            "safe_title": title,
            "link": ""
        })
    }

    #[tokio::test]
    async fn fetches_comic_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/614/info.0.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(comic_body(614, "Woodpecker")))
            .mount(&server)
            .await;

        let client = XkcdClient::with_base_url(&server.uri());
        let comic = client.fetch_comic(614).await.unwrap();
        assert_eq!(comic.id, 614);
        assert_eq!(comic.title, "Woodpecker");
        assert_eq!(comic.published(), "17/3/2021");
    }

    #[tokio::test]
    async fn latest_alias_hits_root_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info.0.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(comic_body(3000, "Latest")))
            .mount(&server)
            .await;

        let client = XkcdClient::with_base_url(&server.uri());
        let comic = client.fetch_latest().await.unwrap();
        assert_eq!(comic.id, 3000);
    }

    #[tokio::test]
    async fn zero_id_rejected_before_any_request() {
        let server = MockServer::start().await;
        let client = XkcdClient::with_base_url(&server.uri());

        let err = client.fetch_comic(0).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidId(0)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_2xx_is_an_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/404/info.0.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = XkcdClient::with_base_url(&server.uri());
        let err = client.fetch_comic(404).await.unwrap_err();
        assert!(matches!(err, FetchError::Upstream(s) if s.as_u16() == 404));
    }

    #[tokio::test]
    async fn malformed_body_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/7/info.0.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = XkcdClient::with_base_url(&server.uri());
        let err = client.fetch_comic(7).await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn list_path_collapses_failures_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/info.0.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2/info.0.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{broken"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/3/info.0.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(comic_body(3, "Ok")))
            .mount(&server)
            .await;

        let client = XkcdClient::with_base_url(&server.uri());
        assert!(client.fetch_comic_opt(1).await.is_none());
        assert!(client.fetch_comic_opt(2).await.is_none());
        assert!(client.fetch_comic_opt(3).await.is_some());
    }

    #[tokio::test]
    async fn connection_failure_collapses_to_none_on_the_list_path() {
        // Nothing listens on this port; the connection is refused.
        let client = XkcdClient::with_base_url("http://127.0.0.1:1");

        let err = client.fetch_comic(614).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
        assert!(client.fetch_comic_opt(614).await.is_none());
    }
}
