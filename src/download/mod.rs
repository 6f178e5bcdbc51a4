pub mod assemble;
pub mod manifest;
pub mod page;
pub mod segment;
pub mod video;

use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, ORIGIN, REFERER},
    Response,
};
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36 Edg/128.0.0";

/// Shared HTTP client for page, api, manifest and segment requests.
#[derive(Debug, Clone)]
pub struct DownloadClient {
    client: reqwest::Client,
}

impl DownloadClient {
    /// Build a client whose requests look like they come from `page`.
    ///
    /// The site's api and cdn hosts check `Referer`/`Origin`, so both are set to
    /// the page's `scheme://host` when a page is given.
    pub fn new(page: Option<&Url>) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8,en-US;q=0.7"),
        );

        if let Some(origin) = page.map(|url| url.origin().ascii_serialization()) {
            if let Ok(value) = HeaderValue::from_str(&origin) {
                headers.insert(ORIGIN, value);
            }
            if let Ok(value) = HeaderValue::from_str(&format!("{origin}/")) {
                headers.insert(REFERER, value);
            }
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }

    /// Issue a GET request. The status is left for the caller to judge.
    pub async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Response, reqwest::Error> {
        self.client
            .get(url)
            .query(query)
            .timeout(timeout)
            .send()
            .await
    }
}
