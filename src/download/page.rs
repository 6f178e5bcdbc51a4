use std::{sync::OnceLock, time::Duration};

use regex::Regex;
use tracing::{debug, info};
use url::Url;

use crate::{catalog::VideoRecord, download::DownloadClient, error::PageError};

/// `var name = 'value';` or `var name = "value";`
const JS_VARIABLE_PATTERN: &str = r#"var\s+(\w+)\s*=\s*['"](.*?)['"];"#;

static JS_VARIABLE: OnceLock<Regex> = OnceLock::new();

fn js_variable() -> &'static Regex {
    JS_VARIABLE.get_or_init(|| Regex::new(JS_VARIABLE_PATTERN).expect("js variable regex"))
}

/// Identifiers scraped from a video page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub guid: Option<String>,
    pub external_id: Option<String>,
    pub channel_id: Option<String>,
    pub title: Option<String>,
}

impl PageInfo {
    /// Pick the known variables out of the page's inline scripts.
    pub fn from_html(html: &str) -> Self {
        let mut info = PageInfo::default();

        for cap in js_variable().captures_iter(html) {
            let value = cap[2].to_string();
            match &cap[1] {
                "guid" => info.guid = Some(value),
                "itemid1" => info.external_id = Some(value),
                "commentTitle" => info.title = Some(value),
                "column_id" => info.channel_id = Some(value),
                _ => {}
            }
        }

        info
    }

    /// Turn the scraped fields into the primary catalog record.
    pub fn into_record(self, url: &Url) -> Result<VideoRecord, PageError> {
        let guid = self.guid.ok_or_else(|| PageError::MissingGuid {
            url: url.to_string(),
        })?;

        Ok(VideoRecord {
            url: url.to_string(),
            title: self.title.unwrap_or_else(|| guid.clone()),
            external_id: self.external_id.unwrap_or_default(),
            guid,
            channel_id: self.channel_id,
        })
    }
}

/// Fetch the page at `url` and extract its video identifiers.
pub async fn find_video(
    client: &DownloadClient,
    url: &Url,
    timeout: Duration,
) -> Result<PageInfo, PageError> {
    info!("Fetching video page {url}");

    let transport = |source| PageError::Transport {
        url: url.to_string(),
        source,
    };

    let response = client
        .get(url.as_str(), &[], timeout)
        .await
        .map_err(transport)?;

    if !response.status().is_success() {
        return Err(PageError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let html = response.text().await.map_err(transport)?;
    let info = PageInfo::from_html(&html);
    debug!("Page variables: {info:?}");

    Ok(info)
}
