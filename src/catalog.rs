use std::{collections::HashSet, path::PathBuf, sync::OnceLock};

use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    download::video::VideoDownloader,
    error::{DiscoveryError, Error, Result},
};

/// `callback(<payload>)`, outermost parentheses.
const JSONP_PATTERN: &str = r"(?s)\((.*)\)";

static JSONP: OnceLock<Regex> = OnceLock::new();

/// Payload of a JSONP answer, without its callback wrapper.
pub fn strip_jsonp(body: &str) -> Option<&str> {
    JSONP
        .get_or_init(|| Regex::new(JSONP_PATTERN).expect("jsonp regex"))
        .captures(body)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    pub url: String,
    pub title: String,
    pub external_id: String,
    /// Unique within a run.
    pub guid: String,
    pub channel_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RelatedPayload {
    data: Option<Vec<RelatedVideo>>,
}

#[derive(Debug, Deserialize)]
struct RelatedVideo {
    video_url: Option<String>,
    video_title: Option<String>,
    video_id: Option<String>,
    guid: Option<String>,
}

impl RelatedVideo {
    fn into_record(self, channel_id: Option<&str>) -> Option<VideoRecord> {
        let guid = self.guid.filter(|guid| !guid.is_empty())?;

        Some(VideoRecord {
            url: self.video_url.unwrap_or_default(),
            title: self.video_title.unwrap_or_else(|| guid.clone()),
            external_id: self.video_id.unwrap_or_default(),
            guid,
            channel_id: channel_id.map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failed,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Success => f.write_str("success"),
            Status::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub title: String,
    pub result: Result<PathBuf>,
}

impl DownloadOutcome {
    pub fn status(&self) -> Status {
        match self.result {
            Ok(_) => Status::Success,
            Err(_) => Status::Failed,
        }
    }
}

/// Outcomes of a batch download, one per catalog entry and in catalog order.
///
/// Entries are never merged, so two videos sharing a title both stay visible.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<DownloadOutcome>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|outcome| outcome.status() == Status::Success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DownloadOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status() == Status::Failed)
    }

    #[cfg(test)]
    pub fn status_of(&self, title: &str) -> Option<Status> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.title == title)
            .map(DownloadOutcome::status)
    }
}

/// The videos found for this run: the primary one, then its related videos.
///
/// Serial numbers are 1-based insertion positions. No two entries share a guid.
#[derive(Debug)]
pub struct Catalog {
    videos: Vec<VideoRecord>,
    guids: HashSet<String>,
    downloader: VideoDownloader,
}

impl Catalog {
    pub fn new(downloader: VideoDownloader) -> Self {
        Self {
            videos: Vec::new(),
            guids: HashSet::new(),
            downloader,
        }
    }

    pub fn add_primary(&mut self, record: VideoRecord) -> bool {
        self.push(record)
    }

    /// Append `record` unless its guid is already known.
    fn push(&mut self, record: VideoRecord) -> bool {
        if !self.guids.insert(record.guid.clone()) {
            return false;
        }
        self.videos.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn videos(&self) -> &[VideoRecord] {
        &self.videos
    }

    pub fn get(&self, serial: usize) -> Result<&VideoRecord> {
        serial
            .checked_sub(1)
            .and_then(|index| self.videos.get(index))
            .ok_or(Error::NotFound {
                serial,
                count: self.videos.len(),
            })
    }

    /// Ask the site for videos of the primary video's channel.
    ///
    /// The request is issued once, here. The returned iterator appends each new
    /// video to the catalog as it is yielded and silently drops guids already
    /// present. Calling this again issues a new request.
    pub async fn discover_related(&mut self) -> std::result::Result<Related<'_>, DiscoveryError> {
        let Some((video_id, channel_id)) = self
            .videos
            .first()
            .map(|primary| (primary.external_id.clone(), primary.channel_id.clone()))
        else {
            return Ok(Related::empty(self));
        };

        let options = self.downloader.options();

        info!("Looking for related videos");
        let response = self
            .downloader
            .client()
            .get(
                &options.endpoints.related,
                &[
                    ("videoid", video_id.as_str()),
                    ("topicid", channel_id.as_deref().unwrap_or_default()),
                    ("serviceId", "tvcctv"),
                    ("type", "1"),
                    ("t", "jsonp"),
                    ("cb", "setItem1"),
                ],
                options.request_timeout,
            )
            .await?;

        if response.status() != StatusCode::OK {
            return Err(DiscoveryError::Status(response.status()));
        }

        let body = response.text().await?;
        let payload: RelatedPayload = match strip_jsonp(&body) {
            Some(json) => serde_json::from_str(json)?,
            None => {
                warn!("Related videos answer is not JSONP, ignoring it");
                RelatedPayload::default()
            }
        };

        let pending = payload.data.unwrap_or_default();
        debug!("{} related candidates", pending.len());

        Ok(Related {
            catalog: self,
            channel_id,
            pending: pending.into_iter(),
        })
    }

    /// Download the video with the given serial number.
    pub async fn download_one(&self, serial: usize) -> Result<DownloadOutcome> {
        let video = self.get(serial)?;
        Ok(self.download_video(video).await)
    }

    /// Download every video, one after the other. A failure does not stop the batch.
    pub async fn download_all(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for video in &self.videos {
            report.outcomes.push(self.download_video(video).await);
        }
        report
    }

    async fn download_video(&self, video: &VideoRecord) -> DownloadOutcome {
        DownloadOutcome {
            title: video.title.clone(),
            result: self.downloader.download(video).await,
        }
    }
}

/// Related videos not yet yielded. See [`Catalog::discover_related`].
pub struct Related<'a> {
    catalog: &'a mut Catalog,
    channel_id: Option<String>,
    pending: std::vec::IntoIter<RelatedVideo>,
}

impl<'a> Related<'a> {
    fn empty(catalog: &'a mut Catalog) -> Self {
        Self {
            catalog,
            channel_id: None,
            pending: Vec::new().into_iter(),
        }
    }
}

impl Iterator for Related<'_> {
    type Item = VideoRecord;

    fn next(&mut self) -> Option<Self::Item> {
        for video in self.pending.by_ref() {
            let Some(record) = video.into_record(self.channel_id.as_deref()) else {
                warn!("Related video without guid, skipping it");
                continue;
            };

            if self.catalog.push(record.clone()) {
                return Some(record);
            }
            debug!("Video {} already listed", record.guid);
        }

        None
    }
}
