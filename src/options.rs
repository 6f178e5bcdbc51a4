use std::{path::PathBuf, time::Duration};

pub const STREAM_INFO_ENDPOINT: &str = "https://vdn.apps.cntv.cn/api/getHttpVideoInfo.do";
pub const RELATED_ENDPOINT: &str = "https://api.cntv.cn/video/getVideoListByTopicIdInfo";

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub stream_info: String,
    pub related: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            stream_info: STREAM_INFO_ENDPOINT.to_string(),
            related: RELATED_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub output_dir: PathBuf,
    pub max_parallel_downloads: usize,
    /// Extra attempts for segments that failed with a transport error.
    pub max_download_retries: usize,
    pub request_timeout: Duration,
    pub segment_timeout: Duration,
    pub endpoints: Endpoints,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            max_parallel_downloads: 8,
            max_download_retries: 0,
            request_timeout: Duration::from_secs(60),
            segment_timeout: Duration::from_secs(120),
            endpoints: Endpoints::default(),
        }
    }
}
