use std::path::PathBuf;

use reqwest::StatusCode;

/// Failure to turn the input page into video identifiers.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("could not fetch page {url}: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("page {url} answered with status {status}")]
    Status { url: String, status: StatusCode },

    #[error("no `guid` variable found in page {url}")]
    MissingGuid { url: String },
}

/// Failure of the related-video listing request.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("related videos request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("related videos endpoint answered with status {0}")]
    Status(StatusCode),

    #[error("related videos payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Failure to go from a video id to its segment list.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("request to {url} failed: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: StatusCode },

    #[error("stream info is not valid JSON: {0}")]
    StreamInfo(#[from] serde_json::Error),

    #[error("invalid manifest url `{input}`: {source}")]
    InvalidUrl { input: String, source: url::ParseError },
}

/// Failure of a single segment fetch, or of the fetch round as a whole.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("could not create working directory {path}: {source}")]
    WorkingDir { path: PathBuf, source: std::io::Error },

    #[error("segment {url} could not be fetched: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("segment {url} answered with status {status}")]
    Status { url: String, status: StatusCode },

    #[error("could not write segment to {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("segment task stopped unexpectedly: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{failed} of {total} segments could not be fetched")]
    Incomplete { failed: usize, total: usize },
}

impl FetchError {
    /// Errors worth another attempt when retries are enabled.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transport { .. })
    }
}

/// Failure while merging, cleaning up or relocating a video's segments.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("manifest listed no segments, nothing to assemble")]
    NoSegments,

    #[error("could not run {program}: {source}")]
    Spawn { program: String, source: std::io::Error },

    #[error("{program} exited with {status}: {stderr}")]
    Muxer {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{action} {path} failed: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("assembly task stopped unexpectedly: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AssemblyError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AssemblyError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Page(#[from] PageError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("video serial number {serial} out of range (1..={count})")]
    NotFound { serial: usize, count: usize },

    #[error("could not build http client: {0}")]
    Client(reqwest::Error),

    #[error("i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
