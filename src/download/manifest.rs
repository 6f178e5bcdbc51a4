use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::{download::DownloadClient, error::ResolutionError, options::Options};

const MANIFEST_EXTENSION: &str = ".m3u8";
const SEGMENT_EXTENSION: &str = ".ts";

/// Body of the stream-info endpoint. Only `hls_url` is needed to go further.
#[derive(Debug, Default, Deserialize)]
pub struct StreamInfo {
    pub hls_url: Option<String>,
}

/// A segment to fetch: its absolute location and the file name it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub uri: Url,
}

impl Segment {
    fn new(uri: Url) -> Self {
        let name = match uri.path().rsplit_once('/') {
            Some((_, name)) => name.to_string(),
            None => uri.path().to_string(),
        };

        Self { name, uri }
    }
}

/// Path of the first variant playlist listed in a top-level manifest.
pub fn select_variant(manifest: &str) -> Option<&str> {
    manifest
        .lines()
        .map(str::trim)
        .find(|line| line.ends_with(MANIFEST_EXTENSION))
}

/// Segment file lines of a variant playlist, in playback order.
pub fn segment_lines(variant: &str) -> Vec<&str> {
    variant
        .lines()
        .map(str::trim)
        .filter(|line| line.ends_with(SEGMENT_EXTENSION))
        .collect()
}

/// Resolves a video id to its ordered segment list.
pub struct ManifestResolver<'a> {
    client: &'a DownloadClient,
    options: &'a Options,
}

impl<'a> ManifestResolver<'a> {
    pub fn new(client: &'a DownloadClient, options: &'a Options) -> Self {
        Self { client, options }
    }

    /// Follow stream info -> top-level manifest -> variant manifest.
    ///
    /// A missing manifest url or variant line is not an error: the video simply
    /// has no segments and the caller decides what that means.
    pub async fn resolve(&self, video_id: &str) -> Result<Vec<Segment>, ResolutionError> {
        let body = self
            .fetch_text(
                &self.options.endpoints.stream_info,
                &[
                    ("pid", video_id),
                    ("client", "flash"),
                    ("im", "0"),
                    ("vn", "2049"),
                    ("wlan", ""),
                ],
            )
            .await?;

        let stream_info: StreamInfo = serde_json::from_str(&body)?;
        let Some(hls_url) = stream_info.hls_url.filter(|url| !url.is_empty()) else {
            warn!("Stream info for {video_id} has no manifest url");
            return Ok(Vec::new());
        };

        let manifest_url = parse_url(&hls_url)?;
        debug!("Manifest url: {manifest_url}");
        let manifest = self.fetch_text(manifest_url.as_str(), &[]).await?;

        let Some(variant_path) = select_variant(&manifest) else {
            warn!("Manifest {manifest_url} lists no variant playlist");
            return Ok(Vec::new());
        };

        let variant_url = join(&manifest_url, variant_path)?;
        debug!("Variant url: {variant_url}");
        let variant = self.fetch_text(variant_url.as_str(), &[]).await?;

        let segments = segment_lines(&variant)
            .into_iter()
            .map(|line| join(&variant_url, line).map(Segment::new))
            .collect::<Result<Vec<_>, _>>()?;

        info!("Manifest resolved to {} segments", segments.len());
        Ok(segments)
    }

    async fn fetch_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, ResolutionError> {
        let transport = |source| ResolutionError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url, query, self.options.request_timeout)
            .await
            .map_err(transport)?;

        if response.status() != StatusCode::OK {
            return Err(ResolutionError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        response.text().await.map_err(transport)
    }
}

fn parse_url(input: &str) -> Result<Url, ResolutionError> {
    Url::parse(input).map_err(|source| ResolutionError::InvalidUrl {
        input: input.to_string(),
        source,
    })
}

/// Resolve a manifest line against the manifest it was found in.
///
/// Rooted paths land on the manifest's host and bare names land in the
/// manifest's directory.
fn join(base: &Url, line: &str) -> Result<Url, ResolutionError> {
    base.join(line).map_err(|source| ResolutionError::InvalidUrl {
        input: line.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    const MASTER: &str = "#EXTM3U\n\
        #EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH=1228800,RESOLUTION=1280x720\n\
        /asp/hls/1200/G1/1200.m3u8\n\
        #EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH=460800,RESOLUTION=640x360\n\
        /asp/hls/450/G1/450.m3u8\n";

    const VARIANT: &str = "#EXTM3U\n\
        #EXT-X-TARGETDURATION:10\n\
        #EXTINF:10,\n\
        seg1.ts\n\
        #EXTINF:10,\n\
        seg2.ts\n\
        #EXTINF:4,\n\
        seg3.ts\n\
        #EXT-X-ENDLIST\n";

    async fn mount_video(server: &MockServer, guid: &str) {
        Mock::given(method("GET"))
            .and(path("/api/getHttpVideoInfo.do"))
            .and(query_param("pid", guid))
            .and(query_param("client", "flash"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"{{"title":"T1","hls_url":"{}/asp/hls/main/0303000a/3/default/{guid}/main.m3u8?maxbr=2048"}}"#,
                server.uri()
            )))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/asp/hls/main/0303000a/3/default/{guid}/main.m3u8")))
            .respond_with(ResponseTemplate::new(200).set_body_string(MASTER))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/asp/hls/1200/G1/1200.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VARIANT))
            .mount(server)
            .await;
    }

    fn options(server: &MockServer) -> Options {
        let mut options = Options::default();
        options.endpoints.stream_info = format!("{}/api/getHttpVideoInfo.do", server.uri());
        options
    }

    #[test]
    fn first_variant_wins() {
        assert_eq!(select_variant(MASTER), Some("/asp/hls/1200/G1/1200.m3u8"));
        assert_eq!(select_variant("#EXTM3U\n#EXT-X-ENDLIST\n"), None);
    }

    #[test]
    fn segment_lines_keep_file_order() {
        assert_eq!(segment_lines(VARIANT), vec!["seg1.ts", "seg2.ts", "seg3.ts"]);
        assert!(segment_lines("#EXTM3U\n#EXT-X-ENDLIST\n").is_empty());
    }

    #[test]
    fn segment_name_is_url_basename() {
        let segment = Segment::new(Url::parse("http://cdn.example/a/b/0001.ts").unwrap());
        assert_eq!(segment.name, "0001.ts");
    }

    #[tokio::test]
    async fn resolves_segments_against_variant_url() {
        let server = MockServer::start().await;
        mount_video(&server, "G1").await;

        let client = DownloadClient::new(None).unwrap();
        let options = options(&server);
        let segments = ManifestResolver::new(&client, &options)
            .resolve("G1")
            .await
            .unwrap();

        let urls: Vec<String> = segments.iter().map(|s| s.uri.to_string()).collect();
        assert_eq!(
            urls,
            vec![
                format!("{}/asp/hls/1200/G1/seg1.ts", server.uri()),
                format!("{}/asp/hls/1200/G1/seg2.ts", server.uri()),
                format!("{}/asp/hls/1200/G1/seg3.ts", server.uri()),
            ]
        );
    }

    #[tokio::test]
    async fn resolving_twice_gives_the_same_list() {
        let server = MockServer::start().await;
        mount_video(&server, "G1").await;

        let client = DownloadClient::new(None).unwrap();
        let options = options(&server);
        let resolver = ManifestResolver::new(&client, &options);

        let first = resolver.resolve("G1").await.unwrap();
        let second = resolver.resolve("G1").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_manifest_url_yields_no_segments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/getHttpVideoInfo.do"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"title":"T1"}"#))
            .mount(&server)
            .await;

        let client = DownloadClient::new(None).unwrap();
        let options = options(&server);
        let segments = ManifestResolver::new(&client, &options)
            .resolve("G1")
            .await
            .unwrap();

        assert!(segments.is_empty());
    }

    #[tokio::test]
    async fn empty_variant_yields_no_segments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/getHttpVideoInfo.do"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"{{"hls_url":"{}/main.m3u8"}}"#,
                server.uri()
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/main.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n/v/1200.m3u8\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v/1200.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXT-X-ENDLIST\n"))
            .mount(&server)
            .await;

        let client = DownloadClient::new(None).unwrap();
        let options = options(&server);
        let segments = ManifestResolver::new(&client, &options)
            .resolve("G1")
            .await
            .unwrap();

        assert!(segments.is_empty());
    }

    #[tokio::test]
    async fn non_ok_stream_info_is_a_resolution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/getHttpVideoInfo.do"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = DownloadClient::new(None).unwrap();
        let options = options(&server);
        let err = ManifestResolver::new(&client, &options)
            .resolve("G1")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ResolutionError::Status { status, .. } if status == StatusCode::NOT_FOUND
        ));
    }
}
