use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use futures::StreamExt;
use reqwest::StatusCode;
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
    sync::Semaphore,
};
use tracing::{debug, error, info, warn};

use crate::{
    download::{manifest::Segment, DownloadClient},
    error::FetchError,
    options::Options,
};

/// Segment bodies are written to disk in pieces of this size.
const CHUNK_SIZE: usize = 1024;

/// Fetch one segment into `folder`, streaming the body to `folder/<segment name>`.
///
/// A non-200 answer creates no file. A body that breaks off midway removes the
/// partial file so nothing half-written is handed to assembly.
pub async fn fetch(
    client: &DownloadClient,
    segment: &Segment,
    folder: &Path,
    timeout: Duration,
) -> Result<PathBuf, FetchError> {
    let seg_path = folder.join(&segment.name);

    let transport = |source| FetchError::Transport {
        url: segment.uri.to_string(),
        source,
    };
    let write = |source| FetchError::Write {
        path: seg_path.clone(),
        source,
    };

    let response = client
        .get(segment.uri.as_str(), &[], timeout)
        .await
        .map_err(transport)?;

    if response.status() != StatusCode::OK {
        return Err(FetchError::Status {
            url: segment.uri.to_string(),
            status: response.status(),
        });
    }

    let file = File::create(&seg_path).await.map_err(write)?;
    let mut file = BufWriter::new(file);
    let mut body = response.bytes_stream();

    let streamed = async {
        while let Some(chunk) = body.next().await {
            let chunk: Bytes = chunk.map_err(transport)?;
            for piece in chunk.chunks(CHUNK_SIZE) {
                file.write_all(piece).await.map_err(write)?;
            }
        }
        file.flush().await.map_err(write)
    }
    .await;

    if let Err(err) = streamed {
        if let Err(rm_err) = tokio::fs::remove_file(&seg_path).await {
            debug!("Could not remove partial segment {}: {rm_err}", seg_path.display());
        }
        return Err(err);
    }

    Ok(seg_path)
}

struct Progress {
    done: AtomicUsize,
    total: usize,
}

impl Progress {
    fn finished(&self, segment: &Segment) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "{done:width$} / {total} segs ({pct:5.2}%)\t{name}",
            total = self.total,
            pct = done as f64 / self.total as f64 * 100.0,
            name = segment.name,
            width = self.total.to_string().len(),
        );
    }
}

/// Fetch every segment into `folder` with at most `max_parallel_downloads` in flight.
///
/// Every fetch is awaited before this returns, whatever the individual outcomes.
/// Segments that failed with a transport error are re-attempted up to
/// `max_download_retries` extra rounds. Any segment still missing after that
/// fails the whole round with [`FetchError::Incomplete`].
pub async fn download_segments(
    client: &DownloadClient,
    segments: &[Segment],
    folder: &Path,
    options: &Options,
) -> Result<(), FetchError> {
    let semaphore = Arc::new(Semaphore::new(options.max_parallel_downloads.max(1)));
    let progress = Arc::new(Progress {
        done: AtomicUsize::new(0),
        total: segments.len(),
    });
    let folder = Arc::new(folder.to_path_buf());

    let mut pending = segments.to_vec();
    let mut failed = 0;
    let mut tries = 0;

    while !pending.is_empty() {
        let last_try = tries >= options.max_download_retries;

        let tasks = pending
            .into_iter()
            .map(|segment| {
                let client = client.clone();
                let semaphore = Arc::clone(&semaphore);
                let progress = Arc::clone(&progress);
                let folder = Arc::clone(&folder);
                let timeout = options.segment_timeout;

                tokio::spawn(async move {
                    // the semaphore is never closed
                    let _permit = semaphore.acquire_owned().await.ok();
                    let result = fetch(&client, &segment, &folder, timeout).await;
                    if result.is_ok() {
                        progress.finished(&segment);
                    }
                    (segment, result)
                })
            })
            .collect::<Vec<_>>();

        pending = Vec::new();

        for task in tasks {
            match task.await {
                Ok((_, Ok(path))) => debug!("Stored {}", path.display()),
                Ok((segment, Err(err))) if err.is_transient() && !last_try => {
                    warn!("Segment {} failed, will retry: {err}", segment.name);
                    pending.push(segment);
                }
                Ok((segment, Err(err))) => {
                    error!("Segment {} failed: {err}", segment.name);
                    failed += 1;
                }
                Err(err) => {
                    error!("{}", FetchError::Task(err));
                    failed += 1;
                }
            }
        }

        if !pending.is_empty() {
            info!("Retrying {} segments", pending.len());
        }
        tries += 1;
    }

    if failed > 0 {
        return Err(FetchError::Incomplete {
            failed,
            total: segments.len(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };
    use url::Url;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn segment(server: &MockServer, name: &str) -> Segment {
        Segment {
            name: name.to_string(),
            uri: Url::parse(&format!("{}/hls/{name}", server.uri())).unwrap(),
        }
    }

    async fn serve(server: &MockServer, name: &str, status: u16, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(format!("/hls/{name}")))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetch_streams_body_to_folder() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        serve(&server, "seg1.ts", 200, body.clone()).await;

        let dir = tempfile::tempdir().unwrap();
        let client = DownloadClient::new(None).unwrap();
        let stored = fetch(
            &client,
            &segment(&server, "seg1.ts"),
            dir.path(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(stored, dir.path().join("seg1.ts"));
        assert_eq!(std::fs::read(stored).unwrap(), body);
    }

    #[tokio::test]
    async fn non_ok_status_creates_no_file() {
        let server = MockServer::start().await;
        serve(&server, "seg1.ts", 404, Vec::new()).await;

        let dir = tempfile::tempdir().unwrap();
        let client = DownloadClient::new(None).unwrap();
        let err = fetch(
            &client,
            &segment(&server, "seg1.ts"),
            dir.path(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FetchError::Status { .. }));
        assert!(!dir.path().join("seg1.ts").exists());
    }

    #[tokio::test]
    async fn all_segments_land_in_folder() {
        let server = MockServer::start().await;
        let names = ["a.ts", "b.ts", "c.ts", "d.ts", "e.ts"];
        for name in names {
            serve(&server, name, 200, name.as_bytes().to_vec()).await;
        }

        let dir = tempfile::tempdir().unwrap();
        let client = DownloadClient::new(None).unwrap();
        let segments: Vec<Segment> = names.iter().map(|n| segment(&server, n)).collect();
        let options = Options {
            max_parallel_downloads: 2,
            ..Options::default()
        };

        download_segments(&client, &segments, dir.path(), &options)
            .await
            .unwrap();

        for name in names {
            assert_eq!(std::fs::read(dir.path().join(name)).unwrap(), name.as_bytes());
        }
    }

    #[tokio::test]
    async fn missing_segment_fails_after_all_fetches_finish() {
        let server = MockServer::start().await;
        serve(&server, "a.ts", 200, b"a".to_vec()).await;
        serve(&server, "b.ts", 500, Vec::new()).await;
        serve(&server, "c.ts", 200, b"c".to_vec()).await;

        let dir = tempfile::tempdir().unwrap();
        let client = DownloadClient::new(None).unwrap();
        let segments: Vec<Segment> = ["a.ts", "b.ts", "c.ts"]
            .iter()
            .map(|n| segment(&server, n))
            .collect();

        let err = download_segments(&client, &segments, dir.path(), &Options::default())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Incomplete { failed: 1, total: 3 }));
        assert!(dir.path().join("a.ts").exists());
        assert!(!dir.path().join("b.ts").exists());
        assert!(dir.path().join("c.ts").exists());
    }

    #[tokio::test]
    async fn timed_out_segment_is_retried_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hls/seg1.ts"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"slow".to_vec())
                    .set_delay(Duration::from_secs(2)),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        serve(&server, "seg1.ts", 200, b"fast".to_vec()).await;

        let dir = tempfile::tempdir().unwrap();
        let client = DownloadClient::new(None).unwrap();
        let options = Options {
            max_download_retries: 1,
            segment_timeout: Duration::from_millis(200),
            ..Options::default()
        };

        download_segments(&client, &[segment(&server, "seg1.ts")], dir.path(), &options)
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("seg1.ts")).unwrap(), b"fast");
    }

    #[tokio::test]
    async fn status_errors_are_never_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hls/seg1.ts"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = DownloadClient::new(None).unwrap();
        let options = Options {
            max_download_retries: 3,
            ..Options::default()
        };

        let err = download_segments(&client, &[segment(&server, "seg1.ts")], dir.path(), &options)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Incomplete { failed: 1, total: 1 }));
        assert!(!dir.path().join("seg1.ts").exists());
    }

    /// Serves one response announcing more bytes than it sends, then hangs up.
    async fn truncated_body_server() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\npartial")
                .await
                .unwrap();
            socket.flush().await.unwrap();
        });

        Url::parse(&format!("http://{addr}/hls/seg1.ts")).unwrap()
    }

    #[tokio::test]
    async fn broken_body_leaves_no_partial_file() {
        let uri = truncated_body_server().await;
        let segment = Segment {
            name: "seg1.ts".to_string(),
            uri,
        };

        let dir = tempfile::tempdir().unwrap();
        let client = DownloadClient::new(None).unwrap();
        let err = fetch(&client, &segment, dir.path(), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Transport { .. }));
        assert!(!dir.path().join("seg1.ts").exists());
    }

    #[tokio::test]
    async fn empty_segment_list_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let client = DownloadClient::new(None).unwrap();

        download_segments(&client, &[], dir.path(), &Options::default())
            .await
            .unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
