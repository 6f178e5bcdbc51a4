use std::{fmt::Display, path::PathBuf};

use tracing::{error, info, info_span, warn, Instrument};

use crate::{
    catalog::VideoRecord,
    download::{
        assemble::Assembler,
        manifest::ManifestResolver,
        segment::download_segments,
        DownloadClient,
    },
    error::{AssemblyError, FetchError, Result},
    options::Options,
};

/// Where a single video's download currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Fetching,
    Assembling,
    Done,
    Failed,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Resolving => "RESOLVING",
            Stage::Fetching => "FETCHING",
            Stage::Assembling => "ASSEMBLING",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Runs resolve -> fetch -> assemble for one video at a time.
#[derive(Debug, Clone)]
pub struct VideoDownloader {
    client: DownloadClient,
    assembler: Assembler,
    options: Options,
}

impl VideoDownloader {
    pub fn new(client: DownloadClient, assembler: Assembler, options: Options) -> Self {
        Self {
            client,
            assembler,
            options,
        }
    }

    pub fn client(&self) -> &DownloadClient {
        &self.client
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Download `video` into the output directory and return the final file.
    ///
    /// Any failure ends the download; there is no retry between stages.
    pub async fn download(&self, video: &VideoRecord) -> Result<PathBuf> {
        let span = info_span!("video", guid = %video.guid);

        async {
            info!("Downloading video {}", video.title);
            let result = self.run(video).await;
            match &result {
                Ok(path) => info!(stage = %Stage::Done, "Saved to {}", path.display()),
                Err(err) => error!(stage = %Stage::Failed, "{err}"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, video: &VideoRecord) -> Result<PathBuf> {
        info!(stage = %Stage::Resolving);
        let segments = ManifestResolver::new(&self.client, &self.options)
            .resolve(&video.guid)
            .await?;

        info!(stage = %Stage::Fetching, "{} segments", segments.len());
        let working_dir = self.options.output_dir.join(&video.guid);
        tokio::fs::create_dir_all(&working_dir)
            .await
            .map_err(|source| FetchError::WorkingDir {
                path: working_dir.clone(),
                source,
            })?;

        if let Err(err) =
            download_segments(&self.client, &segments, &working_dir, &self.options).await
        {
            warn!("Fetched segments left in {}", working_dir.display());
            return Err(err.into());
        }

        info!(stage = %Stage::Assembling);
        let names: Vec<String> = segments.into_iter().map(|segment| segment.name).collect();
        let assembler = self.assembler.clone();
        let title = video.title.clone();
        let output_dir = self.options.output_dir.clone();

        let path = tokio::task::spawn_blocking(move || {
            assembler.assemble(&names, &working_dir, &title, &output_dir)
        })
        .await
        .map_err(AssemblyError::from)??;

        Ok(path)
    }
}
