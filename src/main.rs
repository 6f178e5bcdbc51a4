mod catalog;
mod console;
mod download;
mod error;
mod logging;
mod options;

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::{ArgAction, Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use url::Url;

use crate::{
    catalog::{Catalog, Status},
    console::Choice,
    download::{
        assemble::{Assembler, ByteConcat, Ffmpeg, Muxer},
        page,
        video::VideoDownloader,
        DownloadClient,
    },
    error::{Error, Result},
    options::{Endpoints, Options, RELATED_ENDPOINT, STREAM_INFO_ENDPOINT},
};

const PROMPT: &str = "Select a video serial number (y: download all, q: quit): ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MuxerKind {
    /// stream-copy through ffmpeg into an mp4 file
    Ffmpeg,
    /// append the raw segment bytes into a ts file
    Concat,
}

/// Download a video page and the related videos of its channel.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[clap(short, long, value_parser = url_parser, env = "CCTV_DL_URL")]
    /// the video page url that you want to download
    url: Url,

    #[clap(short, long, default_value = ".", env = "CCTV_DL_OUTPUT")]
    /// the output directory
    output: PathBuf,

    #[clap(short, long, default_value = "8")]
    /// set the maximum number of parallel segment downloads
    parallel: usize,

    #[clap(short, long, default_value = "0")]
    /// set the number of extra attempts for segments that failed to transfer
    retries: usize,

    #[clap(long, default_value = "60")]
    /// timeout in seconds for page, api and manifest requests
    timeout: u64,

    #[clap(long, default_value = "120")]
    /// timeout in seconds for a single segment download
    segment_timeout: u64,

    #[clap(long, value_enum, default_value_t = MuxerKind::Ffmpeg, env = "CCTV_DL_MUXER")]
    /// how the segments are joined into the final file
    muxer: MuxerKind,

    #[clap(short, long)]
    /// answer the selection prompt without asking (a serial number, `y` or `q`); repeatable
    select: Vec<String>,

    #[clap(short, long, action = ArgAction::Count)]
    /// more logs (-v debug, -vv trace)
    verbose: u8,

    #[clap(long, hide = true, default_value = STREAM_INFO_ENDPOINT, env = "CCTV_DL_STREAM_INFO_ENDPOINT")]
    stream_info_endpoint: String,

    #[clap(long, hide = true, default_value = RELATED_ENDPOINT, env = "CCTV_DL_RELATED_ENDPOINT")]
    related_endpoint: String,
}

impl Args {
    fn options(&self) -> Options {
        Options {
            output_dir: self.output.clone(),
            max_parallel_downloads: self.parallel,
            max_download_retries: self.retries,
            request_timeout: Duration::from_secs(self.timeout),
            segment_timeout: Duration::from_secs(self.segment_timeout),
            endpoints: Endpoints {
                stream_info: self.stream_info_endpoint.clone(),
                related: self.related_endpoint.clone(),
            },
        }
    }
}

fn url_parser(url: &str) -> std::result::Result<Url, String> {
    let url = url.trim();
    let url = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else if url.contains("://") {
        return Err("URL must start with http or https".to_string());
    } else {
        format!("https://{}", url.trim_start_matches("//"))
    };

    let parsed = Url::parse(&url).map_err(|err| format!("Invalid url: {err}"))?;
    if parsed.host_str().is_none() {
        return Err("URL must have a host".to_string());
    }

    Ok(parsed)
}

enum Flow {
    Continue,
    Stop,
}

/// Whether anything selected so far failed.
#[derive(Default)]
struct Session {
    failed: bool,
}

impl Session {
    async fn apply(&mut self, catalog: &Catalog, choice: Choice) -> Flow {
        match choice {
            Choice::Serial(serial) => {
                match catalog.download_one(serial).await {
                    Ok(outcome) => match &outcome.result {
                        Ok(_) => console::success(&format!(
                            "Download video {} successfully",
                            outcome.title
                        )),
                        Err(err) => {
                            self.failed = true;
                            console::error(&format!("Download video {} failed: {err}", outcome.title));
                        }
                    },
                    Err(err) => console::error(&err.to_string()),
                }
                Flow::Continue
            }
            Choice::OutOfRange(serial) => {
                console::error(&format!("Video serial number {serial} out of range"));
                Flow::Continue
            }
            Choice::All => {
                let report = catalog.download_all().await;
                if report.is_success() {
                    console::success("Download all videos successfully");
                } else {
                    self.failed = true;
                    for outcome in report.failures() {
                        if let Err(err) = &outcome.result {
                            console::error(&format!(
                                "Download video {} {}: {err}",
                                outcome.title,
                                Status::Failed
                            ));
                        }
                    }
                }
                Flow::Stop
            }
            Choice::Quit => {
                console::success("Exit, bye bye!");
                Flow::Stop
            }
            Choice::Invalid(input) => {
                console::error(&format!("Invalid input: {input}"));
                Flow::Continue
            }
        }
    }
}

/// Resolve the input page, then list it and its related videos.
async fn list_videos(
    client: &DownloadClient,
    args: &Args,
    options: Options,
    muxer: Arc<dyn Muxer>,
) -> Result<Catalog> {
    let info = page::find_video(client, &args.url, options.request_timeout).await?;
    let primary = info.into_record(&args.url)?;

    let mut catalog = Catalog::new(VideoDownloader::new(
        client.clone(),
        Assembler::new(muxer),
        options,
    ));
    catalog.add_primary(primary);

    console::print_header();
    for (index, video) in catalog.videos().iter().enumerate() {
        console::print_row(index + 1, video);
    }

    let listed = catalog.len();
    match catalog.discover_related().await {
        Ok(related) => {
            for (index, video) in related.enumerate() {
                console::print_row(listed + index + 1, &video);
            }
        }
        Err(err) => warn!("No related videos listed: {err}"),
    }

    Ok(catalog)
}

async fn run(args: Args) -> Result<bool> {
    let options = args.options();
    tokio::fs::create_dir_all(&options.output_dir).await?;

    let muxer: Arc<dyn Muxer> = match args.muxer {
        MuxerKind::Ffmpeg => Arc::new(Ffmpeg::new()?),
        MuxerKind::Concat => Arc::new(ByteConcat),
    };

    let client = DownloadClient::new(Some(&args.url)).map_err(Error::Client)?;
    let catalog = list_videos(&client, &args, options, muxer).await?;

    let mut session = Session::default();

    if !args.select.is_empty() {
        for input in &args.select {
            let choice = Choice::parse(input, catalog.len());
            if let Flow::Stop = session.apply(&catalog, choice).await {
                break;
            }
        }
        return Ok(!session.failed);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        console::prompt(PROMPT);
        let Some(input) = lines.next_line().await? else {
            console::info("No more input, bye bye!");
            break;
        };

        let choice = Choice::parse(&input, catalog.len());
        if let Flow::Stop = session.apply(&catalog, choice).await {
            break;
        }
    }

    Ok(!session.failed)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init_logging(args.verbose);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            console::error(&format!("Parse video information failed: {err}"));
            ExitCode::FAILURE
        }
    }
}
