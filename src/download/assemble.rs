use std::{
    ffi::OsStr,
    fmt::Debug,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Arc,
};

use tracing::{debug, info, warn};

use crate::error::AssemblyError;

pub const FFMPEG: &str = "ffmpeg";
const FFMPEG_DEFAULT_ARGS: [&str; 3] = ["-hide_banner", "-loglevel", "error"];

/// Subdirectory of the working dir the muxer writes into. Segment names always
/// end in `.ts`, so nothing in here can shadow a segment.
const MERGE_DIR: &str = ".merge";

/// What a muxer is asked to do: concatenate `segments` (also listed, in the
/// same order, in `list_file`) into `output` without re-encoding.
#[derive(Debug)]
pub struct ConcatJob<'a> {
    pub list_file: &'a Path,
    pub segments: &'a [PathBuf],
    pub output: &'a Path,
}

/// Something able to join stream segments into one playable file.
pub trait Muxer: Send + Sync + Debug {
    /// File extension of the produced container, without the dot.
    fn extension(&self) -> &'static str;

    /// Succeeds only if `job.output` holds a complete merged file.
    fn concat(&self, job: &ConcatJob<'_>) -> Result<(), AssemblyError>;
}

/// Stream-copy concatenation through the [ffmpeg](https://ffmpeg.org) concat demuxer.
#[derive(Debug)]
pub struct Ffmpeg;

impl Ffmpeg {
    /// Verify that the `ffmpeg` binary is reachable
    pub fn new() -> Result<Self, AssemblyError> {
        run(FFMPEG, |cmd| cmd.arg("-version"))?;
        Ok(Self)
    }
}

impl Muxer for Ffmpeg {
    fn extension(&self) -> &'static str {
        "mp4"
    }

    fn concat(&self, job: &ConcatJob<'_>) -> Result<(), AssemblyError> {
        run(FFMPEG, |cmd| cmd.args(concat_args(job)))
    }
}

/// `-f concat -safe 0 -i <list> -c copy <output>`, overwriting the output.
fn concat_args<'a>(job: &'a ConcatJob<'_>) -> Vec<&'a OsStr> {
    let mut args: Vec<&OsStr> = FFMPEG_DEFAULT_ARGS.into_iter().map(OsStr::new).collect();
    args.push(OsStr::new("-y"));
    args.extend(["-f", "concat", "-safe", "0", "-i"].map(OsStr::new));
    args.push(job.list_file.as_os_str());
    args.extend(["-c", "copy"].map(OsStr::new));
    args.push(job.output.as_os_str());
    args
}

/// Appends the segment bytes one after the other. MPEG-TS segments can be
/// joined that way, so no external program is needed.
#[derive(Debug)]
pub struct ByteConcat;

impl Muxer for ByteConcat {
    fn extension(&self) -> &'static str {
        "ts"
    }

    fn concat(&self, job: &ConcatJob<'_>) -> Result<(), AssemblyError> {
        let file = File::create(job.output)
            .map_err(|err| AssemblyError::io("creating", job.output, err))?;
        let mut file = BufWriter::new(file);

        for seg_path in job.segments {
            let segment_file = File::open(seg_path)
                .map_err(|err| AssemblyError::io("opening", seg_path, err))?;
            let mut content = BufReader::new(segment_file);
            io::copy(&mut content, &mut file)
                .map_err(|err| AssemblyError::io("appending", seg_path, err))?;
        }

        file.flush()
            .map_err(|err| AssemblyError::io("writing", job.output, err))
    }
}

/// Run a program and require a success status code. Its stderr is kept for the error.
fn run<F: FnOnce(&mut Command) -> &mut Command>(program: &str, f: F) -> Result<(), AssemblyError> {
    let mut cmd = Command::new(program);
    let cmd = f(&mut cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    debug!("Executing command: {cmd:?}");
    let res = cmd.output().map_err(|source| AssemblyError::Spawn {
        program: program.to_string(),
        source,
    })?;

    if res.status.success() {
        Ok(())
    } else {
        Err(AssemblyError::Muxer {
            program: program.to_string(),
            status: res.status,
            stderr: String::from_utf8_lossy(&res.stderr).trim().to_string(),
        })
    }
}

/// One line of the concat list, quoted the way ffmpeg's concat demuxer reads it.
pub fn list_entry(name: &str) -> String {
    format!("file '{}'", name.replace('\'', r"'\''"))
}

/// Make a video title usable as a file name. Falls back to `fallback` when
/// nothing usable is left.
pub fn sanitize_title(title: &str, fallback: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_end_matches('.').trim();

    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

/// First of `<title>.<ext>`, `<title> (2).<ext>`, ... that does not exist in `dir`.
pub fn find_unused_path(dir: &Path, title: &str, extension: &str) -> PathBuf {
    let mut output = dir.join(format!("{title}.{extension}"));

    let mut n = 2u32;
    while output.exists() {
        output.set_file_name(format!("{title} ({n}).{extension}"));
        n += 1;
    }

    output
}

/// Merges a fetched segment set and moves the result to the output directory.
#[derive(Debug, Clone)]
pub struct Assembler {
    muxer: Arc<dyn Muxer>,
}

impl Assembler {
    pub fn new(muxer: Arc<dyn Muxer>) -> Self {
        Self { muxer }
    }

    /// Merge `segment_names` (in this order) found in `working_dir` into
    /// `<title>.<ext>` inside `output_dir`, and return the final path.
    ///
    /// The muxer writes into a `.merge` subdirectory, so a title or key equal to
    /// a segment name never clobbers a segment or gets removed with them.
    /// The list file and every listed segment are removed whatever the merge
    /// outcome. On success the working directory is removed after relocation;
    /// after a failed merge it is removed best-effort.
    pub fn assemble(
        &self,
        segment_names: &[String],
        working_dir: &Path,
        title: &str,
        output_dir: &Path,
    ) -> Result<PathBuf, AssemblyError> {
        let key = working_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());

        if segment_names.is_empty() {
            remove_working_dir(working_dir);
            return Err(AssemblyError::NoSegments);
        }

        let list_file = working_dir.join(format!("{key}.txt"));
        let segments: Vec<PathBuf> = segment_names
            .iter()
            .map(|name| working_dir.join(name))
            .collect();
        let title = sanitize_title(title, &key);

        let merged = self.merge(segment_names, &list_file, &segments, working_dir, &key, &title);
        let cleaned = cleanup(&list_file, &segments);

        match (merged, cleaned) {
            (Ok(named), Ok(())) => {
                relocate(&named, working_dir, output_dir, &title, self.muxer.extension())
            }
            (Ok(_), Err(err)) => Err(err),
            (Err(err), cleaned) => {
                if let Err(cleanup_err) = cleaned {
                    warn!("Cleanup after failed merge: {cleanup_err}");
                }
                remove_working_dir(working_dir);
                Err(err)
            }
        }
    }

    /// Write the list file, run the muxer into [`MERGE_DIR`], and give the result its title.
    fn merge(
        &self,
        segment_names: &[String],
        list_file: &Path,
        segments: &[PathBuf],
        working_dir: &Path,
        key: &str,
        title: &str,
    ) -> Result<PathBuf, AssemblyError> {
        let list: String = segment_names
            .iter()
            .map(|name| list_entry(name) + "\n")
            .collect();
        fs::write(list_file, list).map_err(|err| AssemblyError::io("writing", list_file, err))?;

        let merge_dir = working_dir.join(MERGE_DIR);
        fs::create_dir_all(&merge_dir)
            .map_err(|err| AssemblyError::io("creating", &merge_dir, err))?;

        let extension = self.muxer.extension();
        let tmp = merge_dir.join(format!("{key}.{extension}"));
        info!("Merging {} segments with {:?}", segments.len(), self.muxer);
        self.muxer.concat(&ConcatJob {
            list_file,
            segments,
            output: &tmp,
        })?;

        let named = merge_dir.join(format!("{title}.{extension}"));
        fs::rename(&tmp, &named).map_err(|err| AssemblyError::io("renaming", &tmp, err))?;

        Ok(named)
    }
}

/// Remove the list file and every segment. Every removal is attempted; the
/// first failure is returned. Files that were never created are not an error.
fn cleanup(list_file: &Path, segments: &[PathBuf]) -> Result<(), AssemblyError> {
    let mut first_err = None;

    for path in std::iter::once(list_file).chain(segments.iter().map(PathBuf::as_path)) {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!("Could not remove {}: {err}", path.display());
                if first_err.is_none() {
                    first_err = Some(AssemblyError::io("removing", path, err));
                }
            }
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn relocate(
    named: &Path,
    working_dir: &Path,
    output_dir: &Path,
    title: &str,
    extension: &str,
) -> Result<PathBuf, AssemblyError> {
    let dest = find_unused_path(output_dir, title, extension);

    if let Err(err) = fs::rename(named, &dest) {
        // rename cannot cross filesystems
        debug!("Rename to {} failed ({err}), copying instead", dest.display());
        fs::copy(named, &dest).map_err(|err| AssemblyError::io("moving", named, err))?;
        fs::remove_file(named).map_err(|err| AssemblyError::io("removing", named, err))?;
    }

    fs::remove_dir_all(working_dir)
        .map_err(|err| AssemblyError::io("removing", working_dir, err))?;

    info!("Saved {}", dest.display());
    Ok(dest)
}

fn remove_working_dir(working_dir: &Path) {
    if let Err(err) = fs::remove_dir_all(working_dir) {
        warn!("Could not remove {}: {err}", working_dir.display());
    }
}
