#![forbid(unsafe_code)]

//! Download orchestration.
//!
//! For every (playlist, item) pair that survives filtering, this module
//! computes the target paths, writes the metadata sidecar, and drives the
//! external yt-dlp downloader. File presence on disk is the only durable
//! "already synchronized" state; there is no database. yt-dlp is always
//! invoked through an argument vector, never through a shell.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
#[cfg(test)]
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, bail};

use crate::api::{Playlist, PlaylistItem, PrivacyStatus};
use crate::filter::ItemFilter;
use crate::metadata::{MetadataRecord, write_metadata_once};

/// Ledger file consumed by yt-dlp for its own cross-run deduplication.
pub const ARCHIVE_FILE: &str = "archive.txt";
/// Cookie jar handed to yt-dlp, shared across all playlists.
pub const COOKIES_FILE: &str = "cookies.txt";
const VIDEO_EXTENSION: &str = "mkv";

#[cfg(test)]
static YT_DLP_STUB: Mutex<Option<PathBuf>> = Mutex::new(None);
#[cfg(test)]
static STUB_USE_LOCK: Mutex<()> = Mutex::new(());

// A failing test poisons these mutexes; recover instead of letting one
// test's panic cascade into unrelated ones.
#[cfg(test)]
fn lock_stub<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn yt_dlp_command() -> Command {
    #[cfg(test)]
    {
        if let Some(path) = lock_stub(&YT_DLP_STUB).clone() {
            return Command::new(path);
        }
    }
    Command::new("yt-dlp")
}

#[cfg(test)]
fn set_ytdlp_stub_path(path: PathBuf) -> YtDlpStubGuard {
    let guard = lock_stub(&STUB_USE_LOCK);
    *lock_stub(&YT_DLP_STUB) = Some(path);
    YtDlpStubGuard { lock: Some(guard) }
}

#[cfg(test)]
struct YtDlpStubGuard {
    lock: Option<MutexGuard<'static, ()>>,
}

#[cfg(test)]
impl Drop for YtDlpStubGuard {
    fn drop(&mut self) {
        *lock_stub(&YT_DLP_STUB) = None;
        self.lock.take();
    }
}

/// Normalizes catalog-supplied text into a usable path segment: every run of
/// `/` or `%` becomes a single `_`, every whitespace run (tabs and newlines
/// included) becomes a single space. Pure, total, and idempotent.
///
/// This is deliberately not full filesystem sanitization; platform quirks
/// such as reserved device names or trailing dots are out of scope.
pub fn normalize_filename(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' || c == '%' {
            normalized.push('_');
            while matches!(chars.peek(), Some('/' | '%')) {
                chars.next();
            }
        } else if c.is_whitespace() {
            normalized.push(' ');
            while chars.peek().is_some_and(|next| next.is_whitespace()) {
                chars.next();
            }
        } else {
            normalized.push(c);
        }
    }
    normalized
}

/// The three paths a download touches. Derived deterministically from the
/// normalized playlist and item titles; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub playlist_dir: PathBuf,
    pub video_file: PathBuf,
    pub metadata_file: PathBuf,
}

impl DownloadTarget {
    pub fn compute(download_path: &Path, playlist: &Playlist, item: &PlaylistItem) -> Self {
        let playlist_dir = download_path.join(normalize_filename(&playlist.title));
        let base = normalize_filename(&item.title);
        let video_file = playlist_dir.join(format!("{base}.{VIDEO_EXTENSION}"));
        let metadata_file = playlist_dir.join(format!("{base}.meta.json"));
        Self {
            playlist_dir,
            video_file,
            metadata_file,
        }
    }
}

/// Answers "is this media file already downloaded?".
///
/// Filesystem presence is the only durable download state, but the question
/// sits behind a trait so tests can answer it without real I/O.
pub trait MediaLedger {
    fn contains(&self, video_file: &Path) -> bool;
}

/// Default ledger: the file itself is the idempotency marker.
pub struct FsLedger;

impl MediaLedger for FsLedger {
    fn contains(&self, video_file: &Path) -> bool {
        video_file.exists()
    }
}

/// Orchestrator configuration. Built once from validated inputs and never
/// mutated mid-run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub download_path: PathBuf,
    /// Re-download media even when the target file already exists.
    pub force: bool,
    /// Print the exact yt-dlp invocation instead of performing any work.
    pub dry_run: bool,
    pub verbose: bool,
    /// Extra yt-dlp arguments, appended after the defaults so they can
    /// override them.
    pub ytdlp_args: Vec<String>,
    /// Write the `.meta.json` sidecar next to each video.
    pub write_metadata: bool,
    /// Invoke the external downloader for the media file itself.
    pub download_video: bool,
}

impl SyncOptions {
    pub fn new(download_path: PathBuf) -> Self {
        Self {
            download_path,
            force: false,
            dry_run: false,
            verbose: false,
            ytdlp_args: Vec::new(),
            write_metadata: true,
            download_video: true,
        }
    }
}

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Downloaded,
    AlreadyPresent,
    SkippedPrivate,
    MetadataOnly,
    DryRun,
}

/// Per-playlist tally. The run always attempts every filtered item; failures
/// are counted, not fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub downloaded: usize,
    pub already_present: usize,
    /// Sidecar written, media download disabled.
    pub metadata_only: usize,
    /// Dry-run items: invocation printed, nothing performed.
    pub planned: usize,
    pub skipped_private: usize,
    pub filtered_out: usize,
    pub failed: usize,
}

pub struct Syncer {
    options: SyncOptions,
    ledger: Box<dyn MediaLedger>,
}

impl Syncer {
    pub fn new(options: SyncOptions) -> Self {
        Self::with_ledger(options, Box::new(FsLedger))
    }

    pub fn with_ledger(options: SyncOptions, ledger: Box<dyn MediaLedger>) -> Self {
        Self { options, ledger }
    }

    pub fn target_for(&self, playlist: &Playlist, item: &PlaylistItem) -> DownloadTarget {
        DownloadTarget::compute(&self.options.download_path, playlist, item)
    }

    /// Handles one item end to end: privacy check, path computation, sidecar
    /// write, and the media download with its postcondition check.
    pub fn sync_item(&self, playlist: &Playlist, item: &PlaylistItem) -> Result<ItemOutcome> {
        // Private items are never downloaded, independent of any filter.
        if item.privacy == PrivacyStatus::Private {
            println!("Skipping private video \"{}\"", item.video_id);
            return Ok(ItemOutcome::SkippedPrivate);
        }

        let target = self.target_for(playlist, item);
        if self.options.verbose {
            println!("Saving to file: {}", target.video_file.display());
        }

        let argv = self.downloader_argv_for_item(&target, &item.video_id);

        if self.options.dry_run {
            // Mirror a live run: an item whose target already exists would
            // never reach the downloader, so report it the same way here.
            if self.options.download_video
                && !self.options.force
                && self.ledger.contains(&target.video_file)
            {
                println!("Already present: {}", target.video_file.display());
                return Ok(ItemOutcome::AlreadyPresent);
            }
            println!("Dry run: yt-dlp {}", render_argv(&argv));
            return Ok(ItemOutcome::DryRun);
        }

        fs::create_dir_all(&target.playlist_dir)
            .with_context(|| format!("creating {}", target.playlist_dir.display()))?;

        if self.options.write_metadata {
            let video_file_name = target
                .video_file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let record = MetadataRecord::new(&video_file_name, item.raw.clone());
            write_metadata_once(&target.metadata_file, &record)?;
        }

        if !self.options.download_video {
            return Ok(ItemOutcome::MetadataOnly);
        }

        if !self.options.force && self.ledger.contains(&target.video_file) {
            println!("Already present: {}", target.video_file.display());
            return Ok(ItemOutcome::AlreadyPresent);
        }

        self.invoke_downloader(&argv)?;

        // The tool's exit status is not trusted; the file must exist now.
        if !self.ledger.contains(&target.video_file) {
            bail!("file was not created: {}", target.video_file.display());
        }

        Ok(ItemOutcome::Downloaded)
    }

    /// Walks one playlist's item listing: filter, privacy skip, download.
    /// A listing error aborts the playlist; per-item download failures are
    /// announced and the walk continues.
    pub fn sync_playlist<I>(
        &self,
        playlist: &Playlist,
        items: I,
        filter: &ItemFilter,
    ) -> Result<SyncReport>
    where
        I: IntoIterator<Item = Result<PlaylistItem>>,
    {
        let mut report = SyncReport::default();

        for item in items {
            let item = item?;

            if !filter.matches(&item) {
                report.filtered_out += 1;
                continue;
            }
            if item.privacy == PrivacyStatus::Private {
                println!("Skipping private video \"{}\"", item.video_id);
                report.skipped_private += 1;
                continue;
            }

            println!("Found video \"{}\"", item.title);
            match self.sync_item(playlist, &item) {
                Ok(ItemOutcome::Downloaded) => report.downloaded += 1,
                Ok(ItemOutcome::AlreadyPresent) => report.already_present += 1,
                Ok(ItemOutcome::MetadataOnly) => report.metadata_only += 1,
                Ok(ItemOutcome::DryRun) => report.planned += 1,
                Ok(ItemOutcome::SkippedPrivate) => report.skipped_private += 1,
                Err(err) => {
                    eprintln!("Download failed: {err}");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    fn downloader_argv_for_item(&self, target: &DownloadTarget, video_id: &str) -> Vec<String> {
        let output_template = {
            let base = target
                .video_file
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            target
                .playlist_dir
                .join(format!("{base}.%(ext)s"))
                .to_string_lossy()
                .into_owned()
        };
        let root = &self.options.download_path;
        let archive = root.join(ARCHIVE_FILE).to_string_lossy().into_owned();
        let cookies = root.join(COOKIES_FILE).to_string_lossy().into_owned();

        let mut argv: Vec<String> = Vec::new();
        if self.options.verbose {
            argv.push("-v".into());
        }
        let defaults: [&str; 14] = [
            "-f",
            "bestvideo+bestaudio",
            "--merge-output-format",
            VIDEO_EXTENSION,
            "-o",
            &output_template,
            "--download-archive",
            &archive,
            "--cookies",
            &cookies,
            "-i",
            "--write-info-json",
            "--write-thumbnail",
            "--add-metadata",
        ];
        argv.extend(defaults.iter().map(|arg| arg.to_string()));
        argv.extend(self.options.ytdlp_args.iter().cloned());
        argv.push(format!("https://youtu.be/{video_id}"));
        argv
    }

    fn invoke_downloader(&self, argv: &[String]) -> Result<()> {
        if self.options.verbose {
            println!("yt-dlp {}", render_argv(argv));
        }

        let status = yt_dlp_command()
            .args(argv)
            .status()
            .context("running yt-dlp")?;
        if !status.success() {
            // Not fatal on its own; the presence check is authoritative.
            eprintln!("Warning: yt-dlp exited with status {status}");
        }
        Ok(())
    }
}

/// Builds the yt-dlp invocation for direct URL syncing, which bypasses the
/// catalog API entirely. yt-dlp routes every video into a directory named
/// after its playlist via the output template.
pub fn downloader_argv_for_urls(options: &SyncOptions, urls: &[String]) -> Vec<String> {
    let root = &options.download_path;
    let root_str = root.to_string_lossy().into_owned();
    let archive = root.join(ARCHIVE_FILE).to_string_lossy().into_owned();
    let cookies = root.join(COOKIES_FILE).to_string_lossy().into_owned();

    let mut argv: Vec<String> = Vec::new();
    if options.verbose {
        argv.push("-v".into());
    }
    let defaults: [&str; 13] = [
        "-P",
        &root_str,
        "-o",
        "%(playlist)s/%(title)s.%(ext)s",
        "--download-archive",
        &archive,
        "--cookies",
        &cookies,
        "-i",
        "--write-info-json",
        "--write-thumbnail",
        "--add-metadata",
        "--yes-playlist",
    ];
    argv.extend(defaults.iter().map(|arg| arg.to_string()));
    argv.extend(options.ytdlp_args.iter().cloned());
    argv.extend(urls.iter().cloned());
    argv
}

/// Hands the given URLs straight to yt-dlp. Honors dry-run identically to
/// the per-item path.
pub fn sync_urls(options: &SyncOptions, urls: &[String]) -> Result<()> {
    let argv = downloader_argv_for_urls(options, urls);

    if options.dry_run {
        println!("Dry run: yt-dlp {}", render_argv(&argv));
        return Ok(());
    }

    fs::create_dir_all(&options.download_path)
        .with_context(|| format!("creating {}", options.download_path.display()))?;

    let status = yt_dlp_command()
        .args(&argv)
        .status()
        .context("running yt-dlp")?;
    if !status.success() {
        bail!("yt-dlp exited with status {status}");
    }
    Ok(())
}

/// Renders an argument vector for human eyes (verbose and dry-run output).
/// Quoting here is display-only; execution always passes the vector to the
/// process directly, with no shell in between.
pub fn render_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            let needs_quotes = arg.is_empty()
                || arg
                    .chars()
                    .any(|c| c.is_whitespace() || "\"'\\$&|;<>(){}*?!`#".contains(c));
            if needs_quotes {
                format!("'{}'", arg.replace('\'', "'\\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PrivacyStatus;
    use crate::filter::parse_since;
    use anyhow::anyhow;
    use serde_json::{Value, json};
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn playlist(title: &str) -> Playlist {
        Playlist {
            id: "PL1".into(),
            title: title.into(),
            raw: json!({ "id": "PL1" }),
        }
    }

    fn item(title: &str, privacy: PrivacyStatus) -> PlaylistItem {
        PlaylistItem {
            video_id: "vid123".into(),
            title: title.into(),
            published_at: Some(parse_since("2023-06-01").unwrap()),
            video_published_at: Some(parse_since("2023-05-01").unwrap()),
            privacy,
            raw: json!({ "snippet": { "title": title } }),
        }
    }

    fn options(dir: &Path) -> SyncOptions {
        SyncOptions::new(dir.to_path_buf())
    }

    /// Writes a bash stand-in for yt-dlp. Every invocation appends a line to
    /// `invoked.txt` next to the script; unless `create_file` is false it
    /// also creates the `-o` target with the extension template resolved.
    fn install_ytdlp_stub(dir: &Path, create_file: bool) -> PathBuf {
        let marker = dir.join("invoked.txt");
        let script_path = dir.join("yt-dlp");
        let create_block = if create_file {
            r#"if [[ -n "$output" ]]; then
  target="${output//%(ext)s/mkv}"
  mkdir -p "$(dirname "$target")"
  echo video > "$target"
fi"#
        } else {
            ""
        };
        let script = format!(
            r#"#!/usr/bin/env bash
set -eu
echo "$@" >> "{marker}"
output=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    -o)
      shift
      output="$1"
      ;;
  esac
  shift
done
{create_block}
exit 0
"#,
            marker = marker.display(),
        );
        fs::write(&script_path, script).unwrap();
        #[cfg(unix)]
        {
            let mut perms = fs::metadata(&script_path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms).unwrap();
        }
        script_path
    }

    fn invocations(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("invoked.txt"))
            .map(|content| content.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    #[test]
    fn normalize_replaces_forbidden_runs() {
        assert_eq!(normalize_filename("a/b"), "a_b");
        assert_eq!(normalize_filename("a//%/b"), "a_b");
        assert_eq!(normalize_filename("100% legit"), "100_ legit");
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_filename("a \t\n b"), "a b");
        assert_eq!(normalize_filename("Ep 1:  A/B Test"), "Ep 1: A_B Test");
    }

    #[test]
    fn normalize_is_total_and_idempotent() {
        for input in ["", "plain", "a/%b", " \t ", "Ep 1: A/B Test", "// %%"] {
            let once = normalize_filename(input);
            assert_eq!(normalize_filename(&once), once, "input {input:?}");
        }
    }

    #[test]
    fn target_paths_use_normalized_titles() {
        let target = DownloadTarget::compute(
            Path::new("download"),
            &playlist("MyPlaylist"),
            &item("Ep 1: A/B Test", PrivacyStatus::Public),
        );
        assert_eq!(target.playlist_dir, Path::new("download/MyPlaylist"));
        assert_eq!(
            target.video_file,
            Path::new("download/MyPlaylist/Ep 1: A_B Test.mkv")
        );
        assert_eq!(
            target.metadata_file,
            Path::new("download/MyPlaylist/Ep 1: A_B Test.meta.json")
        );
    }

    #[test]
    fn dry_run_creates_nothing_and_is_deterministic() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");
        let mut opts = options(&root);
        opts.dry_run = true;
        let syncer = Syncer::new(opts);

        let playlist = playlist("MyPlaylist");
        let entry = item("Ep 1", PrivacyStatus::Public);
        let outcome = syncer.sync_item(&playlist, &entry).unwrap();
        assert_eq!(outcome, ItemOutcome::DryRun);
        assert!(!root.exists());

        let target = syncer.target_for(&playlist, &entry);
        let first = syncer.downloader_argv_for_item(&target, &entry.video_id);
        let second = syncer.downloader_argv_for_item(&target, &entry.video_id);
        assert_eq!(first, second);
    }

    #[test]
    fn dry_run_reports_an_existing_target_as_already_present() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");
        let playlist = playlist("MyPlaylist");
        let entry = item("Ep 1", PrivacyStatus::Public);

        let mut opts = options(&root);
        opts.dry_run = true;
        let syncer = Syncer::with_ledger(opts, Box::new(EverythingPresent));
        let outcome = syncer.sync_item(&playlist, &entry).unwrap();
        assert_eq!(outcome, ItemOutcome::AlreadyPresent);
        assert!(!root.exists());

        // Force overrides the presence check in a dry run too.
        let mut forced = options(&root);
        forced.dry_run = true;
        forced.force = true;
        let syncer = Syncer::with_ledger(forced, Box::new(EverythingPresent));
        assert_eq!(
            syncer.sync_item(&playlist, &entry).unwrap(),
            ItemOutcome::DryRun
        );
        assert!(!root.exists());
    }

    #[test]
    fn item_argv_carries_the_delegation_contract() {
        let root = PathBuf::from("download");
        let mut opts = options(&root);
        opts.ytdlp_args = vec!["--custom".into(), "flag".into()];
        let syncer = Syncer::new(opts);

        let playlist = playlist("MyPlaylist");
        let entry = item("Ep 1", PrivacyStatus::Public);
        let target = syncer.target_for(&playlist, &entry);
        let argv = syncer.downloader_argv_for_item(&target, &entry.video_id);

        let expect_pairs = [
            ("-o", "download/MyPlaylist/Ep 1.%(ext)s"),
            ("--download-archive", "download/archive.txt"),
            ("--cookies", "download/cookies.txt"),
        ];
        for (flag, value) in expect_pairs {
            let at = argv.iter().position(|arg| arg == flag).unwrap();
            assert_eq!(argv[at + 1], value);
        }
        for flag in ["-i", "--write-info-json", "--write-thumbnail", "--add-metadata"] {
            assert!(argv.iter().any(|arg| arg == flag), "missing {flag}");
        }

        // Passthrough args come after the defaults, the URL comes last.
        let custom = argv.iter().position(|arg| arg == "--custom").unwrap();
        assert!(custom > argv.iter().position(|arg| arg == "-o").unwrap());
        assert_eq!(argv.last().unwrap(), "https://youtu.be/vid123");
    }

    #[test]
    fn existing_file_without_force_skips_the_downloader() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");
        let stub = install_ytdlp_stub(dir.path(), true);
        let _guard = set_ytdlp_stub_path(stub);

        let playlist = playlist("MyPlaylist");
        let entry = item("Ep 1", PrivacyStatus::Public);
        let syncer = Syncer::new(options(&root));
        let target = syncer.target_for(&playlist, &entry);
        fs::create_dir_all(&target.playlist_dir).unwrap();
        fs::write(&target.video_file, "existing").unwrap();

        let outcome = syncer.sync_item(&playlist, &entry).unwrap();
        assert_eq!(outcome, ItemOutcome::AlreadyPresent);
        assert!(invocations(dir.path()).is_empty());
        assert_eq!(fs::read_to_string(&target.video_file).unwrap(), "existing");
    }

    #[test]
    fn force_invokes_the_downloader_again() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");
        let stub = install_ytdlp_stub(dir.path(), true);
        let _guard = set_ytdlp_stub_path(stub);

        let playlist = playlist("MyPlaylist");
        let entry = item("Ep 1", PrivacyStatus::Public);
        let mut opts = options(&root);
        opts.force = true;
        let syncer = Syncer::new(opts);
        let target = syncer.target_for(&playlist, &entry);
        fs::create_dir_all(&target.playlist_dir).unwrap();
        fs::write(&target.video_file, "existing").unwrap();

        let outcome = syncer.sync_item(&playlist, &entry).unwrap();
        assert_eq!(outcome, ItemOutcome::Downloaded);
        assert_eq!(invocations(dir.path()).len(), 1);
    }

    #[test]
    fn missing_output_after_download_is_an_error() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");
        let stub = install_ytdlp_stub(dir.path(), false);
        let _guard = set_ytdlp_stub_path(stub);

        let syncer = Syncer::new(options(&root));
        let err = syncer
            .sync_item(&playlist("MyPlaylist"), &item("Ep 1", PrivacyStatus::Public))
            .unwrap_err();
        assert!(err.to_string().contains("was not created"));
        assert_eq!(invocations(dir.path()).len(), 1);
    }

    #[test]
    fn private_item_is_skipped_before_any_io() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");

        let syncer = Syncer::new(options(&root));
        let outcome = syncer
            .sync_item(&playlist("MyPlaylist"), &item("Secret", PrivacyStatus::Private))
            .unwrap();
        assert_eq!(outcome, ItemOutcome::SkippedPrivate);
        assert!(!root.exists());
    }

    #[test]
    fn metadata_sidecar_is_written_once() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");
        let mut opts = options(&root);
        opts.download_video = false;
        let syncer = Syncer::new(opts);

        let playlist = playlist("MyPlaylist");
        let first = item("Ep 1", PrivacyStatus::Public);
        assert_eq!(
            syncer.sync_item(&playlist, &first).unwrap(),
            ItemOutcome::MetadataOnly
        );

        let target = syncer.target_for(&playlist, &first);
        let written: Value =
            serde_json::from_slice(&fs::read(&target.metadata_file).unwrap()).unwrap();
        assert_eq!(written["video_file"], "Ep 1.mkv");
        assert_eq!(written["playlist_item"]["snippet"]["title"], "Ep 1");

        // A re-run with a changed catalog record leaves the sidecar alone.
        let mut changed = item("Ep 1", PrivacyStatus::Public);
        changed.raw = json!({ "snippet": { "title": "Renamed" } });
        syncer.sync_item(&playlist, &changed).unwrap();
        let after: Value =
            serde_json::from_slice(&fs::read(&target.metadata_file).unwrap()).unwrap();
        assert_eq!(after["playlist_item"]["snippet"]["title"], "Ep 1");
    }

    struct EverythingPresent;
    impl MediaLedger for EverythingPresent {
        fn contains(&self, _video_file: &Path) -> bool {
            true
        }
    }

    #[test]
    fn ledger_is_injectable() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");
        let mut opts = options(&root);
        opts.write_metadata = false;
        let syncer = Syncer::with_ledger(opts, Box::new(EverythingPresent));

        let outcome = syncer
            .sync_item(&playlist("MyPlaylist"), &item("Ep 1", PrivacyStatus::Public))
            .unwrap();
        assert_eq!(outcome, ItemOutcome::AlreadyPresent);
    }

    #[test]
    fn sync_playlist_processes_only_the_public_item() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");
        let stub = install_ytdlp_stub(dir.path(), true);
        let _guard = set_ytdlp_stub_path(stub);

        let syncer = Syncer::new(options(&root));
        let items = vec![
            Ok(item("Hidden", PrivacyStatus::Private)),
            Ok(item("Ep 1: A/B Test", PrivacyStatus::Public)),
        ];
        let report = syncer
            .sync_playlist(&playlist("MyPlaylist"), items, &ItemFilter::default())
            .unwrap();

        assert_eq!(report.skipped_private, 1);
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.failed, 0);
        assert!(root.join("MyPlaylist").join("Ep 1: A_B Test.mkv").exists());
        assert_eq!(invocations(dir.path()).len(), 1);
    }

    #[test]
    fn report_keeps_planned_and_metadata_only_out_of_downloaded() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");
        let playlist = playlist("MyPlaylist");

        let mut opts = options(&root);
        opts.dry_run = true;
        let report = Syncer::new(opts)
            .sync_playlist(
                &playlist,
                vec![Ok(item("Ep 1", PrivacyStatus::Public))],
                &ItemFilter::default(),
            )
            .unwrap();
        assert_eq!(report.planned, 1);
        assert_eq!(report.downloaded, 0);

        let mut opts = options(&root);
        opts.download_video = false;
        let report = Syncer::new(opts)
            .sync_playlist(
                &playlist,
                vec![Ok(item("Ep 1", PrivacyStatus::Public))],
                &ItemFilter::default(),
            )
            .unwrap();
        assert_eq!(report.metadata_only, 1);
        assert_eq!(report.downloaded, 0);
    }

    #[test]
    fn filter_excludes_items_before_the_private_check() {
        let dir = tempdir().unwrap();
        let syncer = Syncer::new(options(&dir.path().join("download")));

        let mut stale = item("Old Secret", PrivacyStatus::Private);
        stale.published_at = Some(parse_since("2020-01-01").unwrap());
        let filter = ItemFilter {
            added_since: Some(parse_since("2023-01-01").unwrap()),
            ..ItemFilter::default()
        };

        let report = syncer
            .sync_playlist(&playlist("MyPlaylist"), vec![Ok(stale)], &filter)
            .unwrap();
        assert_eq!(report.filtered_out, 1);
        assert_eq!(report.skipped_private, 0);
    }

    #[test]
    fn sync_playlist_continues_after_a_failed_item() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");
        let stub = install_ytdlp_stub(dir.path(), false);
        let _guard = set_ytdlp_stub_path(stub);

        let mut opts = options(&root);
        opts.write_metadata = false;
        let syncer = Syncer::new(opts);

        let mut second = item("Ep 2", PrivacyStatus::Public);
        second.privacy = PrivacyStatus::Private;
        let report = syncer
            .sync_playlist(
                &playlist("MyPlaylist"),
                vec![Ok(item("Ep 1", PrivacyStatus::Public)), Ok(second)],
                &ItemFilter::default(),
            )
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped_private, 1);
    }

    #[test]
    fn sync_playlist_aborts_on_listing_error() {
        let dir = tempdir().unwrap();
        let syncer = Syncer::new(options(&dir.path().join("download")));

        let items: Vec<Result<PlaylistItem>> = vec![Err(anyhow!("endless pagination detected"))];
        let err = syncer
            .sync_playlist(&playlist("MyPlaylist"), items, &ItemFilter::default())
            .unwrap_err();
        assert!(err.to_string().contains("endless pagination"));
    }

    #[test]
    fn urls_argv_uses_playlist_template_and_appends_urls_last() {
        let mut opts = options(Path::new("download"));
        opts.verbose = true;
        opts.ytdlp_args = vec!["--no-mtime".into()];
        let urls = vec!["https://example.com/watch?v=1".to_string()];
        let argv = downloader_argv_for_urls(&opts, &urls);

        assert_eq!(argv[0], "-v");
        let at = argv.iter().position(|arg| arg == "-o").unwrap();
        assert_eq!(argv[at + 1], "%(playlist)s/%(title)s.%(ext)s");
        assert!(argv.iter().any(|arg| arg == "--yes-playlist"));
        assert_eq!(argv.last().unwrap(), &urls[0]);
        let custom = argv.iter().position(|arg| arg == "--no-mtime").unwrap();
        assert_eq!(custom, argv.len() - 2);
    }

    #[test]
    fn sync_urls_dry_run_touches_nothing() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");
        let mut opts = options(&root);
        opts.dry_run = true;

        sync_urls(&opts, &["https://example.com/v".to_string()]).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn sync_urls_invokes_the_downloader() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("download");
        let stub = install_ytdlp_stub(dir.path(), false);
        let _guard = set_ytdlp_stub_path(stub);

        sync_urls(&options(&root), &["https://example.com/v".to_string()]).unwrap();
        assert_eq!(invocations(dir.path()).len(), 1);
        assert!(root.exists());
    }

    #[test]
    fn stub_override_survives_a_panicked_holder() {
        let result = std::thread::spawn(|| {
            let _guard = set_ytdlp_stub_path(PathBuf::from("/nonexistent/yt-dlp"));
            panic!("poisoning the stub mutexes");
        })
        .join();
        assert!(result.is_err());

        let _guard = set_ytdlp_stub_path(PathBuf::from("/nonexistent/yt-dlp"));
        assert_eq!(
            yt_dlp_command().get_program(),
            Path::new("/nonexistent/yt-dlp").as_os_str()
        );
    }

    #[test]
    fn render_argv_quotes_only_what_needs_it() {
        let argv = vec![
            "-o".to_string(),
            "download/My Playlist/Ep 1.%(ext)s".to_string(),
            "https://youtu.be/vid123".to_string(),
        ];
        assert_eq!(
            render_argv(&argv),
            "-o 'download/My Playlist/Ep 1.%(ext)s' https://youtu.be/vid123"
        );
    }
}
