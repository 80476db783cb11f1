#![forbid(unsafe_code)]

//! Command-line entry point for ytsync.
//!
//! Synchronizes YouTube playlists to local storage: enumerates playlists and
//! their items through the catalog API, filters them, and hands the actual
//! media transfer to yt-dlp. `sync-urls` skips the API and feeds URLs to
//! yt-dlp directly.

use anyhow::{Context, Result, bail};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ytsync::api::{ApiClient, PlaylistSelector, list_playlist_items, list_playlists};
use ytsync::config::{RuntimeConfig, RuntimeOverrides, resolve_runtime_config};
use ytsync::filter::{ItemFilter, parse_since};
use ytsync::security::ensure_not_root;
use ytsync::sync::{SyncOptions, SyncReport, Syncer, sync_urls};

const USAGE: &str = "Usage: ytsync [options] <command> [args]\n\
Options: [--api-key <key>] [-d|--download-path <path>] [--dry-run] [-f|--force]\n\
         [-v|--verbose] [--no-metadata] [--no-video] [--retry <n>] [--ytdlp-args <args>]\n\
Commands:\n\
  list-playlists <channel_id>\n\
  sync-playlist <playlist_id> [--added-since <ts>] [--published-since <ts>] [--name <substr>]\n\
  sync-channel <channel_id> [--added-since <ts>] [--published-since <ts>] [--name <substr>]\n\
  sync-urls [url ...] [--batch-file <file>]";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    ListPlaylists { channel_id: String },
    SyncPlaylist { playlist_id: String },
    SyncChannel { channel_id: String },
    SyncUrls { urls: Vec<String> },
}

#[derive(Debug, Clone)]
struct CliArgs {
    command: CliCommand,
    api_key: Option<String>,
    download_path: Option<PathBuf>,
    dry_run: bool,
    force: bool,
    verbose: bool,
    no_metadata: bool,
    no_video: bool,
    retry: u32,
    ytdlp_args: Vec<String>,
    added_since: Option<String>,
    published_since: Option<String>,
    name: Option<String>,
    batch_file: Option<PathBuf>,
}

impl CliArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(env::args().skip(1))
    }

    #[cfg(test)]
    fn from_slice(values: &[&str]) -> Result<Self> {
        Self::from_iter(values.iter().map(|value| value.to_string()))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut api_key: Option<String> = None;
        let mut download_path: Option<PathBuf> = None;
        let mut dry_run = false;
        let mut force = false;
        let mut verbose = false;
        let mut no_metadata = false;
        let mut no_video = false;
        let mut retry = 0u32;
        let mut ytdlp_args: Vec<String> = Vec::new();
        let mut added_since: Option<String> = None;
        let mut published_since: Option<String> = None;
        let mut name: Option<String> = None;
        let mut batch_file: Option<PathBuf> = None;
        let mut command_name: Option<String> = None;
        let mut positionals: Vec<String> = Vec::new();

        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--api-key" => api_key = Some(next_value(&mut args, "--api-key")?),
                "-d" | "--download-path" => {
                    download_path = Some(PathBuf::from(next_value(&mut args, "-d")?));
                }
                "--dry-run" => dry_run = true,
                "-f" | "--force" => force = true,
                "-v" | "--verbose" => verbose = true,
                "--no-metadata" => no_metadata = true,
                "--no-video" => no_video = true,
                "--retry" => {
                    let value = next_value(&mut args, "--retry")?;
                    retry = value
                        .parse()
                        .with_context(|| format!("invalid --retry count: {value}"))?;
                }
                "--ytdlp-args" => {
                    let value = next_value(&mut args, "--ytdlp-args")?;
                    ytdlp_args = value.split_whitespace().map(str::to_string).collect();
                }
                "--added-since" => added_since = Some(next_value(&mut args, "--added-since")?),
                "--published-since" => {
                    published_since = Some(next_value(&mut args, "--published-since")?);
                }
                "--name" => name = Some(next_value(&mut args, "--name")?),
                "--batch-file" => {
                    batch_file = Some(PathBuf::from(next_value(&mut args, "--batch-file")?));
                }
                _ if arg.starts_with('-') => bail!("unknown argument: {arg}\n{USAGE}"),
                _ => {
                    if command_name.is_none() {
                        command_name = Some(arg);
                    } else {
                        positionals.push(arg);
                    }
                }
            }
        }

        let command = match command_name.as_deref() {
            Some("list-playlists") => CliCommand::ListPlaylists {
                channel_id: one_positional(positionals, "list-playlists expects a channel id")?,
            },
            Some("sync-playlist") => CliCommand::SyncPlaylist {
                playlist_id: one_positional(positionals, "sync-playlist expects a playlist id")?,
            },
            Some("sync-channel") => CliCommand::SyncChannel {
                channel_id: one_positional(positionals, "sync-channel expects a channel id")?,
            },
            Some("sync-urls") => CliCommand::SyncUrls { urls: positionals },
            Some(other) => bail!("unknown command: {other}\n{USAGE}"),
            None => bail!("{USAGE}"),
        };

        Ok(Self {
            command,
            api_key,
            download_path,
            dry_run,
            force,
            verbose,
            no_metadata,
            no_video,
            retry,
            ytdlp_args,
            added_since,
            published_since,
            name,
            batch_file,
        })
    }

    /// Parses the filter flags; bad timestamps fail before any network call.
    fn build_item_filter(&self) -> Result<ItemFilter> {
        Ok(ItemFilter {
            added_since: self.added_since.as_deref().map(parse_since).transpose()?,
            published_since: self
                .published_since
                .as_deref()
                .map(parse_since)
                .transpose()?,
            name: self.name.clone(),
        })
    }

    fn sync_options(&self, config: &RuntimeConfig) -> SyncOptions {
        SyncOptions {
            download_path: config.download_path.clone(),
            force: self.force,
            dry_run: self.dry_run,
            verbose: self.verbose,
            ytdlp_args: self.ytdlp_args.clone(),
            write_metadata: !self.no_metadata,
            download_video: !self.no_video,
        }
    }
}

fn next_value<I>(args: &mut I, flag: &str) -> Result<String>
where
    I: Iterator<Item = String>,
{
    args.next()
        .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))
}

fn one_positional(mut positionals: Vec<String>, what: &str) -> Result<String> {
    if positionals.len() != 1 {
        bail!("{what}\n{USAGE}");
    }
    Ok(positionals.remove(0))
}

/// Reads a newline-delimited URL file. Blank lines and lines beginning with
/// `#` or `-` are ignored.
fn read_batch_file(path: &Path) -> Result<Vec<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .map(str::to_string)
        .collect())
}

fn api_client(config: &RuntimeConfig, cli: &CliArgs) -> Result<ApiClient> {
    let api_key = config.require_api_key()?;
    let mut client = ApiClient::new(&config.api_base_url, api_key).with_verbose(cli.verbose);
    if cli.retry > 0 {
        client = client.with_retry(cli.retry, Duration::from_secs(2));
    }
    Ok(client)
}

fn print_report(title: &str, report: &SyncReport) {
    println!(
        "Playlist \"{}\": {} downloaded, {} already present, {} metadata only, {} planned, {} private skipped, {} filtered out, {} failed",
        title,
        report.downloaded,
        report.already_present,
        report.metadata_only,
        report.planned,
        report.skipped_private,
        report.filtered_out,
        report.failed,
    );
}

fn main() -> Result<()> {
    ensure_not_root("ytsync")?;
    let cli = CliArgs::parse()?;
    run(&cli)
}

fn run(cli: &CliArgs) -> Result<()> {
    let config = resolve_runtime_config(RuntimeOverrides {
        api_key: cli.api_key.clone(),
        download_path: cli.download_path.clone(),
        ..RuntimeOverrides::default()
    })?;
    let options = cli.sync_options(&config);

    match &cli.command {
        CliCommand::ListPlaylists { channel_id } => {
            let client = api_client(&config, cli)?;
            let selector = PlaylistSelector::Channel(channel_id.clone());
            for playlist in list_playlists(&client, &selector) {
                let playlist = playlist?;
                println!("{}\t{}", playlist.id, playlist.title);
            }
        }
        CliCommand::SyncPlaylist { playlist_id } => {
            let client = api_client(&config, cli)?;
            let filter = cli.build_item_filter()?;
            let selector = PlaylistSelector::Ids(vec![playlist_id.clone()]);
            match list_playlists(&client, &selector).next() {
                None => println!("Playlist not found"),
                Some(playlist) => {
                    let playlist = playlist?;
                    let syncer = Syncer::new(options);
                    let items = list_playlist_items(&client, &playlist.id);
                    let report = syncer.sync_playlist(&playlist, items, &filter)?;
                    print_report(&playlist.title, &report);
                }
            }
        }
        CliCommand::SyncChannel { channel_id } => {
            let client = api_client(&config, cli)?;
            let filter = cli.build_item_filter()?;
            let syncer = Syncer::new(options);
            let selector = PlaylistSelector::Channel(channel_id.clone());
            for playlist in list_playlists(&client, &selector) {
                let playlist = playlist?;
                println!("Syncing playlist \"{}\"", playlist.title);
                let items = list_playlist_items(&client, &playlist.id);
                let report = syncer.sync_playlist(&playlist, items, &filter)?;
                print_report(&playlist.title, &report);
            }
        }
        CliCommand::SyncUrls { urls } => {
            let mut urls = urls.clone();
            if let Some(path) = &cli.batch_file {
                urls.extend(read_batch_file(path)?);
            }
            if urls.is_empty() {
                bail!("sync-urls requires at least one URL or --batch-file");
            }
            sync_urls(&options, &urls)?;
        }
    }

    println!("Done");
    Ok(())
}
