#![deny(unsafe_code)]

//! Quill command line entry point.
//!
//! A second `quill` invocation hands its files to the instance that is
//! already running and exits. Only when nothing is running does it become
//! that instance: set up logging, start the IPC session, load plugins, and
//! serve open requests until interrupted.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{error, info, warn};

use quill_config::AppConfig;
use quill_core::build_info;
use quill_core::logging::{self, LogTarget};
use quill_core::plugin::{BuiltinRegistry, LoadReport, ManifestImporter, PluginScheduler};
use quill_core::{IpcClient, IpcClientError, OpenRequest, start_session};

const EPILOG: &str = "\
Examples:
  quill                    # run Quill normally
  quill file1.rs file2.js  # open the given files on startup
  quill -nnn               # create 3 new files
  quill --no-plugins       # understand the power of plugins
  quill --verbose          # produce lots of nerdy output";

/// Quill, a small extensible text editor.
#[derive(Parser, Debug)]
#[command(
    name = "quill",
    about,
    long_about = None,
    disable_version_flag = true,
    after_help = EPILOG
)]
struct Cli {
    /// Open these files when Quill starts, - means stdin.
    #[arg(value_name = "FILES")]
    files: Vec<PathBuf>,

    /// Create a "New File" buffer; may be given multiple times.
    #[arg(short = 'n', long = "new-file", action = ArgAction::Count)]
    new_files: u8,

    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Don't load the plugins.
    #[arg(long, conflicts_with = "shuffle_plugins")]
    no_plugins: bool,

    /// Respect setup_before and setup_after, but otherwise set up plugins in
    /// random order instead of alphabetically.
    #[arg(long)]
    shuffle_plugins: bool,

    /// Write the log to this file instead of a file in the cache directory.
    #[arg(long, value_name = "PATH", conflicts_with = "verbose")]
    logfile: Option<PathBuf>,

    /// Log to stderr.
    #[arg(long)]
    verbose: bool,

    /// Print where custom plugins go and exit.
    #[arg(long)]
    print_plugindir: bool,

    /// Display the version and exit.
    #[arg(short = 'V', long)]
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("quill {}", build_info::version_string());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref()).await?;

    if cli.print_plugindir {
        println!(
            "You can install plugins here:\n\n    {}\n",
            config.user_plugin_dir().display()
        );
        return Ok(());
    }

    let requests = build_requests(&cli.files, usize::from(cli.new_files), &mut io::stdin())?;

    let client = IpcClient::from_config(&config);
    if hand_off(&client, &requests).await? {
        let noun = if requests.len() == 1 { "file" } else { "files" };
        if requests.is_empty() {
            println!("Quill is already running.");
        } else {
            println!("The {noun} will be opened in the already running Quill.");
        }
        return Ok(());
    }

    run(&cli, &config, requests).await
}

/// Become the running instance.
async fn run(cli: &Cli, config: &AppConfig, requests: Vec<OpenRequest>) -> Result<()> {
    config
        .create_dirs()
        .await
        .context("failed to create Quill directories")?;

    let target = match (&cli.logfile, cli.verbose) {
        (Some(path), _) => LogTarget::File(path.clone()),
        (None, true) => LogTarget::Stderr,
        (None, false) => LogTarget::CacheDir(config.cache_dir()),
    };
    let log_file = logging::init(&target, &config.logging.level)?;

    info!(
        version = %build_info::version_string(),
        platform = %build_info::platform(),
        pid = std::process::id(),
        log_file = ?log_file,
        "Starting Quill"
    );

    let mut session = start_session::<OpenRequest>(&config.address_file(), config.ipc.transport)
        .await
        .context("failed to start the IPC session")?;

    if cli.no_plugins || !config.plugins.enabled {
        info!("Plugins disabled");
    } else {
        let shuffle = cli.shuffle_plugins || config.plugins.shuffle;
        let report = load_plugins(config.clone(), shuffle).await?;
        log_report(&report);
    }

    for request in &requests {
        handle_request(request);
    }

    loop {
        tokio::select! {
            message = session.next_message() => match message {
                Some(request) => handle_request(&request),
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
        }
    }

    session.close().await;
    info!("Exiting Quill successfully");
    Ok(())
}

/// Try to deliver `requests` to a running instance.
///
/// Returns `false` when nothing is running and this process should take over.
/// An empty list becomes a single focus request.
async fn hand_off(client: &IpcClient, requests: &[OpenRequest]) -> Result<bool> {
    let result = if requests.is_empty() {
        client.try_send([OpenRequest::focus()]).await
    } else {
        client.try_send(requests).await
    };

    match result {
        Ok(()) => Ok(true),
        Err(IpcClientError::NotRunning(_)) => Ok(false),
        Err(e) => Err(e).context("failed to hand files to the running Quill"),
    }
}

/// Turn command line arguments into open requests, reading every file now so
/// the running instance does not depend on this process's working directory.
fn build_requests(
    files: &[PathBuf],
    new_files: usize,
    stdin: &mut dyn Read,
) -> Result<Vec<OpenRequest>> {
    let mut requests = Vec::with_capacity(files.len() + new_files);

    for file in files {
        if file.as_os_str() == "-" {
            let mut content = String::new();
            stdin
                .read_to_string(&mut content)
                .context("failed to read standard input")?;
            requests.push(OpenRequest::buffer(content));
        } else {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("can't open '{}'", file.display()))?;
            let path = std::path::absolute(file)
                .with_context(|| format!("can't resolve '{}'", file.display()))?;
            requests.push(OpenRequest::file(path, content));
        }
    }

    requests.extend(std::iter::repeat_with(OpenRequest::new_file).take(new_files));
    Ok(requests)
}

fn handle_request(request: &OpenRequest) {
    if request.is_focus() {
        info!("Focus requested");
        return;
    }
    let bytes = request.content.as_deref().map_or(0, str::len);
    match &request.path {
        Some(path) => info!(path = %path.display(), bytes, "Open file"),
        None => info!(bytes, "Open new buffer"),
    }
}

/// Setup procedures that ship with the binary.
fn builtin_plugins() -> BuiltinRegistry {
    let mut builtins = BuiltinRegistry::new();
    builtins.register("welcome", || {
        info!("Welcome to Quill! Plugins go in the config directory's plugins folder.");
        Ok(())
    });
    builtins
}

/// Discover and set up plugins off the async runtime; plugin setup may run
/// external commands.
async fn load_plugins(config: AppConfig, shuffle: bool) -> Result<LoadReport> {
    tokio::task::spawn_blocking(move || {
        let scheduler =
            PluginScheduler::from_config(&config, ManifestImporter::new(builtin_plugins()));
        let units = scheduler.discover()?;
        Ok(scheduler.load(&units, shuffle))
    })
    .await
    .context("plugin loading task failed")?
}

fn log_report(report: &LoadReport) {
    for (name, outcome) in report.failed() {
        error!(%name, %outcome, "Plugin not loaded");
    }
    if let Some(cycle) = report.cycle() {
        error!(%cycle, "Plugins skipped");
    }
    info!(loaded = ?report.loaded(), "Plugins ready");
}

async fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = path.map_or_else(quill_config::default_config_path, Path::to_path_buf);
    if path.exists() {
        AppConfig::load(&path)
            .await
            .with_context(|| format!("invalid config file {}", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}
