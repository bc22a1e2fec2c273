use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::prompt::TerminalDecisions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uploader_core::config::{self, AppConfig, BackendKind};
use uploader_core::media::FfmpegTools;
use uploader_core::session::{self, SessionDriver};

/// How long an aborted upload task gets to unwind before exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "folder-uploader", version, about = "Upload a folder tree to a Telegram chat")]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List chats the bot can post to
    ListChats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Convert, confirm, and upload every file under a folder
    Upload {
        folder: PathBuf,
        /// Chat id; overrides telegram.chat_id
        #[arg(short, long, allow_negative_numbers = true)]
        target: Option<i64>,
        /// Answer every prompt with its default and skip confirmation
        #[arg(short, long)]
        yes: bool,
        /// Convert non-streamable videos without asking
        #[arg(long)]
        convert: bool,
        /// Log what would be sent instead of sending it
        #[arg(long)]
        dry_run: bool,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::ListChats { json } => list_chats(cfg, json).await,
        Commands::Upload {
            folder,
            target,
            yes,
            convert,
            dry_run,
            json,
        } => run_upload(cfg, folder, target, yes, convert, dry_run, json).await,
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn driver(cfg: AppConfig, decisions: TerminalDecisions) -> SessionDriver {
    let backend = session::build_backend(&cfg);
    let media = Arc::new(FfmpegTools::new(
        cfg.transcode.ffmpeg.clone(),
        cfg.transcode.ffprobe.clone(),
        &cfg.upload.thumbnail_name,
    ));
    SessionDriver::new(backend, media, Arc::new(decisions), cfg)
}

async fn list_chats(cfg: AppConfig, json: bool) -> Result<()> {
    let driver = driver(cfg, TerminalDecisions::stdin(false, false));
    let targets = driver.list_targets().await?;
    driver.disconnect().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(());
    }
    if targets.is_empty() {
        println!("No chats yet. Add the bot to a chat or message it, then retry.");
    }
    for t in targets {
        println!("{}\t{}\t{}", t.id, t.kind, t.title);
    }
    Ok(())
}

async fn run_upload(
    mut cfg: AppConfig,
    folder: PathBuf,
    target: Option<i64>,
    yes: bool,
    convert: bool,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    if !folder.is_dir() {
        anyhow::bail!("{} is not a directory", folder.display());
    }
    if dry_run {
        cfg.backend = BackendKind::Noop;
    }
    let target = target
        .or(cfg.telegram.chat_id)
        .context("no target chat: pass --target or set telegram.chat_id")?;

    let driver = Arc::new(driver(cfg, TerminalDecisions::stdin(yes, convert)));
    let worker = driver.clone();
    let mut pipeline = tokio::spawn(async move { worker.run(&folder, target).await });

    tokio::select! {
        joined = &mut pipeline => {
            let outcome = joined.context("upload task panicked")?;
            driver.disconnect().await;
            if let Some(summary) = outcome? {
                if json {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
            }
            Ok(())
        }
        _ = shutdown_signal() => {
            info!("stopping gracefully");
            pipeline.abort();
            // Unwinding the task kills a running ffmpeg and removes its partial output.
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut pipeline).await.is_err() {
                warn!("upload task still busy after {:?}, exiting anyway", SHUTDOWN_GRACE);
            }
            driver.disconnect().await;
            // Last handle once the task is gone; removes the media scratch dir.
            drop(driver);
            // A prompt may still be blocked on stdin; don't wait for it.
            std::process::exit(0);
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
