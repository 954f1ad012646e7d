use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use snipsync::data::{windows_from_records, MemoryStore, SniplistFile};
use snipsync::platform::{LogNotifier, PlatformApi, SimulatedPlatform};
use snipsync::{PlaybackConfig, PlaylistController, PlaylistPhase};

#[derive(Parser)]
#[command(name = "snipsync", version, about = "Play sniplists against a simulated embed runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a sniplist file from start to completion
    Play {
        /// Sniplist JSON file ({ "id", "snippets": [...] })
        file: PathBuf,
        /// Use the touch-device preset and recovery strategy
        #[arg(long)]
        mobile: bool,
        /// Partial PlaybackConfig JSON overriding the device preset
        #[arg(long)]
        config: Option<PathBuf>,
        /// Sniplist id to play instead of the file's own id
        #[arg(long)]
        id: Option<String>,
        /// Simulate a network loss this many seconds into playback
        #[arg(long)]
        offline_at: Option<f64>,
        /// How long the simulated loss lasts before resuming
        #[arg(long, default_value_t = 3.0)]
        offline_for: f64,
    },
    /// Validate a sniplist file and print its windows in playback order
    Check { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Commands::Check { file } => check(&file),
        Commands::Play {
            file,
            mobile,
            config,
            id,
            offline_at,
            offline_for,
        } => play(&file, mobile, config.as_deref(), id, offline_at, offline_for).await,
    }
}

fn check(file: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let list: SniplistFile = serde_json::from_str(&text).context("parsing sniplist")?;
    let total = list.snippets.len();
    let windows = windows_from_records(list.snippets);
    println!("{} ({} snippets, {} playable)", list.id, total, windows.len());
    for (i, w) in windows.iter().enumerate() {
        println!(
            "{:>3}  {:<14} {:>8.2} - {:<8.2} {}",
            i, w.video_id, w.start, w.end, w.display_title
        );
    }
    if windows.is_empty() {
        bail!("sniplist {} has no playable snippets", list.id);
    }
    Ok(())
}

async fn play(
    file: &Path,
    mobile: bool,
    config: Option<&Path>,
    id: Option<String>,
    offline_at: Option<f64>,
    offline_for: f64,
) -> anyhow::Result<()> {
    let (store, file_id) = MemoryStore::from_json_file(file)?;
    let sniplist_id = id.unwrap_or(file_id);

    let platform = if mobile {
        SimulatedPlatform::mobile()
    } else {
        SimulatedPlatform::new()
    }
    .with_notifier(Arc::new(LogNotifier::new()));

    let config = match config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            PlaybackConfig::from_json(&text)?
        }
        None => PlaybackConfig::for_device(platform.device_class()),
    };

    let player = PlaylistController::new(&platform, Arc::new(store), config)?;
    let mut phases = player.subscribe();
    player.start(&sniplist_id).await?;

    if let Some(at) = offline_at {
        let network = platform.network_monitor().clone();
        tokio::time::sleep(Duration::from_secs_f64(at.max(0.0))).await;
        network.set_online(false);
        tokio::time::sleep(Duration::from_secs_f64(offline_for.max(0.0))).await;
        network.set_online(true);
        player.resume().await?;
    }

    let mut last_index = None;
    loop {
        let phase = phases.borrow_and_update().clone();
        match phase {
            PlaylistPhase::Complete => break,
            PlaylistPhase::Error(e) => bail!("sniplist failed: {:?}", e),
            PlaylistPhase::Playing(index) if last_index != Some(index) => {
                last_index = Some(index);
                if let Some(w) = player.now_playing().await? {
                    log::info!("now playing #{}: {} ({:.1}s)", index, w.display_title, w.duration());
                }
            }
            _ => {}
        }
        if phases.changed().await.is_err() {
            break;
        }
    }

    let snapshot = player.snapshot().await?;
    log::info!(
        "finished {} windows with {} automatic advances",
        snapshot.len,
        snapshot.advances
    );
    player.close().await?;
    Ok(())
}
