//! shard-player - play a local file or a live stream from the command line

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shard_player::{Engine, PlayStatus, Settings, SourceKind, list_output_devices};

/// Command-line arguments for shard-player
#[derive(Parser, Debug)]
#[command(name = "shard-player")]
#[command(about = "Play an audio file or an HTTP stream")]
#[command(version)]
struct Args {
    /// File path or http(s) URL to play
    #[arg(required_unless_present = "list_devices")]
    target: Option<String>,

    /// Settings file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output device name
    #[arg(short, long)]
    device: Option<String>,

    /// Volume, 0 - 100
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
    volume: Option<u8>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    seconds: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shard_player=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        for device in list_output_devices() {
            println!("{}\t{}", device.name, device.description);
        }
        return Ok(());
    }

    let mut settings = match &args.config {
        Some(path) => Settings::load_from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::load(),
    };
    if let Some(device) = args.device {
        settings.audio_device_name = Some(device);
    }
    if let Some(volume) = args.volume {
        settings.volume = volume;
    }

    let target = args.target.context("Nothing to play")?;
    let mut engine = Engine::open(&settings).context("Failed to open audio output")?;
    info!(
        "Output device: {}",
        engine.device_name().unwrap_or("system default")
    );

    if target.starts_with("http://") || target.starts_with("https://") {
        engine.play_url(&target)?;
    } else {
        engine.play_file(Path::new(&target))?;
    }

    let started = Instant::now();
    let limit = args.seconds.map(Duration::from_secs);
    loop {
        thread::sleep(Duration::from_secs(1));
        print_status(&engine, &target);

        let status = engine.play_status();
        if status == PlayStatus::Finished
            || status == PlayStatus::Stopped
            || (status == PlayStatus::Paused && engine.stream_health().stream_ended)
        {
            break;
        }
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            info!("Time limit reached");
            break;
        }
    }

    let health = engine.stream_health();
    if let Some(error) = health.last_error {
        info!("Last stream error: {}", error);
    }
    engine.close();
    Ok(())
}

fn print_status(engine: &Engine, target: &str) {
    let metadata = engine.metadata();
    let title = metadata.display_title(Path::new(target));
    let position = engine.position_seconds();

    let mut line = format!(
        "[{}] {} {:02}:{:02}",
        engine.play_status().label(),
        title,
        position / 60,
        position % 60
    );
    if let Some(duration) = metadata.duration {
        let total = duration.as_secs();
        line.push_str(&format!(" / {:02}:{:02}", total / 60, total % 60));
    }
    if engine.source_kind() == SourceKind::Url {
        line.push_str(&format!(
            "  Buffered: {} kB ({}%)",
            engine.buffered_bytes() / 1024,
            engine.buffered_percent()
        ));
        if engine.stream_health().degraded {
            line.push_str("  [degraded]");
        }
    }
    println!("{}", line);
}
