//! `media-engine` - drive the playback engine from the command line.
//!
//! Local files and http(s) URLs are queued and played through a simulated clock sink; every
//! player event is printed to stdout as one JSON line. Logs go to stderr.

mod cli;
mod clock_sink;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use media_engine::plugins::{DirectUrlPlugin, LocalFilePlugin};
use media_engine::{CapabilityRegistry, Catalog, EngineError, MediaPlugin, Player};
use media_engine_types::{ErrorInfo, LoopMode, PlayerEvent, SourceDescriptor, TransportState};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::cli::{Args, Command};
use crate::clock_sink::ClockSink;
use crate::config::CliConfig;

/// What the event printer reports back to the control loop.
enum Signal {
    Idle,
    Failed(ErrorInfo),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,media_engine=info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    cfg.local.library_dirs.extend(args.library_dirs.iter().cloned());

    let registry = Arc::new(CapabilityRegistry::new());
    install_plugins(&registry, &cfg).await?;

    let result = match args.cmd {
        Command::Plugins => {
            list_plugins(&registry);
            Ok(())
        }
        Command::Search { query, limit } => {
            search(&registry, &cfg, &query, limit).await;
            Ok(())
        }
        Command::Lyrics { source, at } => lyrics(&registry, &cfg, &source, at).await,
        Command::Play {
            sources,
            loop_mode,
            shuffle,
            seed,
            volume,
            rate,
        } => {
            if let Some(volume) = volume {
                cfg.engine.initial_volume = volume;
            }
            if seed.is_some() {
                cfg.engine.shuffle_seed = seed;
            }
            cfg.engine.validate()?;
            let options = PlayOptions {
                loop_mode,
                shuffle,
                rate,
            };
            play(registry.clone(), cfg, &sources, options).await
        }
    };

    for info in registry.plugins() {
        if let Err(err) = registry.dispose(&info.manifest.id).await {
            tracing::debug!(plugin = %info.manifest.id, error = %err, "dispose skipped");
        }
    }
    result
}

async fn install_plugins(registry: &CapabilityRegistry, cfg: &CliConfig) -> Result<()> {
    let local: Arc<dyn MediaPlugin> = Arc::new(LocalFilePlugin::new(cfg.local.library_dirs.clone()));
    let url: Arc<dyn MediaPlugin> = Arc::new(DirectUrlPlugin::new());
    for plugin in [local, url] {
        let id = plugin.manifest().id.clone();
        registry
            .install(plugin)
            .await
            .with_context(|| format!("install plugin {id}"))?;
    }
    Ok(())
}

fn list_plugins(registry: &CapabilityRegistry) {
    for info in registry.plugins() {
        let abilities: Vec<String> = info.manifest.abilities.iter().map(|a| a.to_string()).collect();
        let provenances: Vec<String> =
            info.manifest.provenances.iter().map(|p| p.to_string()).collect();
        println!(
            "{:<14} {:<10} {:<10} {:<28} {}",
            info.manifest.id,
            info.manifest.version,
            info.status,
            abilities.join(","),
            provenances.join(",")
        );
    }
}

async fn search(registry: &Arc<CapabilityRegistry>, cfg: &CliConfig, query: &str, limit: usize) {
    let catalog = Catalog::new(registry.clone(), cfg.engine.resolution_timeout());
    for (provenance, outcome) in catalog.search_all(query, limit).await {
        match outcome {
            Ok(hits) => {
                for hit in hits {
                    let line = serde_json::json!({
                        "provenance": provenance.to_string(),
                        "id": hit.id(),
                        "metadata": hit.metadata(),
                    });
                    println!("{line}");
                }
            }
            Err(err) => eprintln!("{provenance}: {err}"),
        }
    }
}

async fn lyrics(
    registry: &Arc<CapabilityRegistry>,
    cfg: &CliConfig,
    source: &str,
    at: Option<u64>,
) -> Result<()> {
    let descriptor = descriptor_for(source)?.shared();
    let catalog = Catalog::new(registry.clone(), cfg.engine.resolution_timeout());
    let Some(lyrics) = catalog.lyrics(&descriptor).await? else {
        eprintln!("no lyrics for {}", descriptor.id());
        return Ok(());
    };
    if lyrics.synced.is_empty() {
        println!("{}", lyrics.plain_text.unwrap_or_default());
        return Ok(());
    }
    let current = at.and_then(|position_ms| lyrics.line_at(position_ms));
    for (index, line) in lyrics.synced.iter().enumerate() {
        let marker = if Some(index) == current { '>' } else { ' ' };
        let (minutes, ms) = (line.time_ms / 60_000, line.time_ms % 60_000);
        println!("{marker} [{minutes:02}:{:05.2}] {}", ms as f64 / 1_000.0, line.text);
    }
    Ok(())
}

/// http(s) URLs go to the URL plugin, `file:` URLs and plain paths to the local one.
fn descriptor_for(source: &str) -> Result<SourceDescriptor> {
    let path = match Url::parse(source) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            return Ok(DirectUrlPlugin::descriptor_for(url.as_str()));
        }
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|()| anyhow!("file url {source:?} is not a local path"))?,
        _ => PathBuf::from(source),
    };
    let path = std::path::absolute(&path).with_context(|| format!("resolve path {source:?}"))?;
    Ok(LocalFilePlugin::descriptor_for(&path))
}

struct PlayOptions {
    loop_mode: LoopMode,
    shuffle: bool,
    rate: Option<f32>,
}

async fn play(
    registry: Arc<CapabilityRegistry>,
    cfg: CliConfig,
    sources: &[String],
    options: PlayOptions,
) -> Result<()> {
    let descriptors = sources
        .iter()
        .map(|source| descriptor_for(source).map(SourceDescriptor::shared))
        .collect::<Result<Vec<_>>>()?;

    let sink = ClockSink::new(cfg.sink.default_track_ms, cfg.sink.tick_ms);
    let player = Player::spawn(cfg.engine, registry, Box::new(sink));

    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<Signal>();
    let events = player.events().subscribe_channel();
    std::thread::spawn(move || {
        while let Some(event) = events.recv() {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => tracing::warn!(error = %err, "event not serializable"),
            }
            let signal = match event {
                PlayerEvent::StateChanged {
                    state: TransportState::Idle,
                    ..
                } => Some(Signal::Idle),
                PlayerEvent::Error { error } => Some(Signal::Failed(error)),
                _ => None,
            };
            if let Some(signal) = signal {
                if signal_tx.send(signal).is_err() {
                    break;
                }
            }
        }
    });

    {
        let player = player.clone();
        let _ = ctrlc::set_handler(move || {
            tracing::info!("interrupted, stopping");
            let _ = player.stop();
        });
    }

    player.set_loop_mode(options.loop_mode)?;
    if let Some(rate) = options.rate {
        player.set_rate(rate)?;
    }
    if let Err(err) = player.play_all(descriptors, 0).await {
        tracing::warn!(error = %err, "first track failed");
    }
    if options.shuffle {
        player.set_shuffle(true)?;
    }

    let mut failures = 0usize;
    while let Some(signal) = signal_rx.recv().await {
        match signal {
            Signal::Idle => break,
            Signal::Failed(error) => {
                failures += 1;
                tracing::warn!(kind = ?error.kind, message = %error.message, "track failed, skipping");
                match player.next().await {
                    Ok(()) => {}
                    Err(err @ EngineError::CommandIgnored { .. }) => {
                        tracing::info!(reason = %err, "nothing left to play");
                        break;
                    }
                    // The failed track reports its own `Error` event.
                    Err(_) => {}
                }
            }
        }
    }

    player.shutdown()?;
    if failures > 0 {
        tracing::warn!(failures, "playback finished with failures");
    }
    Ok(())
}
