use std::path::PathBuf;

use clap::{Parser, Subcommand};
use media_engine_types::LoopMode;

#[derive(Parser, Debug)]
#[command(name = "media-engine", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Extra library directory for local search (repeatable)
    #[arg(long = "library", global = true)]
    pub library_dirs: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Queue local files or http(s) URLs and play them through the simulated sink
    Play {
        /// Files or URLs, in queue order
        #[arg(required = true)]
        sources: Vec<String>,

        /// Loop mode: off, one or all
        #[arg(long = "loop", default_value = "off")]
        loop_mode: LoopMode,

        #[arg(long)]
        shuffle: bool,

        /// Shuffle seed, for reproducible order
        #[arg(long)]
        seed: Option<u64>,

        /// Initial volume (0.0 - 1.0)
        #[arg(long)]
        volume: Option<f32>,

        /// Playback speed (0.5 - 2.0)
        #[arg(long)]
        rate: Option<f32>,
    },

    /// List registered plugins and their status
    Plugins,

    /// Search every enabled search plugin
    Search {
        query: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Print lyrics for a file or URL
    Lyrics {
        source: String,

        /// Mark the line showing at this position (ms)
        #[arg(long)]
        at: Option<u64>,
    },
}
