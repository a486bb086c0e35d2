mod renderer;

use std::io::{Write, stdout};
use std::path::PathBuf;

use anyhow::{Context, Result};
use cctree_core::{Experiment, ReaderConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Print the calling context tree of an HPCToolkit database.
#[derive(Debug, Parser)]
#[command(name = "cctree", version)]
struct Args {
    /// Database directory holding experiment.xml and the metric files.
    dir: PathBuf,
    /// Emit the tree as JSON instead of indented text.
    #[arg(long)]
    json: bool,
    /// Only print nodes up to this depth (root = 1).
    #[arg(long)]
    max_depth: Option<usize>,
    /// JSON reader configuration; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Metadata file name inside the database directory.
    #[arg(long)]
    metadata_file: Option<String>,
    /// Suffix of the per-process metric files.
    #[arg(long)]
    suffix: Option<String>,
    /// Read metric files one at a time.
    #[arg(long)]
    sequential: bool,
    /// Log stage progress to stderr.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn reader_config(&self) -> Result<ReaderConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let data = std::fs::read(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                ReaderConfig::from_json(&data)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => ReaderConfig::default(),
        };
        if let Some(name) = &self.metadata_file {
            config = config.with_metadata_file(name.clone());
        }
        if let Some(suffix) = &self.suffix {
            config = config.with_metric_suffix(suffix.clone());
        }
        if self.sequential {
            config = config.with_parallel(false);
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.reader_config()?;
    tracing::debug!(?config, "reader configuration");
    let experiment = Experiment::open_with(&args.dir, &config)
        .with_context(|| format!("loading database {}", args.dir.display()))?;

    let mut out = stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, experiment.root())?;
        writeln!(out)?;
    } else {
        renderer::render_tree(&mut out, &experiment, args.max_depth)?;
    }
    Ok(())
}
