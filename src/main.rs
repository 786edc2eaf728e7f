use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use netcdf_ingest::config::{CacheConfig, Config};
use netcdf_ingest::nc3::cache::HeaderCache;
use netcdf_ingest::nc3::{cdl, decode_header};
use netcdf_ingest::orchestrator::{make_provenance, make_slices};
use std::fs;
use std::path::PathBuf;

/// Extracts slice images and a provenance record from a NetCDF-3 volume
/// dataset (a single file or a directory of shards).
#[derive(Parser, Debug)]
#[command(author, version, about = "NetCDF-3 volume ingest: slices and provenance extraction")]
struct Cli {
    /// Dataset path: a single NetCDF file, or a directory containing its shards.
    path: PathBuf,

    /// Emit grey placeholder slice images instead of reading real volume data.
    #[arg(short = 'n', long = "mock-slices")]
    mock_slices: bool,

    /// Path to the persistent header cache store.
    #[arg(short = 'c', long = "cache-location")]
    cache_location: Option<PathBuf>,

    /// Overwrite existing slice outputs instead of skipping them.
    #[arg(long)]
    replace: bool,

    /// Plan outputs without writing any files.
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Print the dataset's first shard as a CDL-style header dump and exit.
    #[arg(long)]
    cdl: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config {
        cache: CacheConfig {
            location: cli.cache_location,
            ..CacheConfig::default()
        },
        replace: cli.replace,
        dry_run: cli.dry_run,
        thumbnail_sizes: Vec::new(),
        max_errors: None,
    };

    if cli.cdl {
        let shards = netcdf_ingest::shard::discover_shards(&cli.path)?;
        let cache = HeaderCache::open(&shards[0], config.cache.clone())?;
        let header = decode_header(cache, &shards[0].display().to_string())?;
        let name = shards[0]
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("dataset");
        print!("{}", cdl::render(&header, name));
        return Ok(());
    }

    let basename = netcdf_ingest::slice::slice_basename(&cli.path.display().to_string());

    info!("extracting provenance for {}", cli.path.display());
    let provenance = make_provenance(&cli.path, &config).context("failed to build provenance record")?;
    let provenance_path = format!("{basename}.json");
    fs::write(&provenance_path, provenance).context("failed to write provenance JSON")?;
    info!("wrote {provenance_path}");

    let existing: Vec<String> = fs::read_dir(".")
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();

    let outputs = make_slices(&cli.path, &config, &existing, cli.mock_slices)
        .context("failed to build slice images")?;
    for output in &outputs {
        if output.content.is_empty() {
            continue;
        }
        fs::write(&output.file_name, &output.content)
            .with_context(|| format!("failed to write {}", output.file_name))?;
        info!("wrote {} ({:?})", output.file_name, output.action);
    }

    Ok(())
}
