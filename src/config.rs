//! Explicit configuration, replacing the Python prototype's class-level
//! shared state (`FileCache.cache_location`, `.force_cache`, `.cache_limit`
//! were all class attributes mutated process-wide — see spec §9's design
//! note on replacing shared-dictionary-style state with an explicit value
//! threaded through the orchestrator).

use std::path::PathBuf;

/// Settings for the header cache (C2).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Path to the on-disk cache store. `None` disables caching entirely.
    pub location: Option<PathBuf>,
    /// A prefix stripped from file paths before using them as cache keys,
    /// so that a cache built on one host can be reused on another with a
    /// differently-rooted mount of the same data.
    pub root: Option<PathBuf>,
    /// If true, a cache store is created even if `location` does not yet
    /// exist on disk. If false, caching is a no-op until the store exists.
    pub force_create: bool,
    /// Hard cap on the size of the cached prefix of any one file.
    pub limit: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            location: None,
            root: None,
            force_create: false,
            limit: 512 * 1024,
        }
    }
}

/// Top-level settings for one ingest run over a single dataset path.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    /// Replace existing outputs instead of skipping them.
    pub replace: bool,
    /// Skip real slice computation, emitting grey placeholder images with
    /// the right names instead (mirrors `make_slices.slices(dry_run=True)`).
    pub dry_run: bool,
    /// Additional thumbnail sizes to render alongside the full-size slice.
    pub thumbnail_sizes: Vec<(u32, u32)>,
    /// Abort after this many structural failures. Mirrors the shape of the
    /// prototype's `Updater.MAX_ERRORS` batch-abort threshold; unused by
    /// the single-dataset CLI driver, which only ever processes one
    /// dataset and so never accumulates enough errors to matter.
    pub max_errors: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache: CacheConfig::default(),
            replace: false,
            dry_run: false,
            thumbnail_sizes: Vec::new(),
            max_errors: None,
        }
    }
}
