//! Region check binary for Strata.
//!
//! Connects to the store, applies pending migrations, and reconstructs
//! every region listed in the configuration exactly as a simulator would
//! at startup. Orphaned and corrupt rows found along the way are deleted,
//! so running this against a store left behind by a crash repairs it.
//!
//! # Usage
//!
//! ```text
//! strata-check [config.yaml]
//! ```
//!
//! The config path defaults to `strata.yaml` in the working directory; a
//! missing file means defaults.
//!
//! # Startup Sequence
//!
//! 1. Load configuration
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and run migrations
//! 4. Load and repair each configured region, then its terrain
//! 5. Log a summary

mod error;

use std::path::{Path, PathBuf};

use strata_db::PostgresPool;
use strata_persist::config::{LogFormat, LoggingConfig};
use strata_persist::{GraphLoader, StrataConfig, load_default_terrain, load_terrain};
use strata_types::RegionId;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::CheckError;

/// Config file used when no path is given.
const DEFAULT_CONFIG_PATH: &str = "strata.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, connection, migration, or a region
/// read fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    let (config, found) = load_config(&path)?;
    init_logging(&config.logging)?;

    if found {
        info!(path = %path.display(), "Configuration loaded");
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
    }

    if config.regions.is_empty() {
        warn!("No regions configured, nothing to check");
    }

    run(&config).await?;

    info!("strata-check complete");
    Ok(())
}

/// Read the config file at `path`, or defaults if it does not exist.
///
/// The flag reports whether the file was found.
fn load_config(path: &Path) -> Result<(StrataConfig, bool), CheckError> {
    if path.exists() {
        Ok((StrataConfig::from_file(path)?, true))
    } else {
        Ok((StrataConfig::parse("")?, false))
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(logging: &LoggingConfig) -> Result<(), CheckError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| CheckError::Logging {
        message: e.to_string(),
    })
}

async fn run(config: &StrataConfig) -> Result<(), CheckError> {
    let pool = PostgresPool::open(&config.database.pool_settings()).await?;
    pool.migrate().await?;

    let result = check_regions(&pool, config).await;
    pool.close().await;
    result
}

async fn check_regions(pool: &PostgresPool, config: &StrataConfig) -> Result<(), CheckError> {
    let scene = pool.scene_store();
    let terrain = pool.terrain_store();
    let loader = GraphLoader::new(&scene, config.persistence.orphan_chunk_size);

    let mut repaired_regions = 0_usize;
    for &region in &config.regions {
        let load = loader.load(region).await.map_err(load_error(region))?;
        let live = load_terrain(&terrain, region)
            .await
            .map_err(load_error(region))?;
        let defaults = load_default_terrain(&terrain, region)
            .await
            .map_err(load_error(region))?;

        info!(
            region = %region,
            groups = load.groups.len(),
            parts = load.part_count(),
            live_patches = live.len(),
            default_patches = defaults.len(),
            "Region checked"
        );

        let repairs = load.repairs;
        if !repairs.is_clean() {
            repaired_regions = repaired_regions.saturating_add(1);
            warn!(
                region = %region,
                malformed_rows = repairs.malformed_rows,
                withheld_rows = repairs.withheld_rows,
                orphaned_parts = repairs.orphaned_parts,
                orphaned_items = repairs.orphaned_items,
                discarded_groups = repairs.discarded_groups,
                failed_deletes = repairs.failed_deletes,
                "Region needed repair"
            );
        }
    }

    info!(
        regions = config.regions.len(),
        repaired_regions,
        "All configured regions checked"
    );
    Ok(())
}

fn load_error(region: RegionId) -> impl FnOnce(strata_persist::LoadError) -> CheckError {
    move |source| CheckError::Load { region, source }
}
