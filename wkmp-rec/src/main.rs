//! wkmp-rec - Recommendation engine command line tool
//!
//! Loads the recommendation backends configured in the catalog and prints,
//! for every track / release / artist, its most similar peers.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use wkmp_common::config::{LoggingConfig, RootFolderInitializer, RootFolderResolver};
use wkmp_common::db::{catalog, settings};
use wkmp_common::db::{RecommendationEngineType, TrackArtistLinkType};
use wkmp_rec::{EngineConfig, Progress, ProgressCallback, RecommendationEngine};

#[derive(Parser, Debug)]
#[command(name = "wkmp-rec", version, about = "Print similar tracks, releases and artists")]
struct Args {
    /// Root folder holding wkmp.db (overrides environment and config file)
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Print similar tracks for every track
    #[arg(short = 't', long)]
    tracks: bool,

    /// Print similar releases for every release
    #[arg(short = 'r', long)]
    releases: bool,

    /// Print similar artists for every artist
    #[arg(short = 'a', long)]
    artists: bool,

    /// Maximum number of similar entities per entry
    #[arg(short = 'm', long, default_value_t = 3)]
    max: usize,

    /// Restrict similar artists to these roles (repeatable)
    #[arg(long = "role")]
    roles: Vec<TrackArtistLinkType>,

    /// Rebuild backend models instead of reusing caches
    #[arg(long)]
    force_reload: bool,

    /// Persist this engine type before loading
    #[arg(long)]
    engine_type: Option<RecommendationEngineType>,

    /// Cancel the load if it runs longer than this
    #[arg(long)]
    load_timeout_secs: Option<u64>,
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .with_context(|| format!("Invalid log level '{}'", logging.level))?,
    };

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resolver = RootFolderResolver::new("recommendation").with_cli_arg(args.root_folder.clone());
    let config = resolver.load_config();
    init_tracing(&config.logging)?;

    info!(
        "Starting WKMP Recommendation Engine (wkmp-rec) v{}",
        env!("CARGO_PKG_VERSION")
    );

    let initializer = RootFolderInitializer::new(resolver.resolve());
    initializer.ensure_directory_exists()?;

    let db_path = initializer.database_path();
    info!("Database path: {}", db_path.display());
    let pool = wkmp_common::db::init_database(&db_path)
        .await
        .with_context(|| format!("Cannot open database {}", db_path.display()))?;

    if let Some(engine_type) = args.engine_type {
        settings::set_recommendation_engine_type(&pool, engine_type).await?;
        info!("Recommendation engine type set to {}", engine_type);
    }

    let engine_config = EngineConfig::from_toml(&config.recommendation, &initializer)?;
    debug!("Model cache folder: {}", engine_config.cache_dir.display());
    let engine = Arc::new(RecommendationEngine::new(pool.clone(), engine_config));

    let progress: ProgressCallback = Arc::new(|progress: Progress| {
        debug!(
            "Load progress: {}/{}",
            progress.processed_elems, progress.total_elems
        );
    });

    let mut loader = {
        let engine = Arc::clone(&engine);
        let force_reload = args.force_reload;
        tokio::spawn(async move { engine.load(force_reload, Some(progress)).await })
    };

    match args.load_timeout_secs {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), &mut loader).await {
            Ok(joined) => joined??,
            Err(_) => {
                warn!("Load still running after {}s, cancelling", secs);
                engine.cancel_load().await;
                loader.await??;
            }
        },
        None => loader.await??,
    }

    info!("Serving from {:?}", engine.serving_types().await);

    if args.tracks {
        print_similar_tracks(&pool, &engine, args.max).await?;
    }
    if args.releases {
        print_similar_releases(&pool, &engine, args.max).await?;
    }
    if args.artists {
        print_similar_artists(&pool, &engine, &args.roles, args.max).await?;
    }

    Ok(())
}

fn display_name(name: Option<String>, id: impl std::fmt::Display) -> String {
    name.unwrap_or_else(|| format!("#{}", id))
}

async fn print_similar_tracks(
    pool: &sqlx::SqlitePool,
    engine: &RecommendationEngine,
    max: usize,
) -> Result<()> {
    println!("=== Tracks ===");
    for track in catalog::get_all_track_ids(pool).await? {
        println!("{}", display_name(catalog::get_track_name(pool, track).await?, track));
        for similar in engine.similar_tracks(&[track], max).await {
            let name = catalog::get_track_name(pool, similar).await?;
            println!("    {}", display_name(name, similar));
        }
    }
    Ok(())
}

async fn print_similar_releases(
    pool: &sqlx::SqlitePool,
    engine: &RecommendationEngine,
    max: usize,
) -> Result<()> {
    println!("=== Releases ===");
    for release in catalog::get_all_release_ids(pool).await? {
        println!(
            "{}",
            display_name(catalog::get_release_name(pool, release).await?, release)
        );
        for similar in engine.similar_releases(release, max).await {
            let name = catalog::get_release_name(pool, similar).await?;
            println!("    {}", display_name(name, similar));
        }
    }
    Ok(())
}

async fn print_similar_artists(
    pool: &sqlx::SqlitePool,
    engine: &RecommendationEngine,
    roles: &[TrackArtistLinkType],
    max: usize,
) -> Result<()> {
    println!("=== Artists ===");
    for artist in catalog::get_all_artist_ids(pool).await? {
        println!(
            "{}",
            display_name(catalog::get_artist_name(pool, artist).await?, artist)
        );
        for similar in engine.similar_artists(artist, roles, max).await {
            let name = catalog::get_artist_name(pool, similar).await?;
            println!("    {}", display_name(name, similar));
        }
    }
    Ok(())
}
