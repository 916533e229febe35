//! Soak tool for the telemetry store.
//!
//! Drives a [`StoreRegistry`] the way the simulation does: several sessions,
//! concurrent producers storing organism results and environment snapshots,
//! then reads the fittest organisms back, exports every session and shuts
//! the registry down.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use verdant_core::{EnvironmentSnapshot, OrganismPerformance};
use verdant_store::{BulkExporter, ManagedStore, MetadataConfig, RecordStore, StoreRegistry};

/// Soak-test the telemetry store with synthetic simulation output
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of concurrent sessions
    #[arg(long, default_value_t = 2)]
    sessions: usize,

    /// Producer tasks per session
    #[arg(long, default_value_t = 4)]
    producers: i64,

    /// Organisms stored by each producer
    #[arg(long, default_value_t = 250)]
    organisms: i64,

    /// Environment ticks stored per session
    #[arg(long, default_value_t = 100)]
    ticks: u64,

    /// Number of fittest organisms to print per session
    #[arg(long, default_value_t = 5)]
    top: u32,

    /// Directory for export files
    #[arg(long, env = "VERDANT_EXPORT_DIR", default_value = "metadata")]
    export_dir: PathBuf,

    /// Extra `metadata.*` options as key=value (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

impl Args {
    fn config(&self) -> Result<MetadataConfig> {
        let mut properties = vec![
            ("metadata.OrganismPerformance.enabled".to_string(), "true".to_string()),
            ("metadata.EnvironmentSnapshot.enabled".to_string(), "true".to_string()),
            (
                "metadata.export.path".to_string(),
                self.export_dir.display().to_string(),
            ),
        ];
        for item in &self.overrides {
            let Some((key, value)) = item.split_once('=') else {
                bail!("override {item:?} is not KEY=VALUE");
            };
            properties.push((key.trim().to_string(), value.to_string()));
        }
        MetadataConfig::from_properties(properties).context("invalid metadata options")
    }
}

fn random_organism(id: i64, epoch: u32) -> OrganismPerformance {
    let mut rng = rand::rng();
    let birth_tick = rng.random_range(0..10_000u64);
    OrganismPerformance {
        organism_id: id,
        epoch,
        birth_tick,
        death_tick: rng
            .random_bool(0.8)
            .then(|| birth_tick + rng.random_range(1..500u64)),
        fitness: rng.random_range(0..1_000),
        genome: (0..16)
            .map(|_| ['A', 'C', 'G', 'T'][rng.random_range(0..4)])
            .collect(),
        cell_count: rng.random_range(1..64),
        energy: rng.random_range(0.0..100.0),
    }
}

async fn run_session(registry: &StoreRegistry, session_id: &str, args: &Args) -> Result<()> {
    let organisms = registry.get::<OrganismPerformance>(session_id)?;
    let environment = registry.get::<EnvironmentSnapshot>(session_id)?;

    let mut producers = tokio::task::JoinSet::new();
    for producer in 0..args.producers {
        let organisms = organisms.clone();
        let count = args.organisms;
        producers.spawn(async move {
            for i in 0..count {
                let epoch = u32::try_from(i / 100).unwrap_or(u32::MAX);
                organisms.store(random_organism(producer * count + i, epoch));
                if i % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });
    }
    for tick in 0..args.ticks {
        environment.store(EnvironmentSnapshot {
            tick,
            epoch: u32::try_from(tick / 100).unwrap_or(u32::MAX),
            population: u32::try_from(args.producers * args.organisms).unwrap_or(u32::MAX),
            total_energy: 1_000.0,
            mean_fitness: 500.0,
        });
    }
    while let Some(joined) = producers.join_next().await {
        joined.context("producer task failed")?;
    }

    let expected = u64::try_from(args.producers * args.organisms).unwrap_or(u64::MAX);
    let started = Instant::now();
    while organisms.count() < expected {
        if started.elapsed() > Duration::from_secs(30) {
            warn!(session_id, written = organisms.count(), expected, "writer fell behind");
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    info!(
        session_id,
        organisms = organisms.count(),
        snapshots = environment.count(),
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "session drained"
    );

    for (rank, organism) in organisms.page(Some("fitness"), 0, args.top)?.iter().enumerate() {
        println!(
            "{session_id} #{:<2} organism {:>6} fitness {:>4} cells {:>2}",
            rank + 1,
            organism.organism_id,
            organism.fitness,
            organism.cell_count
        );
    }

    if let Some(path) = organisms.output_path() {
        info!(session_id, path = %path.display(), "organisms streamed; skipping bulk export");
        return Ok(());
    }
    let exporter = BulkExporter::new(registry.config().export.clone());
    let summary = exporter.export(session_id, organisms.as_ref())?;
    info!(session_id, path = %summary.path.display(), records = summary.records, "exported");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let args = Args::parse();
    let registry = StoreRegistry::new(args.config()?)?;
    registry.start()?;
    info!(sessions = args.sessions, producers = args.producers, "soak starting");

    let mut failed = false;
    for session in 0..args.sessions {
        let session_id = format!("soak-{session}");
        if let Err(e) = run_session(&registry, &session_id, &args).await {
            warn!(session_id, error = %e, "session failed");
            failed = true;
        }
    }

    registry.shutdown().await;
    if failed {
        bail!("one or more sessions failed");
    }
    Ok(())
}
