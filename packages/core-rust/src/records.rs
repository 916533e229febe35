//! Telemetry records produced by the plant simulation.
//!
//! The tick loop emits an [`EnvironmentSnapshot`] per sampled tick and an
//! [`OrganismPerformance`] whenever an organism dies or an epoch ends. The
//! evolutionary loop reads performances back through the `"fitness"` index
//! to seed the next epoch with the fittest genomes.

use serde::{Deserialize, Serialize};

use crate::schema::{FieldSpec, TelemetryRecord};
use crate::types::IndexKey;

/// Lifetime summary of one organism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganismPerformance {
    /// Unique organism id within the session.
    pub organism_id: i64,
    /// Epoch the organism lived in.
    pub epoch: u32,
    /// Tick of germination.
    pub birth_tick: u64,
    /// Tick of death. `None` while alive at epoch end.
    pub death_tick: Option<u64>,
    /// Selection score; higher is fitter.
    pub fitness: i64,
    /// Hex-encoded genome.
    pub genome: String,
    /// Number of cells at death (or epoch end).
    pub cell_count: u32,
    /// Energy remaining at death (or epoch end).
    pub energy: f64,
}

impl TelemetryRecord for OrganismPerformance {
    const TYPE_NAME: &'static str = "OrganismPerformance";

    fn index_fields() -> Vec<FieldSpec<Self>> {
        vec![
            FieldSpec::primary("organismId", |r: &Self| Some(IndexKey::from(r.organism_id))),
            FieldSpec::secondary_named("fitness", "fitness", |r: &Self| {
                Some(IndexKey::from(r.fitness))
            }),
            FieldSpec::secondary_named("epoch", "epoch", |r: &Self| Some(IndexKey::from(r.epoch))),
            FieldSpec::secondary_named("deathTick", "deathTick", |r: &Self| {
                r.death_tick
                    .and_then(|tick| i64::try_from(tick).ok())
                    .map(IndexKey::from)
            }),
        ]
    }
}

/// World-level state sampled at a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSnapshot {
    /// Simulation tick.
    pub tick: u64,
    /// Epoch the tick belongs to.
    pub epoch: u32,
    /// Living organisms.
    pub population: u32,
    /// Sum of free energy over the grid.
    pub total_energy: f64,
    /// Mean fitness of the living population.
    pub mean_fitness: f64,
}

impl TelemetryRecord for EnvironmentSnapshot {
    const TYPE_NAME: &'static str = "EnvironmentSnapshot";

    fn index_fields() -> Vec<FieldSpec<Self>> {
        vec![
            FieldSpec::primary("tick", |r: &Self| i64::try_from(r.tick).ok().map(IndexKey::from)),
            FieldSpec::secondary_named("epoch", "epoch", |r: &Self| Some(IndexKey::from(r.epoch))),
            FieldSpec::secondary("population", |r: &Self| Some(IndexKey::from(r.population))),
        ]
    }
}
