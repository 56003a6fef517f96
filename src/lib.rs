//! Stochastic simulation of reaction networks inside nested membranes.
//!
//! A [`Model`] and an initial [`MembraneTree`] are wrapped by a [`Simulation`],
//! which keeps one propensity per (reaction, membrane) pair and recomputes only
//! the pairs a firing can affect.

mod config;
mod equation;
mod event_queue;
mod membrane;
mod model;
mod params;
mod rate_table;
mod reaction;
mod simulation;
mod species;
mod state;

use thiserror::Error;

pub use config::{RunConfig, SamplingConfig, SimulationConfig, UnresolvedPolicy};
pub use equation::{mass_action_count, BinaryOp, Equation, SpeciesCounts, UnaryOp};
pub use event_queue::{EventQueue, PendingEvent};
pub use membrane::{MembraneId, MembraneRef, MembraneTemplate, MembraneTree, TagAllocator};
pub use model::Model;
pub use params::ParameterTable;
pub use rate_table::RateTable;
pub use reaction::{Reaction, SECONDS_PER_HOUR};
pub use simulation::{EventKind, Sample, Simulation, StepEvent};
pub use species::{LocatedSpecies, Location, StoichiometrySpecies};
pub use state::{render_full_state, FullState};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("evaluation error: {0}")]
    Evaluation(String),
    #[error("negative reaction rate: {0}")]
    NegativeRate(String),
    #[error("missing parameter value: {0}")]
    MissingParameter(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid reaction: {0}")]
    InvalidReaction(String),
    #[error("unresolved location: {0}")]
    UnresolvedLocation(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("state parse error: {0}")]
    StateParse(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
