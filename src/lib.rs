//! Evolves three-wheeled vehicles with a genetic algorithm and scores them by
//! how far they drive across a generated obstacle course.

pub mod error;
pub mod evolution;
pub mod operators;
pub mod organism;
pub mod physics;
pub mod scheduler;
pub mod simulation;
pub mod track;
pub mod visualization;
pub mod world;

pub use error::ConfigError;
pub use evolution::{EvolutionEngine, Individual, IndividualId};
pub use organism::VehicleGene;
pub use physics::{PhysicsEngine, PhysicsParameters, RapierEngine};
pub use simulation::{GaParams, ParamsUpdate, Simulation, SimulationConfig, SimulationState, Speed};
pub use track::{TrackDescription, TrackDifficulty};
pub use visualization::GenerationSnapshot;
pub use world::PhysicsWorld;
