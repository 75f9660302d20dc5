//! Configuration errors raised at the upstream validation boundary.
//!
//! The population engine and the orchestrator core never return these; they are
//! produced by [`GaParams::validate`](crate::simulation::GaParams::validate),
//! [`Speed::try_from`](crate::simulation::Speed) and the binary's config loading.

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Population size must be at least 1")]
    EmptyPopulation,
    #[error("{name} must be within [0, 1], got {value}")]
    RateOutOfRange { name: &'static str, value: f64 },
    #[error("Elitism count {elitism} exceeds population size {population}")]
    TooManyElites { elitism: usize, population: usize },
    #[error("Tournament size must be at least 1")]
    EmptyTournament,
    #[error("Time step must be finite and at least 1e-4, got {0}")]
    InvalidTimeStep(f32),
    #[error("Unsupported speed multiplier {0} (expected 1, 2 or 4)")]
    UnsupportedSpeed(u32),
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(String),
}
