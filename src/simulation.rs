use crate::error::ConfigError;
use crate::evolution::{EvolutionEngine, IndividualId};
use crate::physics::{PhysicsEngine, PhysicsParameters};
use crate::scheduler::{TaskId, TaskQueue};
use crate::track::{self, TrackDescription, TrackDifficulty};
use crate::visualization::{GenerationSnapshot, VehicleSnapshot, PIXELS_PER_UNIT};
use crate::world::PhysicsWorld;
use bevy::log::{debug, info};
use bevy::prelude::Resource;
use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;

// --- Loop Constants ---
pub const DRIVE_SPEED: f32 = 20.0; // Motor command applied to every vehicle each step
pub const GENERATION_BUDGET_SECS: f64 = 20.0; // Physics time per generation at 1x
pub const MAX_FRAME_DT: f64 = 0.1;
pub const TRANSITION_DELAY_SECS: f64 = 0.1;
pub const MIN_TIME_STEP: f32 = 1e-4; // Keeps one frame's step count bounded

// --- Configuration ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaParams {
    pub population_size: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub elitism_count: usize,
    pub tournament_size: usize,
    pub max_generations: usize, // Advisory; the binary stops there
    pub time_step: f32,         // Simulated seconds per physics step
}

impl Default for GaParams {
    fn default() -> Self {
        Self {
            population_size: 20,
            mutation_rate: 0.05,
            crossover_rate: 0.7,
            elitism_count: 2,
            tournament_size: 3,
            max_generations: 100,
            time_step: 1.0 / 60.0,
        }
    }
}

impl GaParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size == 0 {
            return Err(ConfigError::EmptyPopulation);
        }
        for (name, value) in [("mutation_rate", self.mutation_rate), ("crossover_rate", self.crossover_rate)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::RateOutOfRange { name, value });
            }
        }
        if self.elitism_count > self.population_size {
            return Err(ConfigError::TooManyElites {
                elitism: self.elitism_count,
                population: self.population_size,
            });
        }
        if self.tournament_size == 0 {
            return Err(ConfigError::EmptyTournament);
        }
        if !(self.time_step.is_finite() && self.time_step >= MIN_TIME_STEP) {
            return Err(ConfigError::InvalidTimeStep(self.time_step));
        }
        Ok(())
    }
}

/// Partial GA parameter change. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParamsUpdate {
    pub population_size: Option<usize>,
    pub mutation_rate: Option<f64>,
    pub crossover_rate: Option<f64>,
    pub elitism_count: Option<usize>,
    pub tournament_size: Option<usize>,
    pub max_generations: Option<usize>,
    pub time_step: Option<f32>,
}

impl ParamsUpdate {
    pub fn apply(&self, base: &GaParams) -> GaParams {
        GaParams {
            population_size: self.population_size.unwrap_or(base.population_size),
            mutation_rate: self.mutation_rate.unwrap_or(base.mutation_rate),
            crossover_rate: self.crossover_rate.unwrap_or(base.crossover_rate),
            elitism_count: self.elitism_count.unwrap_or(base.elitism_count),
            tournament_size: self.tournament_size.unwrap_or(base.tournament_size),
            max_generations: self.max_generations.unwrap_or(base.max_generations),
            time_step: self.time_step.unwrap_or(base.time_step),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Resource)]
#[serde(default)]
pub struct SimulationConfig {
    pub ga: GaParams,
    pub difficulty: TrackDifficulty,
    /// Fixed seed for the genetic operators and track generation. `None` draws from entropy.
    pub seed: Option<u64>,
    pub physics: PhysicsParameters,
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ga.validate()
    }
}

/// Playback multiplier. Only 1x, 2x and 4x exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Speed {
    #[default]
    X1,
    X2,
    X4,
}

impl Speed {
    pub fn multiplier(self) -> u32 {
        match self {
            Speed::X1 => 1,
            Speed::X2 => 2,
            Speed::X4 => 4,
        }
    }
}

impl TryFrom<u32> for Speed {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Speed::X1),
            2 => Ok(Speed::X2),
            4 => Ok(Speed::X4),
            other => Err(ConfigError::UnsupportedSpeed(other)),
        }
    }
}

impl From<Speed> for u32 {
    fn from(speed: Speed) -> Self {
        speed.multiplier()
    }
}

// --- Read Model ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitnessRecord {
    pub generation: usize,
    pub best: f32,
    pub average: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationState {
    pub running: bool,
    pub speed: Speed,
    pub current_generation: usize,
    pub best_fitness: f32,    // All-time best
    pub average_fitness: f32, // Of the last evaluated generation
    pub highlight_best: bool,
    pub fitness_history: Vec<FitnessRecord>,
}

impl Default for SimulationState {
    fn default() -> Self {
        Self {
            running: false,
            speed: Speed::X1,
            current_generation: 0,
            best_fitness: 0.0,
            average_fitness: 0.0,
            highlight_best: false,
            fitness_history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GenerationPhase {
    Building,
    Running,
    Evaluating,
    Transitioning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduledTask {
    Transition,
}

// === Orchestrator ===

/// Drives one population through repeated build / run / evaluate / transition
/// cycles. Wall time comes in through [`Simulation::tick`]; physics always
/// advances in fixed `time_step` increments.
pub struct Simulation<E: PhysicsEngine> {
    config: SimulationConfig,
    evolution: EvolutionEngine,
    world: PhysicsWorld<E>,
    track: TrackDescription,
    state: SimulationState,
    phase: GenerationPhase,
    accumulator: f64,
    evaluated: bool,
    last_tick: Option<f64>,
    tasks: TaskQueue<ScheduledTask>,
    pending_transition: Option<TaskId>,
}

impl<E: PhysicsEngine> Simulation<E> {
    /// Generation 0 on a fresh track, built and paused.
    pub fn new(config: SimulationConfig) -> Self {
        let (evolution_rng, mut track_rng) = seeded_rngs(config.seed);
        let track = track::generate(config.difficulty, &mut track_rng);
        let mut world = PhysicsWorld::new(config.physics.clone());
        world.build_track(&track);

        let mut simulation = Self {
            evolution: EvolutionEngine::new(config.ga.clone(), evolution_rng),
            config,
            world,
            track,
            state: SimulationState::default(),
            phase: GenerationPhase::Building,
            accumulator: 0.0,
            evaluated: false,
            last_tick: None,
            tasks: TaskQueue::new(),
            pending_transition: None,
        };
        simulation.build();
        simulation
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn phase(&self) -> GenerationPhase {
        self.phase
    }

    pub fn evolution(&self) -> &EvolutionEngine {
        &self.evolution
    }

    pub fn world(&self) -> &PhysicsWorld<E> {
        &self.world
    }

    pub fn track(&self) -> &TrackDescription {
        &self.track
    }

    /// Unconsumed simulated time, always below one `time_step` between ticks.
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    pub fn is_transition_pending(&self) -> bool {
        self.pending_transition.is_some()
    }

    /// Physics seconds each generation runs for at the current speed.
    pub fn generation_budget(&self) -> f64 {
        GENERATION_BUDGET_SECS / f64::from(self.state.speed.multiplier())
    }

    pub fn completed_generations(&self) -> usize {
        self.state.fitness_history.len()
    }

    /// Populates the physics world from the current individuals.
    pub fn build(&mut self) {
        self.phase = GenerationPhase::Building;
        self.world.reset();
        let spawn = self.spawn_point();
        for individual in self.evolution.individuals() {
            self.world.add_vehicle(individual.id, &individual.gene, spawn);
        }
        self.accumulator = 0.0;
        self.evaluated = false;
        self.state.current_generation = self.evolution.generation();
        self.phase = GenerationPhase::Running;
        debug!(
            "Built generation {} with {} vehicles",
            self.state.current_generation,
            self.world.vehicle_count()
        );
    }

    /// Advances the simulation to wall-clock `now` (seconds). Does nothing while stopped.
    pub fn tick(&mut self, now: f64) {
        if !self.state.running {
            return;
        }
        let dt = self.last_tick.map_or(0.0, |prev| (now - prev).clamp(0.0, MAX_FRAME_DT));
        self.last_tick = Some(now);

        while let Some((id, task)) = self.tasks.pop_due(now) {
            match task {
                ScheduledTask::Transition if self.pending_transition == Some(id) => {
                    self.pending_transition = None;
                    self.transition();
                }
                ScheduledTask::Transition => {}
            }
        }

        if self.phase == GenerationPhase::Running {
            self.advance(dt);
            if self.world.elapsed() >= self.generation_budget() {
                self.evaluate();
            }
        }

        if self.phase == GenerationPhase::Transitioning && self.pending_transition.is_none() {
            let id = self
                .tasks
                .schedule(ScheduledTask::Transition, now + TRANSITION_DELAY_SECS);
            self.pending_transition = Some(id);
        }
    }

    fn advance(&mut self, dt: f64) {
        self.accumulator += dt * f64::from(self.state.speed.multiplier());
        let time_step = self.config.ga.time_step;
        let step = f64::from(time_step);
        let ids: Vec<IndividualId> = self.evolution.individuals().iter().map(|ind| ind.id).collect();

        while self.accumulator >= step {
            for id in &ids {
                self.world.set_motor_speed(*id, DRIVE_SPEED);
            }
            self.world.step(time_step);
            self.accumulator -= step;
        }

        self.evolution.record_live_distances(&self.world.displacements());
    }

    /// Scores the running generation. Only the first call per generation has
    /// any effect; returns whether this call did the scoring.
    pub fn evaluate(&mut self) -> bool {
        if self.evaluated || self.phase != GenerationPhase::Running {
            return false;
        }
        self.phase = GenerationPhase::Evaluating;

        self.evolution.evaluate(&self.world.displacements());
        let best = self.evolution.best().map_or(0.0, |ind| ind.fitness);
        let average = self.evolution.average_fitness();
        self.state.fitness_history.push(FitnessRecord {
            generation: self.evolution.generation(),
            best,
            average,
        });
        self.state.best_fitness = best;
        self.state.average_fitness = average;
        self.evaluated = true;

        info!(
            "Generation {} evaluated: best {:.2}, average {:.2}, generation best {:.2}",
            self.evolution.generation(),
            best,
            average,
            self.evolution.generation_best_fitness()
        );
        self.phase = GenerationPhase::Transitioning;
        true
    }

    /// Breeds the next generation and rebuilds the world for it. Only valid
    /// after [`Self::evaluate`]; returns whether a transition happened.
    pub fn transition(&mut self) -> bool {
        if let Some(id) = self.pending_transition.take() {
            self.tasks.cancel(id);
        }
        if self.phase != GenerationPhase::Transitioning {
            return false;
        }
        self.evolution.evolve();
        self.world.reset();
        self.build();
        true
    }

    pub fn start(&mut self) {
        if self.state.running {
            return;
        }
        self.state.running = true;
        self.last_tick = None;
        debug!("Simulation started at generation {}", self.state.current_generation);
    }

    /// Pauses ticking. The accumulator remainder survives; a pending transition
    /// is cancelled and re-scheduled by the first tick after [`Self::start`].
    pub fn stop(&mut self) {
        self.state.running = false;
        self.last_tick = None;
        self.tasks.cancel_all();
        self.pending_transition = None;
    }

    /// Stops and starts over from generation 0 with a new population and track.
    pub fn reset(&mut self) {
        self.stop();
        let (evolution_rng, mut track_rng) = seeded_rngs(self.config.seed);
        self.evolution = EvolutionEngine::new(self.config.ga.clone(), evolution_rng);
        self.track = track::generate(self.config.difficulty, &mut track_rng);
        self.world.rebuild(&self.track);

        self.state = SimulationState {
            speed: self.state.speed,
            highlight_best: self.state.highlight_best,
            ..SimulationState::default()
        };
        self.build();
        info!(
            "Simulation reset: {} individuals on a {:?} track",
            self.config.ga.population_size, self.config.difficulty
        );
    }

    pub fn set_speed(&mut self, speed: Speed) {
        self.state.speed = speed;
    }

    pub fn toggle_highlight(&mut self) -> bool {
        self.state.highlight_best = !self.state.highlight_best;
        self.state.highlight_best
    }

    /// Merges `update` into the GA parameters and resets. An invalid merge is
    /// rejected and leaves the simulation untouched.
    pub fn update_params(&mut self, update: &ParamsUpdate) -> Result<(), ConfigError> {
        let merged = update.apply(&self.config.ga);
        merged.validate()?;
        self.config.ga = merged;
        self.reset();
        Ok(())
    }

    pub fn set_difficulty(&mut self, difficulty: TrackDifficulty) {
        self.config.difficulty = difficulty;
        self.reset();
    }

    /// Everything a renderer needs for the current frame.
    pub fn snapshot(&self) -> GenerationSnapshot {
        let best_id = self.evolution.best().map(|ind| ind.id);
        let vehicles = self
            .evolution
            .individuals()
            .iter()
            .filter_map(|ind| {
                let body = self.world.snapshot(ind.id)?;
                let best = best_id == Some(ind.id);
                Some(VehicleSnapshot {
                    id: ind.id,
                    elite: ind.elite,
                    best,
                    highlight: best && self.state.highlight_best,
                    fitness: ind.fitness,
                    distance: ind.distance,
                    body,
                })
            })
            .collect();

        GenerationSnapshot {
            generation: self.evolution.generation(),
            vehicles,
            track: self.track.clone(),
            track_render: self.world.track_render(),
            pixels_per_unit: PIXELS_PER_UNIT,
        }
    }

    fn spawn_point(&self) -> Point2<f32> {
        let x = self.config.physics.spawn_x;
        Point2::new(x, self.track.height_at(x) + self.config.physics.spawn_clearance)
    }
}

/// Independent streams for evolution and track generation.
fn seeded_rngs(seed: Option<u64>) -> (StdRng, StdRng) {
    let mut master = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    (StdRng::seed_from_u64(master.gen()), StdRng::seed_from_u64(master.gen()))
}
