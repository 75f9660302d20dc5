use bevy::app::{AppExit, ScheduleRunnerPlugin};
use bevy::log::LogPlugin;
use bevy::prelude::*;
use clap::Parser;
use evo_trike::simulation::MAX_FRAME_DT;
use evo_trike::{ConfigError, RapierEngine, Simulation, SimulationConfig, Speed, TrackDifficulty};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "evo_trike",
    version,
    about = "Evolve three-wheeled vehicles across a generated obstacle course"
)]
struct Cli {
    /// JSON file with a full or partial simulation config.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Track difficulty: easy, medium or hard.
    #[arg(short, long)]
    difficulty: Option<TrackDifficulty>,
    #[arg(short, long)]
    population: Option<usize>,
    /// Stop after this many evaluated generations.
    #[arg(short, long)]
    generations: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Playback multiplier (1, 2 or 4).
    #[arg(long, default_value_t = 1)]
    speed: u32,
    /// Feed the loop a synthetic clock instead of waiting on real time.
    #[arg(long)]
    turbo: bool,
}

// --- Bevy App Setup ---

#[derive(Resource)]
struct SimulationResource(Simulation<RapierEngine>);

#[derive(Resource)]
struct RunProgress {
    turbo: bool,
    clock: f64,
    reported: usize,
    max_generations: usize,
}

fn load_config(cli: &Cli) -> Result<(SimulationConfig, Speed), ConfigError> {
    let mut config = match &cli.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(difficulty) = cli.difficulty {
        config.difficulty = difficulty;
    }
    if let Some(population) = cli.population {
        config.ga.population_size = population;
    }
    if let Some(generations) = cli.generations {
        config.ga.max_generations = generations;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    config.validate()?;
    let speed = Speed::try_from(cli.speed)?;
    Ok((config, speed))
}

fn main() {
    let cli = Cli::parse();
    let (sim_config, speed) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    let mut simulation = Simulation::<RapierEngine>::new(sim_config.clone());
    simulation.set_speed(speed);

    let frame = if cli.turbo {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(1.0 / 60.0)
    };

    App::new()
        .add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(frame)))
        .add_plugins(LogPlugin::default())
        .insert_resource(RunProgress {
            turbo: cli.turbo,
            clock: 0.0,
            reported: 0,
            max_generations: sim_config.ga.max_generations,
        })
        .insert_resource(sim_config) // SimulationConfig is also a Bevy resource
        .insert_resource(SimulationResource(simulation))
        .add_systems(Startup, start_simulation)
        .add_systems(Update, (tick_simulation, report_generations).chain())
        .run();
}

fn start_simulation(config: Res<SimulationConfig>, mut sim: ResMut<SimulationResource>) {
    info!(
        "Vehicle evolution starting: population {}, {:?} track ({:.0} units), {}x speed, seed {:?}",
        config.ga.population_size,
        config.difficulty,
        sim.0.track().course_length(),
        sim.0.state().speed.multiplier(),
        config.seed
    );
    sim.0.start();
}

fn tick_simulation(time: Res<Time>, mut sim: ResMut<SimulationResource>, mut progress: ResMut<RunProgress>) {
    let now = if progress.turbo {
        progress.clock += MAX_FRAME_DT;
        progress.clock
    } else {
        time.elapsed_seconds_f64()
    };
    sim.0.tick(now);
}

fn report_generations(
    sim: Res<SimulationResource>,
    mut progress: ResMut<RunProgress>,
    mut exit: EventWriter<AppExit>,
) {
    let history = &sim.0.state().fitness_history;
    if history.len() > progress.reported {
        let leader = sim.0.snapshot().leader_x().unwrap_or(0.0);
        for record in &history[progress.reported..] {
            info!(
                "Generation {}: best {:.2}, average {:.2}, leader at x = {:.1}",
                record.generation, record.best, record.average, leader
            );
        }
        progress.reported = history.len();
    }

    if progress.reported >= progress.max_generations {
        if let Some(best) = sim.0.evolution().best() {
            info!(
                "Finished {} generations. All-time best {} from generation {}: fitness {:.2}, {} chassis vertices",
                progress.reported,
                best.id,
                best.generation,
                best.fitness,
                best.gene.chassis.vertex_count()
            );
        }
        exit.send(AppExit);
    }
}
