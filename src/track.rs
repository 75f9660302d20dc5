//! Procedural obstacle course generation.
//!
//! A track is a one-dimensional height field (ground profile with strictly
//! increasing x) plus a handful of static obstacles resting on it.

use nalgebra::{Point2, Vector2};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const TRACK_START_X: f32 = -20.0;
pub const LAUNCH_HEIGHT: f32 = 5.0;
pub const LAUNCH_LENGTH: f32 = 5.0;
pub const LANDING_LENGTH: f32 = 5.0;
pub const MIN_GROUND_HEIGHT: f32 = 0.0;
pub const MAX_GROUND_HEIGHT: f32 = 10.0;

pub const OBSTACLE_START_X: f32 = 10.0;
pub const OBSTACLE_END_MARGIN: f32 = 5.0;
pub const OBSTACLE_EMBED_DEPTH: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackDifficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl TrackDifficulty {
    pub const ALL: [TrackDifficulty; 3] = [TrackDifficulty::Easy, TrackDifficulty::Medium, TrackDifficulty::Hard];

    pub fn course_length(self) -> f32 {
        match self {
            TrackDifficulty::Easy => 30.0,
            TrackDifficulty::Medium => 50.0,
            TrackDifficulty::Hard => 70.0,
        }
    }

    pub fn segment_length(self) -> f32 {
        match self {
            TrackDifficulty::Easy => 3.0,
            TrackDifficulty::Medium => 2.0,
            TrackDifficulty::Hard => 1.5,
        }
    }

    pub fn hill_amplitude(self) -> f32 {
        match self {
            TrackDifficulty::Easy => 0.5,
            TrackDifficulty::Medium => 1.0,
            TrackDifficulty::Hard => 1.5,
        }
    }

    /// Chance per segment of a sharp step, and the step's amplitude multiplier.
    fn step_profile(self) -> Option<(f64, f32)> {
        match self {
            TrackDifficulty::Easy => None,
            TrackDifficulty::Medium => Some((0.2, 1.0)),
            TrackDifficulty::Hard => Some((0.3, 1.5)),
        }
    }

    pub fn obstacle_count(self) -> usize {
        match self {
            TrackDifficulty::Easy => 0,
            TrackDifficulty::Medium => 3,
            TrackDifficulty::Hard => 6,
        }
    }
}

impl std::str::FromStr for TrackDifficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(TrackDifficulty::Easy),
            "medium" => Ok(TrackDifficulty::Medium),
            "hard" => Ok(TrackDifficulty::Hard),
            other => Err(format!("unknown difficulty '{other}' (expected easy, medium or hard)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObstacleShape {
    Box { half_extents: Vector2<f32> },
    /// Upward triangle standing on its base.
    Triangle { base: f32, height: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    /// Body origin: on the ground surface, pushed down by the embed depth.
    pub position: Point2<f32>,
    pub shape: ObstacleShape,
}

impl Obstacle {
    /// Outline relative to `position`, counter-clockwise.
    pub fn local_vertices(&self) -> Vec<Point2<f32>> {
        match self.shape {
            ObstacleShape::Box { half_extents: h } => vec![
                Point2::new(-h.x, -h.y),
                Point2::new(h.x, -h.y),
                Point2::new(h.x, h.y),
                Point2::new(-h.x, h.y),
            ],
            ObstacleShape::Triangle { base, height } => vec![
                Point2::new(-base / 2.0, 0.0),
                Point2::new(base / 2.0, 0.0),
                Point2::new(0.0, height),
            ],
        }
    }

    pub fn world_vertices(&self) -> Vec<Point2<f32>> {
        self.local_vertices()
            .into_iter()
            .map(|v| v + self.position.coords)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescription {
    pub difficulty: TrackDifficulty,
    pub ground: Vec<Point2<f32>>,
    pub obstacles: Vec<Obstacle>,
}

impl TrackDescription {
    /// Ground height at `x` by linear interpolation between the bracketing
    /// profile points. Outside the profile the nearest end height is used.
    pub fn height_at(&self, x: f32) -> f32 {
        interpolate_height(&self.ground, x)
    }

    pub fn course_length(&self) -> f32 {
        self.difficulty.course_length()
    }
}

fn interpolate_height(ground: &[Point2<f32>], x: f32) -> f32 {
    let (Some(first), Some(last)) = (ground.first(), ground.last()) else {
        return 0.0;
    };
    if x <= first.x {
        return first.y;
    }
    if x >= last.x {
        return last.y;
    }
    for pair in ground.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.x <= x && x <= b.x {
            let t = (x - a.x) / (b.x - a.x);
            return a.y * (1.0 - t) + b.y * t;
        }
    }
    last.y
}

/// Generates a fresh course for `difficulty`. Exact coordinates depend on `rng`.
pub fn generate<R: Rng + ?Sized>(difficulty: TrackDifficulty, rng: &mut R) -> TrackDescription {
    let ground = generate_ground(difficulty, rng);
    let obstacles = place_obstacles(difficulty, &ground, rng);
    TrackDescription {
        difficulty,
        ground,
        obstacles,
    }
}

fn generate_ground<R: Rng + ?Sized>(difficulty: TrackDifficulty, rng: &mut R) -> Vec<Point2<f32>> {
    let course_length = difficulty.course_length();
    let segment = difficulty.segment_length();
    let amplitude = difficulty.hill_amplitude();

    let mut x = TRACK_START_X;
    let mut y = LAUNCH_HEIGHT;
    let mut ground = vec![Point2::new(x, y)];
    x += LAUNCH_LENGTH;
    ground.push(Point2::new(x, y));

    while x < course_length {
        x += segment;
        let delta = match difficulty.step_profile() {
            Some((chance, multiplier)) if rng.gen_bool(chance) => {
                let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                sign * rng.gen::<f32>() * amplitude * multiplier
            }
            _ => (rng.gen::<f32>() - 0.5) * amplitude,
        };
        y = (y + delta).clamp(MIN_GROUND_HEIGHT, MAX_GROUND_HEIGHT);
        ground.push(Point2::new(x, y));
    }

    x += LANDING_LENGTH;
    ground.push(Point2::new(x, y));
    ground
}

fn place_obstacles<R: Rng + ?Sized>(difficulty: TrackDifficulty, ground: &[Point2<f32>], rng: &mut R) -> Vec<Obstacle> {
    let count = difficulty.obstacle_count();
    let span = difficulty.course_length() - OBSTACLE_END_MARGIN - OBSTACLE_START_X;

    (0..count)
        .map(|i| {
            let x = OBSTACLE_START_X + span * (i + 1) as f32 / (count + 1) as f32;
            let y = interpolate_height(ground, x) - OBSTACLE_EMBED_DEPTH;
            let shape = if rng.gen_bool(0.5) {
                ObstacleShape::Box {
                    half_extents: Vector2::new(rng.gen_range(0.5..=1.0), rng.gen_range(0.5..=1.0)),
                }
            } else {
                ObstacleShape::Triangle {
                    base: rng.gen_range(0.8..=1.3),
                    height: rng.gen_range(0.5..=1.0),
                }
            };
            Obstacle {
                position: Point2::new(x, y),
                shape,
            }
        })
        .collect()
}
