use nalgebra::Point2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

// --- Gene Range Constants ---

// Chassis
pub const MIN_CHASSIS_VERTICES: usize = 4;
pub const MAX_CHASSIS_VERTICES: usize = 6;
pub const MIN_CHASSIS_RADIUS: f32 = 0.5;
pub const MAX_CHASSIS_RADIUS: f32 = 1.0;

// Wheel
pub const NUM_WHEELS: usize = 3;
pub const MIN_WHEEL_RADIUS: f32 = 0.1;
pub const MAX_WHEEL_RADIUS: f32 = 0.6;
pub const MIN_INITIAL_WHEEL_RADIUS: f32 = 0.2;
pub const MAX_INITIAL_WHEEL_RADIUS: f32 = 0.5;
pub const MIN_WHEEL_MOUNT_DISTANCE: f32 = 0.8;
pub const MAX_WHEEL_MOUNT_DISTANCE: f32 = 1.2;
pub const MAX_WHEEL_ANGLE_JITTER: f32 = 0.5;

// --- Gene Structs ---

/// Polygon outline of the vehicle body, in chassis-local coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChassisGenes {
    pub vertices: Vec<Point2<f32>>,
}

impl ChassisGenes {
    /// Vertices on a jittered circle at equal angular spacing, so the outline
    /// never self-intersects.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let count = rng.gen_range(MIN_CHASSIS_VERTICES..=MAX_CHASSIS_VERTICES);
        let vertices = (0..count)
            .map(|i| {
                let angle = i as f32 / count as f32 * TAU;
                polar(angle, random_chassis_radius(rng))
            })
            .collect();
        Self { vertices }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WheelGenes {
    pub position: Point2<f32>, // Mount point relative to the chassis origin
    pub radius: f32,
}

impl WheelGenes {
    /// Random wheel mounted around the chassis at roughly `slot * 120°`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, slot: usize) -> Self {
        let angle = slot as f32 / NUM_WHEELS as f32 * TAU + rng.gen_range(0.0..MAX_WHEEL_ANGLE_JITTER);
        let distance = rng.gen_range(MIN_WHEEL_MOUNT_DISTANCE..=MAX_WHEEL_MOUNT_DISTANCE);
        Self {
            position: polar(angle, distance),
            radius: rng.gen_range(MIN_INITIAL_WHEEL_RADIUS..=MAX_INITIAL_WHEEL_RADIUS),
        }
    }
}

// --- Gene ---

/// The evolvable description of one vehicle. The wheel count is fixed by the
/// array type; only the chassis outline may change length (within 4..=6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleGene {
    pub chassis: ChassisGenes,
    pub wheels: [WheelGenes; NUM_WHEELS],
}

impl VehicleGene {
    pub fn new_random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let chassis = ChassisGenes::random(rng);
        let wheels = std::array::from_fn(|slot| WheelGenes::random(rng, slot));
        Self { chassis, wheels }
    }

    /// True when the gene satisfies every structural bound the operators maintain.
    pub fn is_within_bounds(&self) -> bool {
        let count = self.chassis.vertex_count();
        (MIN_CHASSIS_VERTICES..=MAX_CHASSIS_VERTICES).contains(&count)
            && self
                .wheels
                .iter()
                .all(|w| (MIN_WHEEL_RADIUS..=MAX_WHEEL_RADIUS).contains(&w.radius))
    }
}

pub(crate) fn random_chassis_radius<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    rng.gen_range(MIN_CHASSIS_RADIUS..=MAX_CHASSIS_RADIUS)
}

pub(crate) fn polar(angle: f32, radius: f32) -> Point2<f32> {
    Point2::new(angle.cos() * radius, angle.sin() * radius)
}
