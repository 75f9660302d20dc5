//! Render-ready views of a running generation.
//!
//! Nothing here draws. A UI turns these into pixels using `pixels_per_unit`.

use crate::evolution::IndividualId;
use crate::track::TrackDescription;
use nalgebra::Point2;
use serde::Serialize;

/// World units to screen pixels.
pub const PIXELS_PER_UNIT: f32 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChassisSnapshot {
    pub position: Point2<f32>,
    pub angle: f32,
    /// Body-local outline, as the physics engine holds it.
    pub vertices: Vec<Point2<f32>>,
}

impl ChassisSnapshot {
    pub fn world_vertices(&self) -> Vec<Point2<f32>> {
        let (sin, cos) = self.angle.sin_cos();
        self.vertices
            .iter()
            .map(|v| {
                Point2::new(
                    self.position.x + v.x * cos - v.y * sin,
                    self.position.y + v.x * sin + v.y * cos,
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WheelSnapshot {
    pub position: Point2<f32>,
    pub angle: f32,
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleBodySnapshot {
    pub chassis: ChassisSnapshot,
    pub wheels: Vec<WheelSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleSnapshot {
    pub id: IndividualId,
    pub elite: bool,
    pub best: bool,
    pub highlight: bool,
    pub fitness: f32,
    pub distance: f32,
    #[serde(flatten)]
    pub body: VehicleBodySnapshot,
}

/// Track outline in world units, read back from the physics world.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackRender {
    pub ground: Vec<Point2<f32>>,
    pub obstacles: Vec<Vec<Point2<f32>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSnapshot {
    pub generation: usize,
    pub vehicles: Vec<VehicleSnapshot>,
    pub track: TrackDescription,
    pub track_render: TrackRender,
    pub pixels_per_unit: f32,
}

impl GenerationSnapshot {
    /// Frontmost chassis x.
    pub fn leader_x(&self) -> Option<f32> {
        self.vehicles
            .iter()
            .map(|v| v.body.chassis.position.x)
            .max_by(f32::total_cmp)
    }
}
