//! Physics world adapter: turns tracks and genes into engine bodies and reads
//! the results back.

use crate::evolution::IndividualId;
use crate::organism::{VehicleGene, NUM_WHEELS};
use crate::physics::{
    BodyDef, CollisionLayer, FixtureDef, Material, MotorDef, PhysicsEngine, PhysicsParameters, ShapeDef,
};
use crate::track::TrackDescription;
use crate::visualization::{ChassisSnapshot, TrackRender, VehicleBodySnapshot, WheelSnapshot};
use bevy::log::{trace, warn};
use nalgebra::{Point2, Vector2};
use std::collections::HashMap;

/// Half extent of the box used when a chassis outline has no usable hull.
pub const FALLBACK_CHASSIS_HALF_EXTENT: f32 = 0.25;

struct VehicleBodies<E: PhysicsEngine> {
    chassis: E::Body,
    wheels: Vec<E::Body>,
    joints: Vec<E::Joint>,
    start_x: f32,
}

pub struct PhysicsWorld<E: PhysicsEngine> {
    engine: E,
    params: PhysicsParameters,
    ground: Option<E::Body>,
    obstacles: Vec<E::Body>,
    vehicles: HashMap<IndividualId, VehicleBodies<E>>,
    elapsed: f64,
}

impl<E: PhysicsEngine> PhysicsWorld<E> {
    /// Empty world with the given parameters. Call [`Self::build_track`] next.
    pub fn new(params: PhysicsParameters) -> Self {
        Self {
            engine: new_engine::<E>(&params),
            params,
            ground: None,
            obstacles: Vec::new(),
            vehicles: HashMap::new(),
            elapsed: 0.0,
        }
    }

    pub fn params(&self) -> &PhysicsParameters {
        &self.params
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Adds the static course. Any previously built course is removed first.
    pub fn build_track(&mut self, track: &TrackDescription) {
        self.remove_track();

        let terrain = Material {
            density: 0.0,
            friction: self.params.terrain_friction,
            restitution: 0.0,
        };

        let ground = self.engine.create_body(&BodyDef::fixed(Point2::origin()));
        let built = self.engine.attach_fixture(
            ground,
            &FixtureDef {
                shape: ShapeDef::Chain(track.ground.clone()),
                material: terrain,
                layer: CollisionLayer::Terrain,
            },
        );
        if !built {
            warn!("Ground profile with {} points could not be built", track.ground.len());
        }
        self.ground = Some(ground);

        for obstacle in &track.obstacles {
            let body = self.engine.create_body(&BodyDef::fixed(obstacle.position));
            self.engine.attach_fixture(
                body,
                &FixtureDef {
                    shape: ShapeDef::Polygon(obstacle.local_vertices()),
                    material: terrain,
                    layer: CollisionLayer::Terrain,
                },
            );
            self.obstacles.push(body);
        }
    }

    /// Spawns the chassis and three motorised wheels for `id` with the chassis
    /// origin at `spawn`. An existing vehicle with the same id is replaced.
    pub fn add_vehicle(&mut self, id: IndividualId, gene: &VehicleGene, spawn: Point2<f32>) {
        self.remove_vehicle(id);

        let chassis = self.engine.create_body(&BodyDef::awake_dynamic(spawn));
        let hull = FixtureDef {
            shape: ShapeDef::Polygon(gene.chassis.vertices.clone()),
            material: self.params.chassis,
            layer: CollisionLayer::Vehicle,
        };
        if !self.engine.attach_fixture(chassis, &hull) {
            warn!("Chassis of {} is degenerate, using a fallback box", id);
            self.engine.attach_fixture(
                chassis,
                &FixtureDef {
                    shape: ShapeDef::Polygon(fallback_box()),
                    ..hull
                },
            );
        }

        let motor = MotorDef {
            target_speed: 0.0,
            max_torque: self.params.motor_max_torque,
        };
        let mut wheels = Vec::with_capacity(NUM_WHEELS);
        let mut joints = Vec::with_capacity(NUM_WHEELS);
        for wheel in &gene.wheels {
            let anchor = spawn + wheel.position.coords;
            let body = self.engine.create_body(&BodyDef::awake_dynamic(anchor));
            self.engine.attach_fixture(
                body,
                &FixtureDef {
                    shape: ShapeDef::Circle { radius: wheel.radius },
                    material: self.params.wheel,
                    layer: CollisionLayer::Vehicle,
                },
            );
            if let Some(joint) = self.engine.create_revolute_joint(chassis, body, anchor, &motor) {
                joints.push(joint);
            }
            wheels.push(body);
        }

        self.vehicles.insert(
            id,
            VehicleBodies {
                chassis,
                wheels,
                joints,
                start_x: spawn.x,
            },
        );
    }

    /// Sets every wheel motor of `id`. Positive values roll the vehicle towards +x.
    pub fn set_motor_speed(&mut self, id: IndividualId, value: f32) {
        let Some(vehicle) = self.vehicles.get(&id) else {
            return;
        };
        // Clockwise wheel spin moves forward in a y-up world.
        for joint in &vehicle.joints {
            self.engine.set_motor_speed(*joint, -value);
        }
    }

    pub fn step(&mut self, dt: f32) {
        self.engine.step(dt);
        self.elapsed += f64::from(dt);
        trace!("Physics stepped by {dt}, elapsed {:.4}", self.elapsed);
    }

    /// Physics seconds stepped since the last reset.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Chassis x travelled since spawning. Unknown ids report 0.
    pub fn displacement_of(&self, id: IndividualId) -> f32 {
        self.vehicles
            .get(&id)
            .and_then(|v| self.engine.body_pose(v.chassis).map(|pose| pose.position.x - v.start_x))
            .unwrap_or(0.0)
    }

    /// Displacement of every live vehicle.
    pub fn displacements(&self) -> HashMap<IndividualId, f32> {
        self.vehicles.keys().map(|id| (*id, self.displacement_of(*id))).collect()
    }

    pub fn position_of(&self, id: IndividualId) -> Option<Point2<f32>> {
        let vehicle = self.vehicles.get(&id)?;
        self.engine.body_pose(vehicle.chassis).map(|pose| pose.position)
    }

    pub fn angle_of(&self, id: IndividualId) -> Option<f32> {
        let vehicle = self.vehicles.get(&id)?;
        self.engine.body_pose(vehicle.chassis).map(|pose| pose.angle)
    }

    /// Current chassis and wheel state of `id`, read from the engine.
    pub fn snapshot(&self, id: IndividualId) -> Option<VehicleBodySnapshot> {
        let vehicle = self.vehicles.get(&id)?;
        let pose = self.engine.body_pose(vehicle.chassis)?;
        let vertices = self
            .engine
            .body_shapes(vehicle.chassis)
            .into_iter()
            .find_map(|shape| match shape {
                ShapeDef::Polygon(points) => Some(points),
                _ => None,
            })
            .unwrap_or_default();

        let wheels = vehicle
            .wheels
            .iter()
            .filter_map(|body| {
                let pose = self.engine.body_pose(*body)?;
                let radius = self.engine.body_shapes(*body).into_iter().find_map(|shape| match shape {
                    ShapeDef::Circle { radius } => Some(radius),
                    _ => None,
                })?;
                Some(WheelSnapshot {
                    position: pose.position,
                    angle: pose.angle,
                    radius,
                })
            })
            .collect();

        Some(VehicleBodySnapshot {
            chassis: ChassisSnapshot {
                position: pose.position,
                angle: pose.angle,
                vertices,
            },
            wheels,
        })
    }

    /// Track geometry in world units as the engine holds it.
    pub fn track_render(&self) -> TrackRender {
        let ground = self
            .ground
            .map(|body| {
                let pose = self.engine.body_pose(body);
                self.engine
                    .body_shapes(body)
                    .into_iter()
                    .find_map(|shape| match shape {
                        ShapeDef::Chain(points) => Some(points),
                        _ => None,
                    })
                    .map(|points| match pose {
                        Some(pose) => points.iter().map(|p| pose.transform_point(p)).collect(),
                        None => points,
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default();

        let obstacles = self
            .obstacles
            .iter()
            .filter_map(|body| {
                let pose = self.engine.body_pose(*body)?;
                self.engine.body_shapes(*body).into_iter().find_map(|shape| match shape {
                    ShapeDef::Polygon(points) => Some(points.iter().map(|p| pose.transform_point(p)).collect()),
                    _ => None,
                })
            })
            .collect();

        TrackRender { ground, obstacles }
    }

    pub fn remove_vehicle(&mut self, id: IndividualId) {
        if let Some(vehicle) = self.vehicles.remove(&id) {
            self.destroy_vehicle(vehicle);
        }
    }

    /// Removes every vehicle and restarts the clock. The track stays.
    pub fn reset(&mut self) {
        let vehicles: Vec<_> = self.vehicles.drain().map(|(_, v)| v).collect();
        for vehicle in vehicles {
            self.destroy_vehicle(vehicle);
        }
        self.elapsed = 0.0;
    }

    /// Replaces the whole engine with a fresh one holding only `track`.
    pub fn rebuild(&mut self, track: &TrackDescription) {
        self.engine = new_engine::<E>(&self.params);
        self.ground = None;
        self.obstacles.clear();
        self.vehicles.clear();
        self.elapsed = 0.0;
        self.build_track(track);
    }

    fn destroy_vehicle(&mut self, vehicle: VehicleBodies<E>) {
        for joint in vehicle.joints {
            self.engine.destroy_joint(joint);
        }
        for wheel in vehicle.wheels {
            self.engine.destroy_body(wheel);
        }
        self.engine.destroy_body(vehicle.chassis);
    }

    fn remove_track(&mut self) {
        if let Some(ground) = self.ground.take() {
            self.engine.destroy_body(ground);
        }
        for body in std::mem::take(&mut self.obstacles) {
            self.engine.destroy_body(body);
        }
    }
}

fn new_engine<E: PhysicsEngine>(params: &PhysicsParameters) -> E {
    E::new_world(Vector2::new(0.0, params.gravity), params.solver_iterations)
}

fn fallback_box() -> Vec<Point2<f32>> {
    let h = FALLBACK_CHASSIS_HALF_EXTENT;
    vec![
        Point2::new(-h, -h),
        Point2::new(h, -h),
        Point2::new(h, h),
        Point2::new(-h, h),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organism::{ChassisGenes, WheelGenes};
    use crate::physics::fake::{FakeEngine, FAKE_TRACTION};
    use crate::physics::{polygon_area, BodyKind, RapierEngine};
    use crate::track::{generate, TrackDifficulty};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gene() -> VehicleGene {
        VehicleGene {
            chassis: ChassisGenes {
                vertices: vec![
                    Point2::new(0.8, 0.0),
                    Point2::new(0.0, 0.6),
                    Point2::new(-0.8, 0.0),
                    Point2::new(0.0, -0.6),
                ],
            },
            wheels: [
                WheelGenes { position: Point2::new(0.8, -0.4), radius: 0.4 },
                WheelGenes { position: Point2::new(-0.8, -0.4), radius: 0.4 },
                WheelGenes { position: Point2::new(0.0, 0.6), radius: 0.2 },
            ],
        }
    }

    fn fake_world() -> PhysicsWorld<FakeEngine> {
        let mut world = PhysicsWorld::new(PhysicsParameters::default());
        let track = generate(TrackDifficulty::Medium, &mut StdRng::seed_from_u64(1));
        world.build_track(&track);
        world
    }

    #[test]
    fn engine_receives_parameters() {
        let world = fake_world();
        assert_eq!(world.engine().gravity, Vector2::new(0.0, -9.8));
        assert_eq!(world.engine().solver_iterations, 8);
    }

    #[test]
    fn track_is_static_and_rendered_back() {
        let track = generate(TrackDifficulty::Hard, &mut StdRng::seed_from_u64(4));
        let mut world: PhysicsWorld<FakeEngine> = PhysicsWorld::new(PhysicsParameters::default());
        world.build_track(&track);

        assert!(world.engine().bodies.values().all(|b| b.def.kind == BodyKind::Static));
        let render = world.track_render();
        assert_eq!(render.ground, track.ground);
        assert_eq!(render.obstacles.len(), track.obstacles.len());
        for (rendered, obstacle) in render.obstacles.iter().zip(&track.obstacles) {
            for (a, b) in rendered.iter().zip(obstacle.world_vertices()) {
                assert!((a - b).norm() < 1e-5);
            }
        }
    }

    #[test]
    fn building_the_track_twice_replaces_it() {
        let mut world = fake_world();
        let before = world.engine().bodies.len();
        let track = generate(TrackDifficulty::Medium, &mut StdRng::seed_from_u64(2));
        world.build_track(&track);
        assert_eq!(world.engine().bodies.len(), before);
    }

    #[test]
    fn add_vehicle_creates_chassis_wheels_and_motors() {
        let mut world = fake_world();
        let id = IndividualId::next();
        let spawn = Point2::new(0.0, 7.0);
        world.add_vehicle(id, &gene(), spawn);

        assert_eq!(world.vehicle_count(), 1);
        assert_eq!(world.engine().dynamic_body_count(), 1 + NUM_WHEELS);
        assert_eq!(world.engine().joints.len(), NUM_WHEELS);
        for joint in world.engine().joints.values() {
            assert_eq!(joint.max_torque, 10.0);
            assert_eq!(joint.speed, 0.0);
            let body = &world.engine().bodies[&joint.b];
            assert_eq!(body.pose.position, joint.anchor);
            assert!(!body.def.can_sleep);
        }
        assert_eq!(world.position_of(id), Some(spawn));
        assert_eq!(world.angle_of(id), Some(0.0));
    }

    #[test]
    fn positive_drive_moves_forward() {
        let mut world = fake_world();
        let id = IndividualId::next();
        world.add_vehicle(id, &gene(), Point2::new(0.0, 7.0));
        world.set_motor_speed(id, 20.0);
        for joint in world.engine().joints.values() {
            assert_eq!(joint.speed, -20.0);
        }
        world.step(0.5);
        let expected = 20.0 * 0.5 * FAKE_TRACTION * NUM_WHEELS as f32;
        assert!((world.displacement_of(id) - expected).abs() < 1e-5);
        assert_eq!(world.elapsed(), 0.5);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut world = fake_world();
        let ghost = IndividualId::next();
        world.set_motor_speed(ghost, 20.0);
        world.remove_vehicle(ghost);
        assert_eq!(world.displacement_of(ghost), 0.0);
        assert!(world.snapshot(ghost).is_none());
        assert!(world.position_of(ghost).is_none());
        assert!(world.angle_of(ghost).is_none());
    }

    #[test]
    fn degenerate_chassis_falls_back_to_a_box() {
        let mut world = fake_world();
        let id = IndividualId::next();
        let mut thin = gene();
        thin.chassis.vertices.truncate(2);
        world.add_vehicle(id, &thin, Point2::new(0.0, 7.0));

        let snapshot = world.snapshot(id).unwrap();
        assert_eq!(snapshot.chassis.vertices, fallback_box());
        assert_eq!(snapshot.wheels.len(), NUM_WHEELS);
    }

    #[test]
    fn snapshot_reports_chassis_and_wheels() {
        let mut world = fake_world();
        let id = IndividualId::next();
        let g = gene();
        world.add_vehicle(id, &g, Point2::new(1.0, 7.0));

        let snapshot = world.snapshot(id).unwrap();
        assert_eq!(snapshot.chassis.position, Point2::new(1.0, 7.0));
        assert_eq!(snapshot.chassis.vertices, g.chassis.vertices);
        let radii: Vec<f32> = snapshot.wheels.iter().map(|w| w.radius).collect();
        assert_eq!(radii, vec![0.4, 0.4, 0.2]);
    }

    #[test]
    fn reset_is_idempotent_and_keeps_the_track() {
        let mut world = fake_world();
        let track_bodies = world.engine().bodies.len();
        for _ in 0..4 {
            world.add_vehicle(IndividualId::next(), &gene(), Point2::new(0.0, 7.0));
        }
        world.step(0.25);

        world.reset();
        assert_eq!(world.vehicle_count(), 0);
        assert_eq!(world.elapsed(), 0.0);
        assert_eq!(world.engine().bodies.len(), track_bodies);
        assert!(world.engine().joints.is_empty());

        world.reset();
        assert_eq!(world.engine().bodies.len(), track_bodies);
    }

    #[test]
    fn rebuild_starts_from_a_fresh_engine() {
        let mut world = fake_world();
        world.add_vehicle(IndividualId::next(), &gene(), Point2::new(0.0, 7.0));
        world.step(0.5);

        let easy = generate(TrackDifficulty::Easy, &mut StdRng::seed_from_u64(3));
        world.rebuild(&easy);
        assert_eq!(world.vehicle_count(), 0);
        assert!(world.engine().steps.is_empty());
        assert_eq!(world.engine().bodies.len(), 1); // ground only, easy has no obstacles
        assert_eq!(world.track_render().ground, easy.ground);
    }

    #[test]
    fn rapier_flat_chassis_falls_back_to_a_box() {
        let mut world: PhysicsWorld<RapierEngine> = PhysicsWorld::new(PhysicsParameters::default());
        let id = IndividualId::next();
        let mut flat = gene();
        flat.chassis.vertices = vec![
            Point2::new(-1.0, 0.0),
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(2.0, 0.0),
        ];
        world.add_vehicle(id, &flat, Point2::new(0.0, 5.0));

        let snapshot = world.snapshot(id).unwrap();
        assert_eq!(snapshot.chassis.vertices.len(), 4);
        let side = 2.0 * FALLBACK_CHASSIS_HALF_EXTENT;
        assert!((polygon_area(&snapshot.chassis.vertices) - side * side).abs() < 1e-5);
        assert_eq!(snapshot.wheels.len(), NUM_WHEELS);
    }

    #[test]
    fn rapier_vehicle_drives_forward_on_flat_ground() {
        let track = TrackDescription {
            difficulty: TrackDifficulty::Easy,
            ground: vec![Point2::new(-20.0, 0.0), Point2::new(60.0, 0.0)],
            obstacles: Vec::new(),
        };
        let mut world: PhysicsWorld<RapierEngine> = PhysicsWorld::new(PhysicsParameters::default());
        world.build_track(&track);
        let id = IndividualId::next();
        world.add_vehicle(id, &gene(), Point2::new(0.0, 1.5));

        for _ in 0..300 {
            world.set_motor_speed(id, 20.0);
            world.step(1.0 / 60.0);
        }

        let snapshot = world.snapshot(id).unwrap();
        assert!(snapshot.chassis.position.y > -1.0, "vehicle fell through the ground");
        assert!(world.displacement_of(id) > 0.5, "moved {}", world.displacement_of(id));

        world.reset();
        assert_eq!(world.engine().joint_count(), 0);
        assert_eq!(world.engine().body_count(), 1);
    }
}
