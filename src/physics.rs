//! Rigid-body engine contract and its rapier2d implementation.
//!
//! Everything above this module talks to physics only through [`PhysicsEngine`],
//! so the world adapter and the orchestrator never depend on rapier types.

use nalgebra::{Point2, Vector2};
use rapier2d::prelude::{
    vector, BroadPhase, CCDSolver, ColliderBuilder, ColliderSet, ImpulseJointHandle,
    ImpulseJointSet, IntegrationParameters, InteractionGroups, IslandManager, JointAxis,
    MotorModel, MultibodyJointSet, NarrowPhase, PhysicsPipeline, QueryPipeline,
    RevoluteJointBuilder, RigidBodyBuilder, RigidBodyHandle, RigidBodySet,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;

// --- Collision Groups ---
pub const GROUP_VEHICLE: u32 = 1 << 0; // 0b00000001
pub const GROUP_GROUND: u32 = 1 << 1; // 0b00000010
// Vehicles only touch the terrain: they pass through each other, and a chassis
// never touches its own wheels. Default all-pairs filtering would let them collide.
pub const VEHICLE_FILTER: u32 = GROUP_GROUND;
pub const GROUND_FILTER: u32 = GROUP_VEHICLE; // Ground collides with vehicles

// Velocity motor gain: how hard a joint pushes towards its target speed before
// hitting the torque cap.
const MOTOR_RESPONSE: f32 = 10.0;

// Hulls at or below this area are treated as degenerate.
const MIN_HULL_AREA: f32 = 1e-6;

// --- Physics Parameters ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub density: f32,
    pub friction: f32,
    pub restitution: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsParameters {
    pub gravity: f32,
    pub terrain_friction: f32,
    pub chassis: Material,
    pub wheel: Material,
    pub motor_max_torque: f32,
    pub solver_iterations: usize,
    /// Where every vehicle's chassis origin starts, as x plus clearance above the ground.
    pub spawn_x: f32,
    pub spawn_clearance: f32,
}

impl Default for PhysicsParameters {
    fn default() -> Self {
        Self {
            gravity: -9.8,
            terrain_friction: 0.5,
            chassis: Material {
                density: 5.0,
                friction: 0.5,
                restitution: 0.2,
            },
            wheel: Material {
                density: 1.0,
                friction: 0.9,
                restitution: 0.1,
            },
            motor_max_torque: 10.0,
            solver_iterations: 8,
            spawn_x: 0.0,
            spawn_clearance: 2.0,
        }
    }
}

// === Engine Contract ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDef {
    pub kind: BodyKind,
    pub position: Point2<f32>,
    pub can_sleep: bool,
}

impl BodyDef {
    pub fn fixed(position: Point2<f32>) -> Self {
        Self {
            kind: BodyKind::Static,
            position,
            can_sleep: true,
        }
    }

    /// Dynamic body that never falls asleep.
    pub fn awake_dynamic(position: Point2<f32>) -> Self {
        Self {
            kind: BodyKind::Dynamic,
            position,
            can_sleep: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionLayer {
    Terrain,
    Vehicle,
}

/// Shape data in body-local coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeDef {
    Polygon(Vec<Point2<f32>>),
    Circle { radius: f32 },
    /// Open edge strip.
    Chain(Vec<Point2<f32>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureDef {
    pub shape: ShapeDef,
    pub material: Material,
    pub layer: CollisionLayer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorDef {
    pub target_speed: f32,
    pub max_torque: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pose {
    pub position: Point2<f32>,
    pub angle: f32,
}

impl Pose {
    pub fn transform_point(&self, local: &Point2<f32>) -> Point2<f32> {
        let (sin, cos) = self.angle.sin_cos();
        Point2::new(
            self.position.x + local.x * cos - local.y * sin,
            self.position.y + local.x * sin + local.y * cos,
        )
    }
}

/// What the simulation needs from a rigid-body solver.
///
/// Angular speeds follow the usual y-up convention: positive is
/// counter-clockwise. Operations on handles that no longer exist are no-ops.
pub trait PhysicsEngine {
    type Body: Copy + Eq + Hash + fmt::Debug;
    type Joint: Copy + Eq + fmt::Debug;

    /// Creates an empty world.
    fn new_world(gravity: Vector2<f32>, solver_iterations: usize) -> Self
    where
        Self: Sized;

    fn create_body(&mut self, def: &BodyDef) -> Self::Body;

    /// Attaches a shape. Returns `false` when the engine cannot build it (for
    /// example a polygon whose hull is degenerate) or the body is unknown.
    fn attach_fixture(&mut self, body: Self::Body, fixture: &FixtureDef) -> bool;

    /// Motorised revolute joint pinning `a` and `b` together at `world_anchor`.
    fn create_revolute_joint(
        &mut self,
        a: Self::Body,
        b: Self::Body,
        world_anchor: Point2<f32>,
        motor: &MotorDef,
    ) -> Option<Self::Joint>;

    fn set_motor_speed(&mut self, joint: Self::Joint, speed: f32);

    fn step(&mut self, dt: f32);

    fn destroy_joint(&mut self, joint: Self::Joint);

    /// Removes the body together with its fixtures and attached joints.
    fn destroy_body(&mut self, body: Self::Body);

    fn body_pose(&self, body: Self::Body) -> Option<Pose>;

    fn body_shapes(&self, body: Self::Body) -> Vec<ShapeDef>;
}

// === Rapier Backend ===

pub struct RapierEngine {
    gravity: Vector2<f32>,
    integration_parameters: IntegrationParameters,
    physics_pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
}

impl RapierEngine {
    pub fn body_count(&self) -> usize {
        self.rigid_body_set.len()
    }

    pub fn joint_count(&self) -> usize {
        self.impulse_joint_set.len()
    }
}

fn interaction_groups(layer: CollisionLayer) -> InteractionGroups {
    match layer {
        CollisionLayer::Terrain => InteractionGroups::new(GROUP_GROUND.into(), GROUND_FILTER.into()),
        CollisionLayer::Vehicle => InteractionGroups::new(GROUP_VEHICLE.into(), VEHICLE_FILTER.into()),
    }
}

/// Convex hull collider of `points`, or `None` when the hull has no area.
fn hull_builder(points: &[Point2<f32>]) -> Option<ColliderBuilder> {
    let builder = ColliderBuilder::convex_hull(points)?;
    let hull = builder.shape.as_convex_polygon()?.points();
    if hull.len() < 3 || polygon_area(hull) <= MIN_HULL_AREA {
        return None;
    }
    Some(builder)
}

pub(crate) fn polygon_area(points: &[Point2<f32>]) -> f32 {
    let n = points.len();
    let twice: f32 = (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum();
    (twice / 2.0).abs()
}

impl PhysicsEngine for RapierEngine {
    type Body = RigidBodyHandle;
    type Joint = ImpulseJointHandle;

    fn new_world(gravity: Vector2<f32>, solver_iterations: usize) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.num_solver_iterations =
            NonZeroUsize::new(solver_iterations).unwrap_or(NonZeroUsize::MIN);

        Self {
            gravity,
            integration_parameters,
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
        }
    }

    fn create_body(&mut self, def: &BodyDef) -> RigidBodyHandle {
        let builder = match def.kind {
            BodyKind::Static => RigidBodyBuilder::fixed(),
            BodyKind::Dynamic => RigidBodyBuilder::dynamic(),
        };
        let body = builder
            .translation(vector![def.position.x, def.position.y])
            .can_sleep(def.can_sleep)
            .build();
        self.rigid_body_set.insert(body)
    }

    fn attach_fixture(&mut self, body: RigidBodyHandle, fixture: &FixtureDef) -> bool {
        if self.rigid_body_set.get(body).is_none() {
            return false;
        }
        let builder = match &fixture.shape {
            ShapeDef::Polygon(points) => match hull_builder(points) {
                Some(builder) => builder,
                None => return false,
            },
            ShapeDef::Circle { radius } => ColliderBuilder::ball(*radius),
            ShapeDef::Chain(points) if points.len() >= 2 => ColliderBuilder::polyline(points.clone(), None),
            ShapeDef::Chain(_) => return false,
        };
        let collider = builder
            .density(fixture.material.density)
            .friction(fixture.material.friction)
            .restitution(fixture.material.restitution)
            .collision_groups(interaction_groups(fixture.layer))
            .build();
        self.collider_set
            .insert_with_parent(collider, body, &mut self.rigid_body_set);
        true
    }

    fn create_revolute_joint(
        &mut self,
        a: RigidBodyHandle,
        b: RigidBodyHandle,
        world_anchor: Point2<f32>,
        motor: &MotorDef,
    ) -> Option<ImpulseJointHandle> {
        let anchor1 = self.rigid_body_set.get(a)?.position().inverse_transform_point(&world_anchor);
        let anchor2 = self.rigid_body_set.get(b)?.position().inverse_transform_point(&world_anchor);

        let joint = RevoluteJointBuilder::new()
            .local_anchor1(anchor1)
            .local_anchor2(anchor2)
            .contacts_enabled(false)
            .motor_model(MotorModel::ForceBased)
            .motor_velocity(motor.target_speed, MOTOR_RESPONSE)
            .motor_max_force(motor.max_torque);
        Some(self.impulse_joint_set.insert(a, b, joint, true))
    }

    fn set_motor_speed(&mut self, joint: ImpulseJointHandle, speed: f32) {
        if let Some(joint) = self.impulse_joint_set.get_mut(joint) {
            joint
                .data
                .set_motor_velocity(JointAxis::AngX, speed, MOTOR_RESPONSE);
        }
    }

    fn step(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(), // Hooks, not used here
            &(), // Event handler, not used here
        );
    }

    fn destroy_joint(&mut self, joint: ImpulseJointHandle) {
        self.impulse_joint_set.remove(joint, true);
    }

    fn destroy_body(&mut self, body: RigidBodyHandle) {
        self.rigid_body_set.remove(
            body,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
    }

    fn body_pose(&self, body: RigidBodyHandle) -> Option<Pose> {
        self.rigid_body_set.get(body).map(|rb| Pose {
            position: Point2::new(rb.translation().x, rb.translation().y),
            angle: rb.rotation().angle(),
        })
    }

    fn body_shapes(&self, body: RigidBodyHandle) -> Vec<ShapeDef> {
        let Some(rb) = self.rigid_body_set.get(body) else {
            return Vec::new();
        };
        rb.colliders()
            .iter()
            .filter_map(|handle| self.collider_set.get(*handle))
            .filter_map(|collider| {
                let shape = collider.shape();
                if let Some(ball) = shape.as_ball() {
                    Some(ShapeDef::Circle { radius: ball.radius })
                } else if let Some(polygon) = shape.as_convex_polygon() {
                    Some(ShapeDef::Polygon(polygon.points().to_vec()))
                } else if let Some(polyline) = shape.as_polyline() {
                    Some(ShapeDef::Chain(polyline.vertices().to_vec()))
                } else {
                    shape.as_cuboid().map(|cuboid| {
                        let h = cuboid.half_extents;
                        ShapeDef::Polygon(vec![
                            Point2::new(-h.x, -h.y),
                            Point2::new(h.x, -h.y),
                            Point2::new(h.x, h.y),
                            Point2::new(-h.x, h.y),
                        ])
                    })
                }
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted engine for exercising orchestration without a real solver.
    //!
    //! Each step moves a body that owns motorised joints (the chassis) along x
    //! by `-speed * dt * FAKE_TRACTION` per joint, so a negative (clockwise)
    //! motor speed rolls forward like a real wheel would.

    use super::*;
    use std::collections::HashMap;

    pub const FAKE_TRACTION: f32 = 0.05;

    #[derive(Debug, Clone)]
    pub struct FakeBody {
        pub def: BodyDef,
        pub pose: Pose,
        pub shapes: Vec<ShapeDef>,
    }

    #[derive(Debug, Clone)]
    pub struct FakeJoint {
        pub a: u32,
        pub b: u32,
        pub anchor: Point2<f32>,
        pub speed: f32,
        pub max_torque: f32,
    }

    #[derive(Debug, Default)]
    pub struct FakeEngine {
        pub gravity: Vector2<f32>,
        pub solver_iterations: usize,
        pub bodies: HashMap<u32, FakeBody>,
        pub joints: HashMap<u32, FakeJoint>,
        pub steps: Vec<f32>,
        /// Polygons with fewer points than this are rejected like a degenerate hull.
        pub min_polygon_points: usize,
        next_handle: u32,
    }

    impl FakeEngine {
        fn next(&mut self) -> u32 {
            self.next_handle += 1;
            self.next_handle
        }

        pub fn dynamic_body_count(&self) -> usize {
            self.bodies.values().filter(|b| b.def.kind == BodyKind::Dynamic).count()
        }
    }

    impl PhysicsEngine for FakeEngine {
        type Body = u32;
        type Joint = u32;

        fn new_world(gravity: Vector2<f32>, solver_iterations: usize) -> Self {
            Self {
                gravity,
                solver_iterations,
                min_polygon_points: 3,
                ..Self::default()
            }
        }

        fn create_body(&mut self, def: &BodyDef) -> u32 {
            let handle = self.next();
            self.bodies.insert(
                handle,
                FakeBody {
                    def: *def,
                    pose: Pose {
                        position: def.position,
                        angle: 0.0,
                    },
                    shapes: Vec::new(),
                },
            );
            handle
        }

        fn attach_fixture(&mut self, body: u32, fixture: &FixtureDef) -> bool {
            if let ShapeDef::Polygon(points) = &fixture.shape {
                if points.len() < self.min_polygon_points {
                    return false;
                }
            }
            match self.bodies.get_mut(&body) {
                Some(b) => {
                    b.shapes.push(fixture.shape.clone());
                    true
                }
                None => false,
            }
        }

        fn create_revolute_joint(&mut self, a: u32, b: u32, world_anchor: Point2<f32>, motor: &MotorDef) -> Option<u32> {
            if !self.bodies.contains_key(&a) || !self.bodies.contains_key(&b) {
                return None;
            }
            let handle = self.next();
            self.joints.insert(
                handle,
                FakeJoint {
                    a,
                    b,
                    anchor: world_anchor,
                    speed: motor.target_speed,
                    max_torque: motor.max_torque,
                },
            );
            Some(handle)
        }

        fn set_motor_speed(&mut self, joint: u32, speed: f32) {
            if let Some(j) = self.joints.get_mut(&joint) {
                j.speed = speed;
            }
        }

        fn step(&mut self, dt: f32) {
            self.steps.push(dt);
            let pushes: Vec<(u32, f32)> = self.joints.values().map(|j| (j.a, -j.speed * dt * FAKE_TRACTION)).collect();
            for (body, dx) in pushes {
                if let Some(b) = self.bodies.get_mut(&body) {
                    b.pose.position.x += dx;
                }
            }
        }

        fn destroy_joint(&mut self, joint: u32) {
            self.joints.remove(&joint);
        }

        fn destroy_body(&mut self, body: u32) {
            self.bodies.remove(&body);
            self.joints.retain(|_, j| j.a != body && j.b != body);
        }

        fn body_pose(&self, body: u32) -> Option<Pose> {
            self.bodies.get(&body).map(|b| b.pose)
        }

        fn body_shapes(&self, body: u32) -> Vec<ShapeDef> {
            self.bodies.get(&body).map(|b| b.shapes.clone()).unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> RapierEngine {
        RapierEngine::new_world(Vector2::new(0.0, -9.8), 8)
    }

    fn material() -> Material {
        PhysicsParameters::default().wheel
    }

    #[test]
    fn dynamic_ball_falls_onto_chain_ground() {
        let mut engine = world();
        let ground = engine.create_body(&BodyDef::fixed(Point2::origin()));
        assert!(engine.attach_fixture(
            ground,
            &FixtureDef {
                shape: ShapeDef::Chain(vec![Point2::new(-10.0, 0.0), Point2::new(10.0, 0.0)]),
                material: material(),
                layer: CollisionLayer::Terrain,
            }
        ));
        let ball = engine.create_body(&BodyDef::awake_dynamic(Point2::new(0.0, 3.0)));
        assert!(engine.attach_fixture(
            ball,
            &FixtureDef {
                shape: ShapeDef::Circle { radius: 0.5 },
                material: material(),
                layer: CollisionLayer::Vehicle,
            }
        ));

        for _ in 0..240 {
            engine.step(1.0 / 60.0);
        }
        let pose = engine.body_pose(ball).unwrap();
        assert!(pose.position.y < 3.0, "ball should fall");
        assert!(pose.position.y > 0.0, "ball should rest on the ground, got {}", pose.position.y);
    }

    #[test]
    fn vehicle_bodies_pass_through_each_other() {
        let mut engine = world();
        let ground = engine.create_body(&BodyDef::fixed(Point2::origin()));
        assert!(engine.attach_fixture(
            ground,
            &FixtureDef {
                shape: ShapeDef::Chain(vec![Point2::new(-10.0, 0.0), Point2::new(10.0, 0.0)]),
                material: material(),
                layer: CollisionLayer::Terrain,
            }
        ));
        let balls: Vec<_> = [1.0, 3.0]
            .into_iter()
            .map(|y| {
                let ball = engine.create_body(&BodyDef::awake_dynamic(Point2::new(0.0, y)));
                assert!(engine.attach_fixture(
                    ball,
                    &FixtureDef {
                        shape: ShapeDef::Circle { radius: 0.5 },
                        material: material(),
                        layer: CollisionLayer::Vehicle,
                    }
                ));
                ball
            })
            .collect();

        for _ in 0..240 {
            engine.step(1.0 / 60.0);
        }
        // Stacked balls would leave the upper one near y = 1.5.
        for ball in balls {
            let y = engine.body_pose(ball).unwrap().position.y;
            assert!(y > 0.0 && y < 1.0, "ball should rest on the ground, got {y}");
        }
    }

    #[test]
    fn shapes_can_be_read_back() {
        let mut engine = world();
        let body = engine.create_body(&BodyDef::awake_dynamic(Point2::new(1.0, 1.0)));
        let square = vec![
            Point2::new(-0.5, -0.5),
            Point2::new(0.5, -0.5),
            Point2::new(0.5, 0.5),
            Point2::new(-0.5, 0.5),
        ];
        assert!(engine.attach_fixture(
            body,
            &FixtureDef {
                shape: ShapeDef::Polygon(square),
                material: material(),
                layer: CollisionLayer::Vehicle,
            }
        ));
        let shapes = engine.body_shapes(body);
        assert_eq!(shapes.len(), 1);
        match &shapes[0] {
            ShapeDef::Polygon(points) => assert_eq!(points.len(), 4),
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn degenerate_polygon_is_rejected() {
        let mut engine = world();
        let body = engine.create_body(&BodyDef::awake_dynamic(Point2::origin()));
        let line = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(2.0, 0.0)];
        assert!(!engine.attach_fixture(
            body,
            &FixtureDef {
                shape: ShapeDef::Polygon(line),
                material: material(),
                layer: CollisionLayer::Vehicle,
            }
        ));
    }

    #[test]
    fn concave_outline_becomes_its_hull() {
        let mut engine = world();
        let body = engine.create_body(&BodyDef::awake_dynamic(Point2::origin()));
        let dented = vec![
            Point2::new(1.0, 0.0),
            Point2::new(0.0, 1.0),
            Point2::new(-1.0, 0.0),
            Point2::new(0.0, -1.0),
            Point2::new(0.0, 0.0),
        ];
        assert!(engine.attach_fixture(
            body,
            &FixtureDef {
                shape: ShapeDef::Polygon(dented),
                material: material(),
                layer: CollisionLayer::Vehicle,
            }
        ));
        match &engine.body_shapes(body)[0] {
            ShapeDef::Polygon(points) => {
                assert_eq!(points.len(), 4);
                assert!((polygon_area(points) - 2.0).abs() < 1e-4);
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn polygon_area_ignores_winding() {
        let ccw = [Point2::new(0.0, 0.0), Point2::new(2.0, 0.0), Point2::new(0.0, 1.0)];
        let cw = [ccw[0], ccw[2], ccw[1]];
        assert_eq!(polygon_area(&ccw), 1.0);
        assert_eq!(polygon_area(&cw), 1.0);
        assert_eq!(polygon_area(&[Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(2.0, 0.0)]), 0.0);
    }

    #[test]
    fn destroying_a_body_drops_its_joints() {
        let mut engine = world();
        let a = engine.create_body(&BodyDef::awake_dynamic(Point2::origin()));
        let b = engine.create_body(&BodyDef::awake_dynamic(Point2::new(1.0, 0.0)));
        let motor = MotorDef {
            target_speed: 0.0,
            max_torque: 10.0,
        };
        assert!(engine.create_revolute_joint(a, b, Point2::new(1.0, 0.0), &motor).is_some());
        assert_eq!(engine.joint_count(), 1);

        engine.destroy_body(b);
        assert_eq!(engine.joint_count(), 0);
        assert_eq!(engine.body_count(), 1);
        // Stale handles are ignored.
        engine.destroy_body(b);
        assert!(engine.body_pose(b).is_none());
        assert!(engine.body_shapes(b).is_empty());
    }

    #[test]
    fn pose_transforms_local_points() {
        let pose = Pose {
            position: Point2::new(2.0, 1.0),
            angle: std::f32::consts::FRAC_PI_2,
        };
        let p = pose.transform_point(&Point2::new(1.0, 0.0));
        assert!((p - Point2::new(2.0, 2.0)).norm() < 1e-5);
    }
}
