//! Crossover and mutation over [`VehicleGene`]s.

use crate::organism::{
    polar, random_chassis_radius, VehicleGene, MAX_CHASSIS_VERTICES, MAX_WHEEL_RADIUS,
    MIN_CHASSIS_VERTICES, MIN_WHEEL_RADIUS,
};
use nalgebra::Point2;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use std::f32::consts::TAU;

/// Per-axis noise added to a mutated chassis vertex or wheel mount.
pub const POSITION_NOISE: f32 = 0.15;
/// Noise added to a mutated wheel radius before clamping.
pub const RADIUS_NOISE: f32 = 0.1;
/// Structural (add/remove vertex) mutations fire at `rate * STRUCTURAL_FACTOR`.
pub const STRUCTURAL_FACTOR: f64 = 0.1;

/// Component-wise uniform crossover.
///
/// The chassis comes wholesale from one parent since outlines of different
/// lengths cannot be blended point by point. Every wheel field (position and
/// radius) is drawn independently from either parent, so the child never holds
/// a value that neither parent had.
pub fn crossover<R: Rng + ?Sized>(parent1: &VehicleGene, parent2: &VehicleGene, rng: &mut R) -> VehicleGene {
    let chassis = if rng.gen_bool(0.5) {
        parent1.chassis.clone()
    } else {
        parent2.chassis.clone()
    };

    let mut wheels = parent1.wheels;
    for (i, wheel) in wheels.iter_mut().enumerate() {
        if rng.gen_bool(0.5) {
            wheel.position = parent2.wheels[i].position;
        }
        if rng.gen_bool(0.5) {
            wheel.radius = parent2.wheels[i].radius;
        }
    }

    VehicleGene { chassis, wheels }
}

/// A rate usable as a probability. Non-finite rates count as 0.
pub fn clamp_rate(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Returns a mutated copy of `gene`. A `rate` of 0 returns an identical gene.
pub fn mutate<R: Rng + ?Sized>(gene: &VehicleGene, rate: f64, rng: &mut R) -> VehicleGene {
    let rate = clamp_rate(rate);
    let mut mutated = gene.clone();
    let position_noise = Uniform::new_inclusive(-POSITION_NOISE, POSITION_NOISE);
    let radius_noise = Uniform::new_inclusive(-RADIUS_NOISE, RADIUS_NOISE);

    for vertex in &mut mutated.chassis.vertices {
        if rng.gen_bool(rate) {
            jitter(vertex, &position_noise, rng);
        }
    }

    if rng.gen_bool(rate * STRUCTURAL_FACTOR) {
        let vertices = &mut mutated.chassis.vertices;
        if vertices.len() < MAX_CHASSIS_VERTICES && rng.gen_bool(0.5) {
            let angle = rng.gen_range(0.0..TAU);
            vertices.push(polar(angle, random_chassis_radius(rng)));
        } else if vertices.len() > MIN_CHASSIS_VERTICES {
            let idx = rng.gen_range(0..vertices.len());
            vertices.remove(idx);
        }
    }

    for wheel in &mut mutated.wheels {
        if rng.gen_bool(rate) {
            jitter(&mut wheel.position, &position_noise, rng);
        }
    }

    for wheel in &mut mutated.wheels {
        if rng.gen_bool(rate) {
            let radius = wheel.radius + radius_noise.sample(rng);
            wheel.radius = radius.clamp(MIN_WHEEL_RADIUS, MAX_WHEEL_RADIUS);
        }
    }

    mutated
}

fn jitter<R: Rng + ?Sized>(point: &mut Point2<f32>, noise: &Uniform<f32>, rng: &mut R) {
    point.x += noise.sample(rng);
    point.y += noise.sample(rng);
}
