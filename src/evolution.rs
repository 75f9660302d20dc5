use crate::operators::{clamp_rate, crossover, mutate};
use crate::organism::VehicleGene;
use crate::simulation::GaParams;
use bevy::log::{debug, info};
use rand::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// Global counter for unique individual IDs
static NEXT_INDIVIDUAL_ID: AtomicU64 = AtomicU64::new(0);

/// Stable identity of an individual. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IndividualId(u64);

impl IndividualId {
    pub fn next() -> Self {
        IndividualId(NEXT_INDIVIDUAL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for IndividualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Individual {
    pub id: IndividualId,
    pub gene: VehicleGene,
    pub fitness: f32,
    pub distance: f32, // Live displacement during the active generation
    pub generation: usize, // Generation that created this individual
    pub elite: bool,
    pub parents: Vec<IndividualId>,
}

impl Individual {
    pub fn new_random<R: Rng + ?Sized>(rng: &mut R, generation: usize) -> Self {
        Self::from_gene(VehicleGene::new_random(rng), generation, Vec::new())
    }

    pub fn from_gene(gene: VehicleGene, generation: usize, parents: Vec<IndividualId>) -> Self {
        Self {
            id: IndividualId::next(),
            gene,
            fitness: 0.0,
            distance: 0.0,
            generation,
            elite: false,
            parents,
        }
    }

    /// Offspring of two tournament winners: crossover with probability
    /// `crossover_rate`, otherwise a clone of either parent, then always mutated.
    pub fn from_parents<R: Rng + ?Sized>(
        parent1: &Individual,
        parent2: &Individual,
        rng: &mut R,
        params: &GaParams,
        generation: usize,
    ) -> Self {
        let (gene, parents) = if rng.gen_bool(clamp_rate(params.crossover_rate)) {
            (
                crossover(&parent1.gene, &parent2.gene, rng),
                vec![parent1.id, parent2.id],
            )
        } else {
            let donor = if rng.gen_bool(0.5) { parent1 } else { parent2 };
            (donor.gene.clone(), vec![donor.id])
        };

        let gene = mutate(&gene, params.mutation_rate, rng);
        Self::from_gene(gene, generation, parents)
    }

    /// Verbatim carry-over into `generation`: identity, gene and scores are kept.
    pub fn as_elite(&self, generation: usize) -> Self {
        Self {
            generation,
            elite: true,
            ..self.clone()
        }
    }
}

#[derive(Debug, Default)]
pub struct Population {
    pub individuals: Vec<Individual>,
    pub generation_count: usize,
}

impl Population {
    pub fn new_random<R: Rng + ?Sized>(size: usize, rng: &mut R, generation: usize) -> Self {
        let individuals = (0..size).map(|_| Individual::new_random(rng, generation)).collect();
        Self {
            individuals,
            generation_count: generation,
        }
    }

    /// Tournament selection with replacement. The tournament size is clamped to
    /// `1..=len`; ties go to the contender drawn first. `None` only for an
    /// empty population.
    pub fn select_one_parent<R: Rng + ?Sized>(&self, rng: &mut R, tournament_size: usize) -> Option<&Individual> {
        if self.individuals.is_empty() {
            return None;
        }
        let rounds = tournament_size.clamp(1, self.individuals.len());
        let mut best_in_tournament: Option<&Individual> = None;
        for _ in 0..rounds {
            let contender = &self.individuals[rng.gen_range(0..self.individuals.len())];
            match best_in_tournament {
                Some(best) if contender.fitness <= best.fitness => {}
                _ => best_in_tournament = Some(contender),
            }
        }
        best_in_tournament
    }

    /// Two independent tournaments; the same individual may win both.
    pub fn select_parents<R: Rng + ?Sized>(&self, rng: &mut R, tournament_size: usize) -> Option<(&Individual, &Individual)> {
        let parent1 = self.select_one_parent(rng, tournament_size)?;
        let parent2 = self.select_one_parent(rng, tournament_size)?;
        Some((parent1, parent2))
    }

    /// Applies measured displacements and sorts descending by fitness. The sort
    /// is stable so equal scores keep their previous order.
    pub fn apply_displacements(&mut self, displacements: &HashMap<IndividualId, f32>) {
        for individual in &mut self.individuals {
            let distance = displacements.get(&individual.id).copied().unwrap_or(0.0);
            individual.distance = distance;
            individual.fitness = fitness_from_distance(distance);
        }
        self.individuals
            .sort_by(|a, b| b.fitness.partial_cmp(&a.fitness).unwrap_or(std::cmp::Ordering::Equal));
    }

    pub fn average_fitness(&self) -> f32 {
        if self.individuals.is_empty() {
            0.0
        } else {
            self.individuals.iter().map(|ind| ind.fitness).sum::<f32>() / self.individuals.len() as f32
        }
    }
}

/// Fitness is forward displacement only; rolling backwards scores zero.
pub fn fitness_from_distance(distance: f32) -> f32 {
    if distance.is_finite() {
        distance.max(0.0)
    } else {
        0.0
    }
}

pub struct EvolutionEngine {
    population: Population,
    params: GaParams,
    rng: StdRng,
    all_time_best_individual: Option<Individual>, // Hall of fame snapshot
}

impl EvolutionEngine {
    /// Creates the engine and its generation-0 population.
    pub fn new(params: GaParams, rng: StdRng) -> Self {
        let mut engine = Self {
            population: Population::default(),
            params,
            rng,
            all_time_best_individual: None,
        };
        engine.initialize();
        engine
    }

    /// Fresh random population at generation 0. Clears the hall of fame.
    pub fn initialize(&mut self) {
        self.population = Population::new_random(self.params.population_size, &mut self.rng, 0);
        self.all_time_best_individual = None;
        debug!(
            "Initialized population of {} individuals",
            self.population.individuals.len()
        );
    }

    pub fn params(&self) -> &GaParams {
        &self.params
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.population.individuals
    }

    pub fn generation(&self) -> usize {
        self.population.generation_count
    }

    pub fn best(&self) -> Option<&Individual> {
        self.all_time_best_individual.as_ref()
    }

    pub fn average_fitness(&self) -> f32 {
        self.population.average_fitness()
    }

    /// Top fitness of the current (evaluated) generation.
    pub fn generation_best_fitness(&self) -> f32 {
        self.population.individuals.first().map_or(0.0, |ind| ind.fitness)
    }

    /// Updates the displayed distance of each individual without touching fitness.
    pub fn record_live_distances(&mut self, distances: &HashMap<IndividualId, f32>) {
        for individual in &mut self.population.individuals {
            if let Some(distance) = distances.get(&individual.id) {
                individual.distance = *distance;
            }
        }
    }

    /// Scores the current generation. Missing ids count as zero displacement.
    pub fn evaluate(&mut self, displacements: &HashMap<IndividualId, f32>) {
        self.population.apply_displacements(displacements);
        self.update_all_time_best();
    }

    fn update_all_time_best(&mut self) {
        if let Some(current_gen_best) = self.population.individuals.first() {
            let improved = self
                .all_time_best_individual
                .as_ref()
                .map_or(true, |best| current_gen_best.fitness > best.fitness);
            if improved {
                self.all_time_best_individual = Some(current_gen_best.clone());
                info!(
                    "New all-time best individual! ID: {}, Fitness: {:.2}, Gen: {}",
                    current_gen_best.id, current_gen_best.fitness, current_gen_best.generation
                );
            }
        }
    }

    /// Builds the next generation from the evaluated one: elites first, then
    /// offspring of tournament winners. The new population is swapped in whole.
    pub fn evolve(&mut self) {
        let next_generation_number = self.population.generation_count + 1;
        let mut new_population = Vec::with_capacity(self.params.population_size);

        // Elitism: carry over the best individuals from the current population
        for elite in self.population.individuals.iter().take(self.params.elitism_count) {
            new_population.push(elite.as_elite(next_generation_number));
        }

        // Fill the rest of the new population with offspring
        while new_population.len() < self.params.population_size {
            let Some((parent1, parent2)) = self
                .population
                .select_parents(&mut self.rng, self.params.tournament_size)
            else {
                // Empty source population: nothing to breed from, start over randomly.
                new_population.push(Individual::new_random(&mut self.rng, next_generation_number));
                continue;
            };
            let offspring = Individual::from_parents(parent1, parent2, &mut self.rng, &self.params, next_generation_number);
            new_population.push(offspring);
        }

        self.population = Population {
            individuals: new_population,
            generation_count: next_generation_number,
        };
        debug!("Evolved generation {}", next_generation_number);
    }
}
