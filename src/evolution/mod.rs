pub mod genotype;
pub mod grammar;
pub mod mapper;
pub mod operators;

use crate::config::{ConfigError, GaConfig};
use crate::evaluation::{EvaluationError, FitnessFunction, FitnessReport};
use crate::evolution::genotype::{ChromosomeLayout, Genotype};
use crate::evolution::grammar::Grammar;
use crate::evolution::mapper::GrammarMapper;
use crate::evolution::operators::{CrossoverKind, MutationKind, SelectionKind};
use crate::phenotype::Phenotype;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvolutionError {
    #[error("Invalid evolution configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Evaluation aborted the run: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("The population is empty")]
    EmptyPopulation,
}

/// A candidate of the population.
#[derive(Debug, Clone)]
pub struct Individual {
    pub genotype: Genotype,
    /// `None` until the individual has been evaluated
    pub fitness: Option<f64>,
}

impl Individual {
    pub fn new(genotype: Genotype) -> Self {
        Self {
            genotype,
            fitness: None,
        }
    }
}

/// The best individual seen so far, with its decoded phenotype.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Champion {
    pub genotype: Genotype,
    pub phenotype: Phenotype,
    pub fitness: f64,
    /// Generation (1-based) in which it was first evaluated
    pub generation: usize,
}

/// Counters of the `evaluate_population` function: how many individuals were
/// scored and how many of them hit a fault or a truncated derivation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PopulationEvaluationReport {
    pub evaluated: usize,
    /// Samples scored as worst case after an execution fault, over all individuals
    pub execution_faults: usize,
    pub syntax_errors: usize,
    pub truncated: usize,
}

/// Summary of one completed generation, handed to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationStats {
    /// 1-based generation number
    pub generation: usize,
    pub best_fitness: f64,
    /// Mean over the finite fitness values of the generation
    pub mean_fitness: f64,
    /// Running best across every generation so far
    pub best_so_far: f64,
    pub report: PopulationEvaluationReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    FitnessThreshold,
    GenerationLimit,
}

/// Outcome of a complete run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub best_genotype: Genotype,
    pub best_phenotype: String,
    pub best_fitness: f64,
    /// Number of generations evaluated
    pub generations: usize,
    pub termination: Termination,
}

/// Drives a Grammatical Evolution run: owns the population and turns it over one
/// generation at a time, scoring phenotypes through a `FitnessFunction`.
pub struct EvolutionEngine<'a, F: FitnessFunction> {
    /// Reference to the user-defined config of the run
    config: &'a GaConfig,
    /// Converts genotypes into phenotypes
    mapper: GrammarMapper<'a>,
    layout: ChromosomeLayout,
    fitness: &'a F,
    /// Current population, replaced wholesale every generation
    population: Vec<Individual>,
    rng: StdRng,
    /// Number of generations evaluated so far
    generation: usize,
    best: Option<Champion>,
}

impl<'a, F: FitnessFunction> EvolutionEngine<'a, F> {
    /// Creates a new EvolutionEngine instance
    ///
    /// # Arguments
    /// * `config` - Reference to a `GaConfig` struct containing all the parameters required for the evolution.
    /// * `grammar` - Reference to the `Grammar` the genotypes are decoded against.
    /// * `fitness` - The function scoring each phenotype.
    ///
    /// # Returns
    /// * `Ok(Self)` - An engine with an empty population
    /// * `Err(ConfigError)` - If `config` fails validation
    pub fn new(config: &'a GaConfig, grammar: &'a Grammar, fitness: &'a F) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            config,
            mapper: GrammarMapper::new(grammar, config.max_expansions).with_truncation(config.truncation),
            layout: ChromosomeLayout::for_grammar(grammar, config.chromosome_multiplier, config.codon_bound),
            fitness,
            population: Vec::with_capacity(config.population_size),
            rng,
            generation: 0,
            best: None,
        })
    }

    pub fn population(&self) -> &[Individual] {
        &self.population
    }

    pub fn layout(&self) -> &ChromosomeLayout {
        &self.layout
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    /// The best individual observed across every generation so far.
    pub fn best(&self) -> Option<&Champion> {
        self.best.as_ref()
    }

    /// Decodes and renders a genotype with this engine's grammar and expansion cap.
    pub fn express(&self, genotype: &Genotype) -> Phenotype {
        let derivation = self.mapper.map(genotype);
        Phenotype::from_terminals(&derivation.terminals, derivation.truncated)
    }

    /// Runs the evolution process until a termination condition holds.
    pub fn evolve(&mut self) -> Result<RunResult, EvolutionError> {
        self.evolve_with_observer(|_| {})
    }

    /// Runs the evolution process, calling `observer` after every completed generation.
    ///
    /// The population is re-initialized first, so a run always starts from scratch.
    /// Termination is checked once per generation: either the running best reaches
    /// `fitness_threshold` or `max_generations` generations have been evaluated.
    ///
    /// # Arguments
    /// * `&mut self` - The EvolutionEngine that will orchestrate the evolution process
    /// * `observer` - Callback receiving the `GenerationStats` of each generation
    ///
    /// # Returns
    /// * `Ok(RunResult)` - The best individual ever seen and the generation count
    /// * `Err(EvolutionError)` - If an evaluation fault aborted the run
    pub fn evolve_with_observer<O>(&mut self, mut observer: O) -> Result<RunResult, EvolutionError>
    where
        O: FnMut(&GenerationStats),
    {
        info!(
            "Initializing population of size {} ({} codons per genotype)...",
            self.config.population_size,
            self.layout.total_codons()
        );
        self.initialize_population();

        loop {
            let stats = self.step()?;
            observer(&stats);
            if let Some(termination) = self.termination() {
                let result = self.result(termination)?;
                info!(
                    "Evolution complete after {} generations ({:?}): best fitness {:.4} for '{}'",
                    result.generations, result.termination, result.best_fitness, result.best_phenotype
                );
                return Ok(result);
            }
        }
    }

    /// Creates a fresh population of uniformly random genotypes and forgets any
    /// previous progress.
    pub fn initialize_population(&mut self) {
        let layout = &self.layout;
        let rng = &mut self.rng;
        self.population = (0..self.config.population_size)
            .map(|_| Individual::new(layout.random_genotype(&mut *rng)))
            .collect();
        self.generation = 0;
        self.best = None;
    }

    /// Advances the run by one generation.
    ///
    /// The first call evaluates the initial population (created if needed); later
    /// calls breed the next generation from the evaluated one and evaluate it.
    /// A run is cancelled by not calling `step` again.
    pub fn step(&mut self) -> Result<GenerationStats, EvolutionError> {
        if self.population.is_empty() {
            self.initialize_population();
        } else if self.population.iter().all(|ind| ind.fitness.is_some()) {
            self.population = self.next_generation()?;
        }

        let report = self.evaluate_population()?;
        self.generation += 1;
        let stats = self.record_generation(report)?;
        info!(
            "Gen {}: Best Fitness={:.4} | Mean Fitness={:.4} | Best So Far={:.4} | Execution Faults={} | Syntax Errors={} | Truncated={}",
            stats.generation,
            stats.best_fitness,
            stats.mean_fitness,
            stats.best_so_far,
            report.execution_faults,
            report.syntax_errors,
            report.truncated
        );
        Ok(stats)
    }

    /// Evaluates every individual that has no fitness yet.
    ///
    /// Decoding and scoring run in parallel; each individual only reads its own
    /// genotype and the shared grammar. The first aborting fault is returned.
    pub fn evaluate_population(&mut self) -> Result<PopulationEvaluationReport, EvaluationError> {
        let work_items: Vec<(usize, &Genotype)> = self
            .population
            .iter()
            .enumerate()
            .filter(|(_, ind)| ind.fitness.is_none())
            .map(|(i, ind)| (i, &ind.genotype))
            .collect();

        if work_items.is_empty() {
            return Ok(PopulationEvaluationReport::default());
        }

        let mapper = self.mapper;
        let fitness = self.fitness;
        let results: Vec<(usize, FitnessReport, bool)> = work_items
            .par_iter()
            .map(|&(i, genotype)| {
                let derivation = mapper.map(genotype);
                let phenotype = Phenotype::from_terminals(&derivation.terminals, derivation.truncated);
                fitness
                    .evaluate(&phenotype)
                    .map(|report| (i, report, derivation.truncated))
            })
            .collect::<Result<_, _>>()?;

        let mut report = PopulationEvaluationReport::default();
        for (i, fitness_report, truncated) in results {
            self.population[i].fitness = Some(self.config.optimize.sanitize(fitness_report.fitness));
            report.evaluated += 1;
            report.execution_faults += fitness_report.execution_faults;
            report.syntax_errors += usize::from(fitness_report.syntax_error);
            report.truncated += usize::from(truncated);
        }
        debug!("Evaluated {} individuals: {:?}", report.evaluated, report);
        Ok(report)
    }

    /// Computes the generation's statistics and updates the running best.
    fn record_generation(&mut self, report: PopulationEvaluationReport) -> Result<GenerationStats, EvolutionError> {
        let optimize = self.config.optimize;
        let (best_index, best_fitness) = self
            .population
            .iter()
            .enumerate()
            .map(|(i, ind)| (i, ind.fitness.unwrap_or(optimize.worst())))
            .max_by(|a, b| optimize.compare(a.1, b.1))
            .ok_or(EvolutionError::EmptyPopulation)?;

        let improved = self
            .best
            .as_ref()
            .map_or(true, |champion| optimize.is_better(best_fitness, champion.fitness));
        if improved {
            let genotype = self.population[best_index].genotype.clone();
            let phenotype = self.express(&genotype);
            debug!("New best at generation {}: {:.4} '{}'", self.generation, best_fitness, phenotype);
            self.best = Some(Champion {
                genotype,
                phenotype,
                fitness: best_fitness,
                generation: self.generation,
            });
        }

        let finite: Vec<f64> = self
            .population
            .iter()
            .filter_map(|ind| ind.fitness)
            .filter(|f| f.is_finite())
            .collect();
        let mean_fitness = if finite.is_empty() {
            optimize.worst()
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        };

        Ok(GenerationStats {
            generation: self.generation,
            best_fitness,
            mean_fitness,
            best_so_far: self.best.as_ref().map_or(best_fitness, |c| c.fitness),
            report,
        })
    }

    /// The condition that ends the run, if any holds after the last generation.
    pub fn termination(&self) -> Option<Termination> {
        let best = self.best.as_ref()?;
        if let Some(threshold) = self.config.fitness_threshold {
            if self.config.optimize.reached(best.fitness, threshold) {
                return Some(Termination::FitnessThreshold);
            }
        }
        (self.generation >= self.config.max_generations).then_some(Termination::GenerationLimit)
    }

    fn result(&self, termination: Termination) -> Result<RunResult, EvolutionError> {
        let best = self.best.as_ref().ok_or(EvolutionError::EmptyPopulation)?;
        Ok(RunResult {
            best_genotype: best.genotype.clone(),
            best_phenotype: best.phenotype.source.clone(),
            best_fitness: best.fitness,
            generations: self.generation,
            termination,
        })
    }

    /// Breeds the replacement population from the evaluated one: the `elitism` best
    /// individuals are carried over unchanged, the rest are offspring of selected
    /// parents after crossover and mutation.
    fn next_generation(&mut self) -> Result<Vec<Individual>, EvolutionError> {
        let size = self.config.population_size;
        let optimize = self.config.optimize;
        let mut next_generation = Vec::with_capacity(size);

        // Preserve the best for next generation (exploitation)
        let mut ranked: Vec<&Individual> = self.population.iter().collect();
        ranked.sort_by(|a, b| {
            optimize.compare(
                b.fitness.unwrap_or(optimize.worst()),
                a.fitness.unwrap_or(optimize.worst()),
            )
        });
        next_generation.extend(ranked.into_iter().take(self.config.elitism).cloned());

        let parents = self.select_parents();
        if parents.is_empty() {
            return Err(EvolutionError::EmptyPopulation);
        }

        let mut cursor = 0;
        while next_generation.len() < size {
            let parent1 = self.population[parents[cursor % parents.len()]].genotype.clone();
            let parent2 = self.population[parents[(cursor + 1) % parents.len()]].genotype.clone();
            cursor += 2;

            let (mut child1, mut child2) = if self.rng.random::<f64>() < self.config.crossover_rate {
                self.crossover(&parent1, &parent2)
            } else {
                (parent1, parent2)
            };
            self.mutate(&mut child1);
            self.mutate(&mut child2);

            for child in [child1, child2] {
                if next_generation.len() < size {
                    next_generation.push(Individual::new(child));
                }
            }
        }
        Ok(next_generation)
    }

    /// Selects `population_size` parent indices with the configured policy.
    fn select_parents(&mut self) -> Vec<usize> {
        let optimize = self.config.optimize;
        let fitness: Vec<f64> = self
            .population
            .iter()
            .map(|ind| ind.fitness.unwrap_or(optimize.worst()))
            .collect();

        (0..self.config.population_size)
            .filter_map(|_| match self.config.selection {
                SelectionKind::Tournament => operators::tournament_select(
                    &fitness,
                    self.config.tournament_size,
                    optimize,
                    &mut self.rng,
                ),
                SelectionKind::Roulette => operators::roulette_select(&fitness, optimize, &mut self.rng),
            })
            .collect()
    }

    fn crossover(&mut self, parent1: &Genotype, parent2: &Genotype) -> (Genotype, Genotype) {
        match self.config.crossover {
            CrossoverKind::SinglePoint => operators::single_point_crossover(parent1, parent2, &mut self.rng),
            CrossoverKind::PerChromosome => {
                operators::per_chromosome_crossover(parent1, parent2, &mut self.rng)
            }
        }
    }

    fn mutate(&mut self, genotype: &mut Genotype) {
        let rate = self.config.mutation_rate;
        match self.config.mutation {
            MutationKind::Swap => operators::swap_mutation(genotype, rate, &mut self.rng),
            MutationKind::RandomReset => {
                operators::random_reset_mutation(genotype, &self.layout, rate, &mut self.rng)
            }
        };
    }
}
