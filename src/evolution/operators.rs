//! Selection, crossover and mutation over multi-chromosome genotypes.
//!
//! Every operator keeps the chromosome count and each chromosome's length intact.

use crate::evolution::genotype::{ChromosomeLayout, Genotype};
use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    #[default]
    Tournament,
    /// Fitness-proportionate on the direction-adjusted fitness
    Roulette,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrossoverKind {
    /// One cut over the flattened genotype, tails exchanged across chromosome boundaries
    #[default]
    SinglePoint,
    /// One cut inside a single randomly chosen chromosome
    PerChromosome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Each codon may trade places with another codon of the same chromosome
    #[default]
    Swap,
    /// Each codon may be redrawn within its chromosome's bound
    RandomReset,
}

/// Whether lower or higher fitness wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Optimize {
    #[default]
    Minimize,
    Maximize,
}

impl Optimize {
    /// `Ordering::Greater` when `a` is better than `b`.
    pub fn compare(&self, a: f64, b: f64) -> Ordering {
        match self {
            Optimize::Minimize => b.total_cmp(&a),
            Optimize::Maximize => a.total_cmp(&b),
        }
    }

    pub fn is_better(&self, a: f64, b: f64) -> bool {
        self.compare(a, b) == Ordering::Greater
    }

    /// The value every real fitness beats.
    pub fn worst(&self) -> f64 {
        match self {
            Optimize::Minimize => f64::INFINITY,
            Optimize::Maximize => f64::NEG_INFINITY,
        }
    }

    /// Replaces NaN, which has no place in an ordering, with the worst value.
    pub fn sanitize(&self, fitness: f64) -> f64 {
        if fitness.is_nan() {
            self.worst()
        } else {
            fitness
        }
    }

    /// Whether `fitness` satisfies a termination threshold.
    pub fn reached(&self, fitness: f64, threshold: f64) -> bool {
        match self {
            Optimize::Minimize => fitness <= threshold,
            Optimize::Maximize => fitness >= threshold,
        }
    }
}

/// Single-point crossover at genotype granularity.
///
/// A cut is drawn over the flattened codon positions `1..len` and every codon from the
/// cut onwards is exchanged, so a cut may fall inside any chromosome.
///
/// # Arguments
/// * `parent1` - Reference to the first parent's genotype
/// * `parent2` - Reference to the second parent's genotype, same layout as `parent1`
/// * `rng` - Source of randomness for the cut point
///
/// # Returns
/// * `(Genotype, Genotype)` - The two offspring, each with the parents' layout
pub fn single_point_crossover<R: Rng + ?Sized>(
    parent1: &Genotype,
    parent2: &Genotype,
    rng: &mut R,
) -> (Genotype, Genotype) {
    let mut child1 = parent1.clone();
    let mut child2 = parent2.clone();
    if parent1.shape() != parent2.shape() {
        warn!("crossover operator received parents with different layouts");
        return (child1, child2);
    }
    let total = parent1.len();
    if total < 2 {
        return (child1, child2);
    }

    let cut = rng.random_range(1..total);
    for (a, b) in child1.codons_mut().zip(child2.codons_mut()).skip(cut) {
        std::mem::swap(a, b);
    }
    (child1, child2)
}

/// Single-point crossover inside one randomly chosen chromosome; the other
/// chromosomes are inherited unchanged.
pub fn per_chromosome_crossover<R: Rng + ?Sized>(
    parent1: &Genotype,
    parent2: &Genotype,
    rng: &mut R,
) -> (Genotype, Genotype) {
    let mut child1 = parent1.clone();
    let mut child2 = parent2.clone();
    if parent1.shape() != parent2.shape() {
        warn!("crossover operator received parents with different layouts");
        return (child1, child2);
    }

    let candidates: Vec<usize> = parent1
        .chromosomes
        .iter()
        .enumerate()
        .filter(|(_, c)| c.len() >= 2)
        .map(|(i, _)| i)
        .collect();
    if candidates.is_empty() {
        return (child1, child2);
    }

    let index = candidates[rng.random_range(0..candidates.len())];
    let len = parent1.chromosomes[index].len();
    let cut = rng.random_range(1..len);
    child1.chromosomes[index][cut..].swap_with_slice(&mut child2.chromosomes[index][cut..]);
    (child1, child2)
}

/// Swap mutation: with probability `rate` per codon, the codon trades places with a
/// random position of the same chromosome.
///
/// Returns the number of swaps performed.
pub fn swap_mutation<R: Rng + ?Sized>(genotype: &mut Genotype, rate: f64, rng: &mut R) -> usize {
    let mut swaps = 0;
    for chromosome in genotype.chromosomes.iter_mut() {
        let len = chromosome.len();
        if len < 2 {
            continue;
        }
        for i in 0..len {
            if rng.random::<f64>() < rate {
                let j = rng.random_range(0..len);
                chromosome.swap(i, j);
                swaps += 1;
            }
        }
    }
    swaps
}

/// Random reset mutation: with probability `rate` per codon, the codon is redrawn
/// uniformly within its chromosome's bound.
///
/// Returns the number of codons redrawn.
pub fn random_reset_mutation<R: Rng + ?Sized>(
    genotype: &mut Genotype,
    layout: &ChromosomeLayout,
    rate: f64,
    rng: &mut R,
) -> usize {
    let mut resets = 0;
    for (index, chromosome) in genotype.chromosomes.iter_mut().enumerate() {
        for codon in chromosome.iter_mut() {
            if rng.random::<f64>() < rate {
                *codon = layout.random_codon(index, rng);
                resets += 1;
            }
        }
    }
    resets
}

/// Picks `size` contestants uniformly (with replacement) and returns the index of the best.
pub fn tournament_select<R: Rng + ?Sized>(
    fitness: &[f64],
    size: usize,
    optimize: Optimize,
    rng: &mut R,
) -> Option<usize> {
    if fitness.is_empty() {
        return None;
    }
    (0..size.max(1))
        .map(|_| rng.random_range(0..fitness.len()))
        .max_by(|&a, &b| optimize.compare(fitness[a], fitness[b]))
}

/// Fitness-proportionate selection.
///
/// Fitness is first turned so that higher is better, then shifted so the worst
/// finite value weighs zero. Non-finite values never win. When every weight is
/// zero the pick is uniform.
pub fn roulette_select<R: Rng + ?Sized>(
    fitness: &[f64],
    optimize: Optimize,
    rng: &mut R,
) -> Option<usize> {
    if fitness.is_empty() {
        return None;
    }
    let adjusted: Vec<f64> = fitness
        .iter()
        .map(|&f| match optimize {
            Optimize::Minimize => -f,
            Optimize::Maximize => f,
        })
        .collect();
    let floor = adjusted
        .iter()
        .copied()
        .filter(|f| f.is_finite())
        .fold(f64::INFINITY, f64::min);
    let weights: Vec<f64> = adjusted
        .iter()
        .map(|&f| if f.is_finite() { f - floor } else { 0.0 })
        .collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return Some(rng.random_range(0..fitness.len()));
    }

    let mut target = rng.random::<f64>() * total;
    for (index, weight) in weights.iter().enumerate() {
        if target < *weight {
            return Some(index);
        }
        target -= weight;
    }
    // rounding left the target past the last positive weight
    weights.iter().rposition(|w| *w > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::genotype::CodonBound;
    use crate::evolution::grammar::Grammar;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn get_test_layout() -> ChromosomeLayout {
        let grammar = Grammar::parse(
            "<expr> ::= <var> | (<expr>) <op> (<expr>)\n<op> ::= ' && ' | ' || '\n<var> ::= x | y",
        )
        .unwrap();
        ChromosomeLayout::for_grammar(&grammar, 25, CodonBound::Fixed(1000))
    }

    #[test]
    fn test_single_point_crossover_preserves_layout() {
        let layout = get_test_layout();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let p1 = layout.random_genotype(&mut rng);
            let p2 = layout.random_genotype(&mut rng);
            let (c1, c2) = single_point_crossover(&p1, &p2, &mut rng);
            assert!(layout.conforms(&c1));
            assert!(layout.conforms(&c2));
            assert_eq!(c1.len(), p1.len());

            // every position holds one codon from each parent
            for i in 0..p1.len() {
                let pair = (c1.codon(i), c2.codon(i));
                assert!(
                    pair == (p1.codon(i), p2.codon(i)) || pair == (p2.codon(i), p1.codon(i))
                );
            }
        }
    }

    #[test]
    fn test_single_point_crossover_exchanges_tails() {
        let p1 = Genotype::new(vec![vec![0, 0], vec![0, 0, 0]]);
        let p2 = Genotype::new(vec![vec![1, 1], vec![1, 1, 1]]);
        let mut rng = StdRng::seed_from_u64(3);
        let (c1, c2) = single_point_crossover(&p1, &p2, &mut rng);
        let flat1: Vec<u32> = c1.chromosomes.concat();
        let flat2: Vec<u32> = c2.chromosomes.concat();
        let cut = flat1.iter().position(|&c| c == 1).unwrap();
        assert!(cut >= 1 && cut < 5);
        assert!(flat1[..cut].iter().all(|&c| c == 0) && flat1[cut..].iter().all(|&c| c == 1));
        assert!(flat2[..cut].iter().all(|&c| c == 1) && flat2[cut..].iter().all(|&c| c == 0));
    }

    #[test]
    fn test_crossover_with_mismatched_parents_is_noop() {
        let p1 = Genotype::new(vec![vec![0, 0]]);
        let p2 = Genotype::new(vec![vec![1, 1, 1]]);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(single_point_crossover(&p1, &p2, &mut rng), (p1.clone(), p2.clone()));
        assert_eq!(per_chromosome_crossover(&p1, &p2, &mut rng), (p1, p2));
    }

    #[test]
    fn test_per_chromosome_crossover_touches_one_chromosome() {
        let layout = get_test_layout();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let p1 = layout.random_genotype(&mut rng);
            let p2 = layout.random_genotype(&mut rng);
            let (c1, _) = per_chromosome_crossover(&p1, &p2, &mut rng);
            assert!(layout.conforms(&c1));
            let changed = c1
                .chromosomes
                .iter()
                .zip(&p1.chromosomes)
                .filter(|(a, b)| a != b)
                .count();
            assert!(changed <= 1);
        }
    }

    #[test]
    fn test_swap_mutation_preserves_chromosome_contents() {
        let layout = get_test_layout();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            let original = layout.random_genotype(&mut rng);
            let mut mutated = original.clone();
            swap_mutation(&mut mutated, 0.2, &mut rng);
            assert!(layout.conforms(&mutated));
            // swapping only permutes codons within a chromosome
            for (a, b) in mutated.chromosomes.iter().zip(&original.chromosomes) {
                let (mut a, mut b) = (a.clone(), b.clone());
                a.sort_unstable();
                b.sort_unstable();
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_mutation_rates_at_bounds() {
        let layout = get_test_layout();
        let mut rng = StdRng::seed_from_u64(11);
        let original = layout.random_genotype(&mut rng);

        let mut genotype = original.clone();
        assert_eq!(swap_mutation(&mut genotype, 0.0, &mut rng), 0);
        assert_eq!(random_reset_mutation(&mut genotype, &layout, 0.0, &mut rng), 0);
        assert_eq!(genotype, original);

        let resets = random_reset_mutation(&mut genotype, &layout, 1.0, &mut rng);
        assert_eq!(resets, layout.total_codons());
        assert!(layout.conforms(&genotype));
        assert!(genotype.chromosomes.iter().flatten().all(|&c| c < 1000));
    }

    #[test]
    fn test_tournament_prefers_better_fitness() {
        let fitness = [0.9, 0.1, 0.5, 0.7];
        let mut rng = StdRng::seed_from_u64(13);
        // a tournament as large as the population almost surely sees the best
        let wins = (0..200)
            .filter(|_| tournament_select(&fitness, 16, Optimize::Minimize, &mut rng) == Some(1))
            .count();
        assert!(wins > 190);
        let wins = (0..200)
            .filter(|_| tournament_select(&fitness, 16, Optimize::Maximize, &mut rng) == Some(0))
            .count();
        assert!(wins > 190);
        assert_eq!(tournament_select(&[], 3, Optimize::Minimize, &mut rng), None);
    }

    #[test]
    fn test_roulette_never_picks_zero_weight() {
        let fitness = [1.0, 0.0, f64::INFINITY];
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..200 {
            // 1.0 is the worst finite value and 0.0 carries all the weight
            assert_eq!(roulette_select(&fitness, Optimize::Minimize, &mut rng), Some(1));
        }
        let uniform = [0.5, 0.5];
        for _ in 0..50 {
            let pick = roulette_select(&uniform, Optimize::Minimize, &mut rng).unwrap();
            assert!(pick < 2);
        }
    }

    #[test]
    fn test_optimize_direction() {
        assert!(Optimize::Minimize.is_better(0.1, 0.2));
        assert!(Optimize::Maximize.is_better(0.2, 0.1));
        assert!(Optimize::Minimize.is_better(1.0, Optimize::Minimize.worst()));
        assert_eq!(Optimize::Maximize.sanitize(f64::NAN), f64::NEG_INFINITY);
        assert!(Optimize::Minimize.reached(0.05, 0.05));
        assert!(!Optimize::Maximize.reached(0.04, 0.05));
    }
}
