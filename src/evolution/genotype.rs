use crate::evolution::grammar::Grammar;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Integer sequence dedicated to the choices of one non-terminal.
pub type Chromosome = Vec<u32>;

/// The ordered tuple of chromosomes of one candidate, one per grammar rule,
/// in rule definition order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Genotype {
    pub chromosomes: Vec<Chromosome>,
}

impl Genotype {
    pub fn new(chromosomes: Vec<Chromosome>) -> Self {
        Self { chromosomes }
    }

    /// Total number of codons across all chromosomes.
    pub fn len(&self) -> usize {
        self.chromosomes.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chromosome lengths, in order.
    pub fn shape(&self) -> Vec<usize> {
        self.chromosomes.iter().map(Vec::len).collect()
    }

    /// Codon at a position of the flattened genotype.
    pub fn codon(&self, flat_index: usize) -> Option<u32> {
        let (c, i) = self.locate(flat_index)?;
        Some(self.chromosomes[c][i])
    }

    /// Maps a flat codon position to `(chromosome, offset)`.
    pub fn locate(&self, mut flat_index: usize) -> Option<(usize, usize)> {
        for (c, chromosome) in self.chromosomes.iter().enumerate() {
            if flat_index < chromosome.len() {
                return Some((c, flat_index));
            }
            flat_index -= chromosome.len();
        }
        None
    }

    /// Iterates over mutable references to every codon, in flattened order.
    pub fn codons_mut(&mut self) -> impl Iterator<Item = &mut u32> {
        self.chromosomes.iter_mut().flat_map(|c| c.iter_mut())
    }
}

/// How large a codon may get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CodonBound {
    /// Codons of a rule's chromosome range over `0..alternatives(rule)`.
    #[default]
    Alternatives,
    /// Codons range over `0..N` for every chromosome.
    Fixed(u32),
}

/// Fixed chromosome lengths and codon bounds derived from a grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChromosomeLayout {
    lengths: Vec<usize>,
    bounds: Vec<u32>,
}

impl ChromosomeLayout {
    /// Every rule gets a chromosome of `alternatives(rule) * multiplier` codons.
    ///
    /// # Arguments
    /// * `grammar` - The grammar whose rules define one chromosome each
    /// * `multiplier` - The `K` factor applied to each rule's alternative count
    /// * `bound` - Exclusive upper bound policy of the codon values
    ///
    /// # Returns
    /// * `Self` - The layout shared by every genotype of a run
    pub fn for_grammar(grammar: &Grammar, multiplier: usize, bound: CodonBound) -> Self {
        let (lengths, bounds) = grammar
            .rules()
            .iter()
            .map(|rule| {
                let alternatives = rule.alternatives.len();
                let codon_bound = match bound {
                    CodonBound::Alternatives => alternatives as u32,
                    CodonBound::Fixed(n) => n,
                };
                (alternatives * multiplier, codon_bound.max(1))
            })
            .unzip();
        Self { lengths, bounds }
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn bounds(&self) -> &[u32] {
        &self.bounds
    }

    pub fn total_codons(&self) -> usize {
        self.lengths.iter().sum()
    }

    /// Samples every codon independently and uniformly within its chromosome's bound.
    pub fn random_genotype<R: Rng + ?Sized>(&self, rng: &mut R) -> Genotype {
        let chromosomes = self
            .lengths
            .iter()
            .zip(&self.bounds)
            .map(|(&len, &bound)| (0..len).map(|_| rng.random_range(0..bound)).collect())
            .collect();
        Genotype { chromosomes }
    }

    /// Draws a fresh codon for the given chromosome.
    pub fn random_codon<R: Rng + ?Sized>(&self, chromosome: usize, rng: &mut R) -> u32 {
        let bound = self.bounds.get(chromosome).copied().unwrap_or(1);
        rng.random_range(0..bound)
    }

    /// Checks a genotype has exactly this layout's chromosome count and lengths.
    pub fn conforms(&self, genotype: &Genotype) -> bool {
        genotype.chromosomes.len() == self.lengths.len()
            && genotype
                .chromosomes
                .iter()
                .zip(&self.lengths)
                .all(|(c, &len)| c.len() == len)
    }
}
