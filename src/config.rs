use crate::evaluation::sampling::{Sample, Sampling, SamplingError};
use crate::evaluation::{FaultPolicy, LossFunction};
use crate::evolution::genotype::CodonBound;
use crate::evolution::mapper::TruncationPolicy;
use crate::evolution::operators::{CrossoverKind, MutationKind, Optimize, SelectionKind};
use crate::vm::DEFAULT_MAX_INSTRUCTIONS;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    FileReadError(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Invalid sample set: {0}")]
    Samples(#[from] SamplingError),
    #[error("{parameters} parameter name(s) cannot bind samples with {arity} input(s)")]
    ParameterArity { parameters: usize, arity: usize },
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Top-level run configuration, usually read from `config.toml`.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub grammar_file: String,
    /// Derivation start; the first rule of the grammar when absent
    pub start_symbol: Option<String>,
    pub ga: GaConfig,
    pub fitness: FitnessConfig,
    pub samples: Vec<Sample>,
    pub export: Option<ExportConfig>,
}

/// Parameters of the evolutionary search.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GaConfig {
    pub population_size: usize,
    /// Chromosome length is `alternatives(rule) * chromosome_multiplier`
    pub chromosome_multiplier: usize,
    pub codon_bound: CodonBound,
    /// Expansion cap of a single derivation
    pub max_expansions: usize,
    pub truncation: TruncationPolicy,
    pub selection: SelectionKind,
    pub tournament_size: usize,
    pub crossover: CrossoverKind,
    /// Probability that a selected pair is recombined
    pub crossover_rate: f64,
    pub mutation: MutationKind,
    /// Per-codon mutation probability
    pub mutation_rate: f64,
    /// Number of best individuals copied unchanged into the next generation
    pub elitism: usize,
    pub optimize: Optimize,
    pub fitness_threshold: Option<f64>,
    pub max_generations: usize,
    pub seed: Option<u64>,
}

impl Default for GaConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            chromosome_multiplier: 25,
            codon_bound: CodonBound::Alternatives,
            max_expansions: 50,
            truncation: TruncationPolicy::DropNonTerminals,
            selection: SelectionKind::Tournament,
            tournament_size: 3,
            crossover: CrossoverKind::SinglePoint,
            crossover_rate: 0.2,
            mutation: MutationKind::Swap,
            mutation_rate: 0.2,
            elitism: 1,
            optimize: Optimize::Minimize,
            fitness_threshold: Some(0.05),
            max_generations: 10_000,
            seed: None,
        }
    }
}

impl GaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size == 0 {
            return Err(invalid("population_size must be positive"));
        }
        if self.max_generations == 0 {
            return Err(invalid("max_generations must be positive"));
        }
        if self.chromosome_multiplier == 0 {
            return Err(invalid("chromosome_multiplier must be positive"));
        }
        if self.max_expansions == 0 {
            return Err(invalid("max_expansions must be positive"));
        }
        if let CodonBound::Fixed(0) = self.codon_bound {
            return Err(invalid("a fixed codon_bound must be positive"));
        }
        if self.selection == SelectionKind::Tournament && self.tournament_size == 0 {
            return Err(invalid("tournament_size must be positive"));
        }
        for (name, rate) in [
            ("crossover_rate", self.crossover_rate),
            ("mutation_rate", self.mutation_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(invalid(format!("{} must be within [0, 1], got {}", name, rate)));
            }
        }
        if self.elitism >= self.population_size {
            return Err(invalid(format!(
                "elitism ({}) must be smaller than population_size ({})",
                self.elitism, self.population_size
            )));
        }
        if let Some(threshold) = self.fitness_threshold {
            if !threshold.is_finite() {
                return Err(invalid("fitness_threshold must be finite"));
            }
            // errors are never negative, so a negative target can never be reached
            if self.optimize == Optimize::Minimize && threshold < 0.0 {
                return Err(invalid(format!(
                    "fitness_threshold {} is unreachable when minimizing",
                    threshold
                )));
            }
        }
        Ok(())
    }
}

/// How phenotypes are executed and scored.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FitnessConfig {
    /// Names bound positionally to each sample's inputs
    pub parameters: Vec<String>,
    pub loss: LossFunction,
    /// Policy for faults raised while executing a compiled phenotype
    pub on_fault: FaultPolicy,
    /// Policy for phenotypes that do not compile, e.g. truncated derivations
    pub on_syntax_error: FaultPolicy,
    /// Instruction budget of one execution
    pub max_instructions: usize,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            parameters: vec!["x".to_string(), "y".to_string()],
            loss: LossFunction::Mse,
            on_fault: FaultPolicy::WorstCase,
            on_syntax_error: FaultPolicy::WorstCase,
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
        }
    }
}

impl FitnessConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parameters.is_empty() {
            return Err(invalid("at least one parameter name is required"));
        }
        let mut seen = HashSet::new();
        for name in &self.parameters {
            if name.is_empty() {
                return Err(invalid("parameter names cannot be empty"));
            }
            if !seen.insert(name) {
                return Err(invalid(format!("parameter '{}' is bound twice", name)));
            }
        }
        if self.max_instructions == 0 {
            return Err(invalid("max_instructions must be positive"));
        }
        Ok(())
    }

    /// Checks the parameter names can bind every sample of `sampling`.
    pub fn check_arity(&self, sampling: &Sampling) -> Result<(), ConfigError> {
        if self.parameters.len() != sampling.arity() {
            return Err(ConfigError::ParameterArity {
                parameters: self.parameters.len(),
                arity: sampling.arity(),
            });
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ExportConfig {
    /// Where the JSON run report is written
    pub path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grammar_file: "grammar.bnf".to_string(),
            start_symbol: None,
            ga: GaConfig::default(),
            fitness: FitnessConfig::default(),
            samples: Sampling::xor().samples().to_vec(),
            export: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Builds the run's sample set.
    pub fn sampling(&self) -> Result<Sampling, ConfigError> {
        Ok(Sampling::new(self.samples.clone())?)
    }

    /// Validates every section, including that the parameter names fit the samples.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ga.validate()?;
        self.fitness.validate()?;
        let sampling = self.sampling()?;
        self.fitness.check_arity(&sampling)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Value;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ga.population_size, 50);
        assert_eq!(config.ga.chromosome_multiplier, 25);
        assert_eq!(config.ga.max_expansions, 50);
        assert_eq!(config.ga.fitness_threshold, Some(0.05));
        assert_eq!(config.ga.max_generations, 10_000);
        assert_eq!(config.ga.crossover_rate, 0.2);
        assert_eq!(config.ga.mutation_rate, 0.2);
        assert_eq!(config.samples.len(), 4);
    }

    #[test]
    fn test_project_config_loads() {
        let config = Config::load(Path::new("config.toml")).unwrap();
        assert!(config.validate().is_ok(), "{:?}", config.validate());
        assert_eq!(config.grammar_file, "grammar.bnf");
        assert_eq!(config.ga, GaConfig::default());
        assert_eq!(config.sampling().unwrap(), Sampling::xor());
        assert_eq!(config.export.unwrap().path, "champion.json");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
grammar_file = "and.bnf"

[ga]
population_size = 10
codon_bound = {{ fixed = 255 }}
mutation = "random_reset"
optimize = "maximize"
fitness_threshold = 3.5

[fitness]
parameters = ["a"]
loss = "mae"
on_syntax_error = "abort"

[[samples]]
inputs = [1.5]
expected = 3.0
"#
        )
        .unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.ga.population_size, 10);
        assert_eq!(config.ga.codon_bound, CodonBound::Fixed(255));
        assert_eq!(config.ga.mutation, MutationKind::RandomReset);
        assert_eq!(config.ga.optimize, Optimize::Maximize);
        assert_eq!(config.ga.max_generations, 10_000);
        assert_eq!(config.fitness.loss, LossFunction::Mae);
        assert_eq!(config.fitness.on_fault, FaultPolicy::WorstCase);
        assert_eq!(config.fitness.on_syntax_error, FaultPolicy::Abort);
        assert_eq!(config.samples[0].inputs, vec![Value::Number(1.5)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        config.ga.population_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.ga.max_generations = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.ga.mutation_rate = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.ga.fitness_threshold = Some(-0.1);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.ga.optimize = Optimize::Maximize;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.ga.elitism = config.ga.population_size;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.fitness.parameters = vec!["x".to_string(), "x".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_sample_problems_are_rejected() {
        let mut config = Config::default();
        config.samples.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Samples(SamplingError::Empty))));

        let mut config = Config::default();
        config.fitness.parameters = vec!["x".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ParameterArity { parameters: 1, arity: 2 })
        ));
    }

    #[test]
    fn test_malformed_toml_is_reported() {
        assert!(matches!(
            Config::parse("[ga]\npopulation_size = \"many\""),
            Err(ConfigError::ParseError(_))
        ));
    }
}
