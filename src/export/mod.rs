//! Run report export.
//!
//! A finished run is written as JSON together with everything needed to reproduce
//! it: the GA and fitness configuration, the grammar text and a hash of it.

use crate::config::{FitnessConfig, GaConfig};
use crate::evolution::genotype::Genotype;
use crate::evolution::{RunResult, Termination};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use thiserror::Error;

pub const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to access export file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to (de)serialize export: {0}")]
    Json(#[from] serde_json::Error),
}

/// Complete report of a finished run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunExport {
    /// Schema version for forward/backward compatibility
    pub schema_version: String,
    /// Unix timestamp when export was generated
    pub generated_at: u64,
    pub ga: GaConfig,
    pub fitness: FitnessConfig,
    /// Full content of the grammar file
    pub grammar_content: String,
    /// Hash of grammar content for verification
    pub grammar_hash: String,
    pub champion: ChampionData,
}

/// The best individual of the run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChampionData {
    pub phenotype: String,
    /// `None` when the best fitness was not a finite number
    pub fitness: Option<f64>,
    pub genotype: Genotype,
    pub generations: usize,
    pub termination: Termination,
}

impl RunExport {
    /// Creates a new export from the result of a run.
    ///
    /// # Arguments
    /// * `result` - The outcome returned by the engine
    /// * `ga` - GA configuration of the run
    /// * `fitness` - Fitness configuration of the run
    /// * `grammar_content` - Content of the grammar file
    ///
    /// # Returns
    /// A new `RunExport` instance ready for serialization.
    pub fn new(result: &RunResult, ga: &GaConfig, fitness: &FitnessConfig, grammar_content: String) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: chrono::Utc::now().timestamp() as u64,
            ga: ga.clone(),
            fitness: fitness.clone(),
            grammar_hash: compute_grammar_hash(&grammar_content),
            grammar_content,
            champion: ChampionData {
                phenotype: result.best_phenotype.clone(),
                fitness: result.best_fitness.is_finite().then_some(result.best_fitness),
                genotype: result.best_genotype.clone(),
                generations: result.generations,
                termination: result.termination,
            },
        }
    }

    /// Validates that grammar hash matches grammar content.
    pub fn validate_grammar_hash(&self) -> bool {
        compute_grammar_hash(&self.grammar_content) == self.grammar_hash
    }
}

/// Computes a hash of grammar content for reproducibility.
fn compute_grammar_hash(grammar_content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    grammar_content.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Writes a run export to a JSON file.
pub fn write_export_to_json(export: &RunExport, output_path: &Path) -> Result<(), ExportError> {
    let json = serde_json::to_string_pretty(export)?;
    fs::write(output_path, json)?;
    Ok(())
}

/// Reads a run export from a JSON file.
pub fn read_export_from_json(input_path: &Path) -> Result<RunExport, ExportError> {
    let content = fs::read_to_string(input_path)?;
    let export: RunExport = serde_json::from_str(&content)?;
    Ok(export)
}
