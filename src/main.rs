use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use truth_evolution::config::Config;
use truth_evolution::evaluation::FitnessEvaluator;
use truth_evolution::evolution::grammar::Grammar;
use truth_evolution::evolution::EvolutionEngine;
use truth_evolution::export::{write_export_to_json, RunExport};
use truth_evolution::vm::ScriptVm;

/// Reads the grammar file and builds the grammar, honouring an optional start symbol.
///
/// # Arguments
/// * `config` - Reference to the run `Config` naming the grammar file and start symbol.
///
/// # Returns
/// * `Ok((Grammar, String))` - The grammar and its raw text, kept for the run report.
/// * `Err(String)` - Error message if reading or parsing fails.
fn load_grammar(config: &Config) -> Result<(Grammar, String), String> {
    let content = fs::read_to_string(&config.grammar_file)
        .map_err(|e| format!("Failed to read '{}': {}", config.grammar_file, e))?;
    let mut grammar = Grammar::parse(&content).map_err(|e| e.to_string())?;
    if let Some(start) = &config.start_symbol {
        grammar = grammar.with_start(start).map_err(|e| e.to_string())?;
    }
    Ok((grammar, content))
}

fn main() {
    env_logger::init();
    log::info!("Booting truth-evolution...");

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    // 1. Load and Validate Configuration
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to load configuration '{}': {}", config_path.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        log::error!("Invalid configuration: {}", e);
        process::exit(1);
    }
    log::info!("Configuration loaded and validated.");

    // 2. Load Grammar
    let (grammar, grammar_content) = match load_grammar(&config) {
        Ok(g) => g,
        Err(e) => {
            log::error!("Failed to load grammar: {}", e);
            process::exit(1);
        }
    };
    log::info!(
        "Grammar '{}' loaded successfully: {} rules, start symbol {}.",
        config.grammar_file,
        grammar.rules().len(),
        grammar.start().name
    );

    // 3. Prepare Samples and Evaluator
    let sampling = match config.sampling() {
        Ok(s) => s,
        Err(e) => {
            log::error!("Invalid samples: {}", e);
            process::exit(1);
        }
    };
    let vm = ScriptVm::new(config.fitness.max_instructions);
    let evaluator = match FitnessEvaluator::new(&vm, &sampling, &config.fitness) {
        Ok(ev) => ev,
        Err(e) => {
            log::error!("Failed to build the fitness evaluator: {}", e);
            process::exit(1);
        }
    };
    log::info!("{} samples over parameters {:?}.", sampling.len(), config.fitness.parameters);

    // 4. Run the Evolution
    log::info!("--- Starting Evolution ---");
    let mut engine = match EvolutionEngine::new(&config.ga, &grammar, &evaluator) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Failed to build the evolution engine: {}", e);
            process::exit(1);
        }
    };
    let result = match engine.evolve() {
        Ok(result) => result,
        Err(e) => {
            log::error!("Evolution failed: {}", e);
            process::exit(1);
        }
    };

    println!("Generations: {}", result.generations);
    println!("Function:    {}", result.best_phenotype);
    println!("Error:       {}", result.best_fitness);

    // 5. Export the Run Report
    if let Some(export) = &config.export {
        let report = RunExport::new(&result, &config.ga, &config.fitness, grammar_content);
        match write_export_to_json(&report, Path::new(&export.path)) {
            Ok(()) => log::info!("Run report written to '{}'.", export.path),
            Err(e) => {
                log::error!("Failed to export the run report: {}", e);
                process::exit(1);
            }
        }
    }
}
