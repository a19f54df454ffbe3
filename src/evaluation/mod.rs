//! Fitness evaluation of phenotypes against a fixed sample set.
//!
//! A phenotype is compiled once by the [`ExecutionEnvironment`], executed for every
//! sample with the sample's inputs bound to the configured parameter names, and the
//! coerced results are reduced to a single error by a [`LossFunction`].

pub mod loss;
pub mod sampling;

pub use loss::LossFunction;

use crate::config::{ConfigError, FitnessConfig};
use crate::evaluation::sampling::Sampling;
use crate::phenotype::Phenotype;
use crate::vm::{Bindings, ExecutionEnvironment, ExecutionError, Value};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a fault does to the individual that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// The faulting sample scores the worst possible value; the run continues.
    #[default]
    WorstCase,
    /// The fault is returned as an `EvaluationError` and stops the run.
    Abort,
}

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Phenotype '{phenotype}' does not compile: {source}")]
    Compile {
        phenotype: String,
        source: ExecutionError,
    },
    #[error("Phenotype '{phenotype}' failed on sample {sample}: {source}")]
    Execution {
        phenotype: String,
        sample: usize,
        source: ExecutionError,
    },
    #[error("Phenotype '{phenotype}' returned {value} on sample {sample}, expected a {expected}")]
    Uncoercible {
        phenotype: String,
        sample: usize,
        value: Value,
        expected: &'static str,
    },
    #[error("{0}")]
    Custom(String),
}

/// Scalar fitness of one phenotype and the faults absorbed while computing it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitnessReport {
    pub fitness: f64,
    /// Samples scored as worst case after an execution fault
    pub execution_faults: usize,
    /// The phenotype did not compile and was scored as worst case
    pub syntax_error: bool,
}

impl FitnessReport {
    pub fn clean(fitness: f64) -> Self {
        Self {
            fitness,
            execution_faults: 0,
            syntax_error: false,
        }
    }
}

/// Anything that can score a phenotype. Evaluation runs on the rayon pool, hence `Sync`.
pub trait FitnessFunction: Sync {
    fn evaluate(&self, phenotype: &Phenotype) -> Result<FitnessReport, EvaluationError>;
}

impl<F> FitnessFunction for F
where
    F: Fn(&Phenotype) -> Result<f64, EvaluationError> + Sync,
{
    fn evaluate(&self, phenotype: &Phenotype) -> Result<FitnessReport, EvaluationError> {
        self(phenotype).map(FitnessReport::clean)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::Undefined => "undefined",
    }
}

/// Converts an execution result to the type of the expected output.
///
/// `undefined` becomes `false` or `0`, and booleans become `1`/`0` when a number is
/// expected. A number where a boolean is expected has no conversion.
pub fn coerce(actual: Value, expected: &Value) -> Option<Value> {
    match (expected, actual) {
        (Value::Bool(_), Value::Bool(b)) => Some(Value::Bool(b)),
        (Value::Bool(_), Value::Undefined) => Some(Value::Bool(false)),
        (Value::Bool(_), Value::Number(_)) => None,
        (Value::Number(_), Value::Number(n)) => Some(Value::Number(n)),
        (Value::Number(_), Value::Bool(b)) => Some(Value::Number(if b { 1.0 } else { 0.0 })),
        (Value::Number(_), Value::Undefined) => Some(Value::Number(0.0)),
        (Value::Undefined, _) => None,
    }
}

/// The value scoring the largest possible error against `expected`.
pub fn worst_case(expected: &Value) -> Value {
    match expected {
        Value::Bool(b) => Value::Bool(!b),
        Value::Number(_) | Value::Undefined => Value::Number(f64::INFINITY),
    }
}

fn encode(value: &Value) -> f64 {
    match value {
        Value::Bool(true) => 1.0,
        Value::Bool(false) | Value::Undefined => 0.0,
        Value::Number(n) => *n,
    }
}

/// Scores phenotypes by running them through an execution environment.
pub struct FitnessEvaluator<'a, E: ExecutionEnvironment> {
    environment: &'a E,
    sampling: &'a Sampling,
    /// Input `i` of a sample is bound to `parameters[i]`
    parameters: Vec<String>,
    loss: LossFunction,
    on_fault: FaultPolicy,
    on_syntax_error: FaultPolicy,
}

impl<'a, E: ExecutionEnvironment> FitnessEvaluator<'a, E> {
    /// Creates an evaluator, checking the parameter names can bind the samples.
    ///
    /// # Arguments
    /// * `environment` - The execution collaborator running phenotypes
    /// * `sampling` - The fixed sample set of the run
    /// * `config` - Parameter names, loss function and fault policies
    ///
    /// # Returns
    /// * `Ok(Self)` - A ready evaluator
    /// * `Err(ConfigError)` - If the fitness section is invalid for these samples
    pub fn new(
        environment: &'a E,
        sampling: &'a Sampling,
        config: &FitnessConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        config.check_arity(sampling)?;
        Ok(Self {
            environment,
            sampling,
            parameters: config.parameters.clone(),
            loss: config.loss,
            on_fault: config.on_fault,
            on_syntax_error: config.on_syntax_error,
        })
    }

    pub fn sampling(&self) -> &Sampling {
        self.sampling
    }

    /// Computes the error of a phenotype over every sample.
    pub fn fitness(&self, phenotype: &Phenotype) -> Result<FitnessReport, EvaluationError> {
        let program = match self.environment.compile(phenotype.as_str()) {
            Ok(program) => program,
            Err(source) => return self.compile_fault(phenotype, source),
        };

        let mut execution_faults = 0;
        let mut bindings = Bindings::with_capacity(self.parameters.len());
        let result = self.sampling.eval(|index, sample| {
            bindings.clear();
            bindings.extend(
                self.parameters
                    .iter()
                    .cloned()
                    .zip(sample.inputs.iter().copied()),
            );
            let outcome = self
                .environment
                .execute(&program, &bindings)
                .map_err(|source| EvaluationError::Execution {
                    phenotype: phenotype.source.clone(),
                    sample: index,
                    source,
                })
                .and_then(|value| {
                    coerce(value, &sample.expected).ok_or_else(|| EvaluationError::Uncoercible {
                        phenotype: phenotype.source.clone(),
                        sample: index,
                        value,
                        expected: type_name(&sample.expected),
                    })
                });
            match (outcome, self.on_fault) {
                (Ok(value), _) => Ok(value),
                (Err(e), FaultPolicy::Abort) => Err(e),
                (Err(e), FaultPolicy::WorstCase) => {
                    debug!("{}. Scoring the sample as worst case.", e);
                    execution_faults += 1;
                    Ok(worst_case(&sample.expected))
                }
            }
        })?;

        Ok(FitnessReport {
            fitness: self.reduce(&result.calculated, &result.expected),
            execution_faults,
            syntax_error: false,
        })
    }

    fn compile_fault(
        &self,
        phenotype: &Phenotype,
        source: ExecutionError,
    ) -> Result<FitnessReport, EvaluationError> {
        let error = EvaluationError::Compile {
            phenotype: phenotype.source.clone(),
            source,
        };
        match self.on_syntax_error {
            FaultPolicy::Abort => Err(error),
            FaultPolicy::WorstCase => {
                debug!("{}. Scoring every sample as worst case.", error);
                let expected: Vec<Value> =
                    self.sampling.samples().iter().map(|s| s.expected).collect();
                let calculated: Vec<Value> = expected.iter().map(worst_case).collect();
                Ok(FitnessReport {
                    fitness: self.reduce(&calculated, &expected),
                    execution_faults: 0,
                    syntax_error: true,
                })
            }
        }
    }

    fn reduce(&self, calculated: &[Value], expected: &[Value]) -> f64 {
        let calculated: Vec<f64> = calculated.iter().map(encode).collect();
        let expected: Vec<f64> = expected.iter().map(encode).collect();
        self.loss.apply(&calculated, &expected)
    }
}

impl<E: ExecutionEnvironment> FitnessFunction for FitnessEvaluator<'_, E> {
    fn evaluate(&self, phenotype: &Phenotype) -> Result<FitnessReport, EvaluationError> {
        self.fitness(phenotype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::sampling::Sample;
    use crate::vm::ScriptVm;

    fn get_test_config() -> FitnessConfig {
        FitnessConfig::default()
    }

    fn score(source: &str, config: &FitnessConfig) -> Result<FitnessReport, EvaluationError> {
        let vm = ScriptVm::default();
        let sampling = Sampling::xor();
        let evaluator = FitnessEvaluator::new(&vm, &sampling, config).unwrap();
        evaluator.fitness(&Phenotype::new(source))
    }

    #[test]
    fn test_perfect_phenotype_scores_zero() {
        let report = score("(x) != (y)", &get_test_config()).unwrap();
        assert_eq!(report, FitnessReport::clean(0.0));
        let report = score("((x) || (y)) && (!((x) && (y)))", &get_test_config()).unwrap();
        assert_eq!(report.fitness, 0.0);
    }

    #[test]
    fn test_partial_match_uses_mse() {
        // `x` is right on two rows out of four
        let report = score("x", &get_test_config()).unwrap();
        assert!((report.fitness - 0.5).abs() < 1e-12);
        // `(x) == (y)` is wrong on every row
        let report = score("(x) == (y)", &get_test_config()).unwrap();
        assert!((report.fitness - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_phenotype_reads_as_false() {
        let report = score("", &get_test_config()).unwrap();
        assert_eq!(report.execution_faults, 0);
        assert!(!report.syntax_error);
        assert!((report.fitness - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_syntax_error_policies() {
        let mut config = get_test_config();
        let report = score("(x) && (", &config).unwrap();
        assert!(report.syntax_error);
        assert!((report.fitness - 1.0).abs() < 1e-12);

        config.on_syntax_error = FaultPolicy::Abort;
        assert!(matches!(
            score("(x) && (", &config),
            Err(EvaluationError::Compile { .. })
        ));
    }

    #[test]
    fn test_execution_fault_policies() {
        let mut config = get_test_config();
        let report = score("(x) && (z)", &config).unwrap();
        // `z` is only reached on the rows where x is true
        assert_eq!(report.execution_faults, 2);
        assert!(!report.syntax_error);

        config.on_fault = FaultPolicy::Abort;
        match score("(x) && (z)", &config) {
            Err(EvaluationError::Execution { sample, source, .. }) => {
                assert_eq!(sample, 0);
                assert_eq!(source, ExecutionError::UnboundVariable("z".to_string()));
            }
            other => panic!("expected an execution error, got {:?}", other),
        }
    }

    #[test]
    fn test_number_for_boolean_is_a_fault() {
        let report = score("(x) ? 1 : 0", &get_test_config()).unwrap();
        assert_eq!(report.execution_faults, 4);
        assert!((report.fitness - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_numeric_samples() {
        let vm = ScriptVm::default();
        let sampling = Sampling::new(vec![
            Sample::new(vec![Value::Number(1.0)], Value::Number(2.0)),
            Sample::new(vec![Value::Number(3.0)], Value::Number(6.0)),
        ])
        .unwrap();
        let config = FitnessConfig {
            parameters: vec!["a".to_string()],
            loss: LossFunction::Mae,
            ..get_test_config()
        };
        let evaluator = FitnessEvaluator::new(&vm, &sampling, &config).unwrap();
        assert_eq!(evaluator.fitness(&Phenotype::new("a * 2")).unwrap().fitness, 0.0);
        assert_eq!(evaluator.fitness(&Phenotype::new("a + 1")).unwrap().fitness, 1.0);
        // booleans are read as 1/0 against numbers
        assert_eq!(evaluator.fitness(&Phenotype::new("a > 2")).unwrap().fitness, 3.5);
    }

    #[test]
    fn test_arity_mismatch_is_rejected() {
        let vm = ScriptVm::default();
        let sampling = Sampling::xor();
        let config = FitnessConfig {
            parameters: vec!["x".to_string()],
            ..get_test_config()
        };
        assert!(matches!(
            FitnessEvaluator::new(&vm, &sampling, &config),
            Err(ConfigError::ParameterArity { .. })
        ));
    }

    #[test]
    fn test_closures_are_fitness_functions() {
        let length = |p: &Phenotype| -> Result<f64, EvaluationError> { Ok(p.as_str().len() as f64) };
        let report = length.evaluate(&Phenotype::new("abc")).unwrap();
        assert_eq!(report, FitnessReport::clean(3.0));
    }

    #[test]
    fn test_coercion_rules() {
        assert_eq!(coerce(Value::Undefined, &Value::Bool(true)), Some(Value::Bool(false)));
        assert_eq!(coerce(Value::Bool(true), &Value::Number(0.0)), Some(Value::Number(1.0)));
        assert_eq!(coerce(Value::Undefined, &Value::Number(5.0)), Some(Value::Number(0.0)));
        assert_eq!(coerce(Value::Number(1.0), &Value::Bool(true)), None);
        assert_eq!(worst_case(&Value::Bool(true)), Value::Bool(false));
    }
}
