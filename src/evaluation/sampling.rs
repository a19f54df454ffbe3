use crate::vm::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SamplingError {
    #[error("Sample set is empty")]
    Empty,
    #[error("Sample {index} has {found} inputs, expected {expected}")]
    ArityMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("Sample {index} expects 'undefined', which cannot be scored")]
    UndefinedExpectation { index: usize },
    #[error("A truth table over {arity} inputs has more rows than can be indexed")]
    ArityTooLarge { arity: usize },
}

/// One row of the truth table: an input tuple and the expected output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub inputs: Vec<Value>,
    pub expected: Value,
}

impl Sample {
    pub fn new(inputs: Vec<Value>, expected: Value) -> Self {
        Self { inputs, expected }
    }

    /// Builds a boolean sample from a row whose last element is the expected output.
    pub fn from_row(row: &[bool]) -> Option<Self> {
        let (expected, inputs) = row.split_last()?;
        Some(Self {
            inputs: inputs.iter().map(|&b| Value::Bool(b)).collect(),
            expected: Value::Bool(*expected),
        })
    }
}

/// Calculated and expected outputs of one phenotype over every sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleResult {
    pub calculated: Vec<Value>,
    pub expected: Vec<Value>,
}

/// The fixed, read-only sample set of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Sampling {
    samples: Vec<Sample>,
    arity: usize,
}

impl Sampling {
    /// Validates that there is at least one sample, all with the same arity and a
    /// defined expectation.
    pub fn new(samples: Vec<Sample>) -> Result<Self, SamplingError> {
        let arity = samples.first().ok_or(SamplingError::Empty)?.inputs.len();
        for (index, sample) in samples.iter().enumerate() {
            if sample.inputs.len() != arity {
                return Err(SamplingError::ArityMismatch {
                    index,
                    expected: arity,
                    found: sample.inputs.len(),
                });
            }
            if sample.expected.is_undefined() {
                return Err(SamplingError::UndefinedExpectation { index });
            }
        }
        Ok(Self { samples, arity })
    }

    /// The full truth table of a boolean function of `arity` inputs,
    /// rows ordered from all-`true` to all-`false`.
    ///
    /// Fails with `ArityTooLarge` when the row count does not fit in a `usize`.
    pub fn truth_table<F>(arity: usize, function: F) -> Result<Self, SamplingError>
    where
        F: Fn(&[bool]) -> bool,
    {
        if arity >= usize::BITS as usize {
            return Err(SamplingError::ArityTooLarge { arity });
        }
        let rows = 1usize << arity;
        let samples = (0..rows)
            .map(|row| {
                let inputs: Vec<bool> = (0..arity)
                    .map(|bit| row & (1 << (arity - 1 - bit)) == 0)
                    .collect();
                let expected = function(&inputs);
                Sample::new(
                    inputs.into_iter().map(Value::Bool).collect(),
                    Value::Bool(expected),
                )
            })
            .collect();
        Self::new(samples)
    }

    /// The XOR lookup table.
    pub fn xor() -> Self {
        Self {
            samples: [
                [true, true, false],
                [true, false, true],
                [false, true, true],
                [false, false, false],
            ]
            .iter()
            .filter_map(|row| Sample::from_row(row))
            .collect(),
            arity: 2,
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Applies `function` to every sample (with its index) and pairs the results with
    /// the expectations. Stops at the first error.
    pub fn eval<F, E>(&self, mut function: F) -> Result<SampleResult, E>
    where
        F: FnMut(usize, &Sample) -> Result<Value, E>,
    {
        let mut calculated = Vec::with_capacity(self.samples.len());
        for (index, sample) in self.samples.iter().enumerate() {
            calculated.push(function(index, sample)?);
        }
        Ok(SampleResult {
            calculated,
            expected: self.samples.iter().map(|s| s.expected).collect(),
        })
    }
}
