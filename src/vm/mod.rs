//! Execution environment for rendered phenotypes.
//!
//! The evolutionary core only sees the [`ExecutionEnvironment`] trait: compile a
//! phenotype's source once, then execute it against named bindings for every sample.
//! [`ScriptVm`] is the native implementation for the JavaScript-like boolean
//! expressions the bundled grammars produce.

pub mod compiler;
pub mod engine;
pub mod op;
pub mod value;

use crate::vm::engine::VirtualMachine;
use crate::vm::op::Program;
use std::collections::HashMap;
use thiserror::Error;

pub use value::Value;

/// Named parameter bindings, e.g. `x -> true, y -> false`.
pub type Bindings = HashMap<String, Value>;

/// Default instruction budget for a single execution.
pub const DEFAULT_MAX_INSTRUCTIONS: usize = 4096;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("'{0}' is not defined")]
    UnboundVariable(String),
    #[error("Execution exceeded its budget of {limit} instructions")]
    Timeout { limit: usize },
    #[error("Stack overflow")]
    StackOverflow,
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Invalid program")]
    InvalidProgram,
}

impl ExecutionError {
    pub fn is_syntax(&self) -> bool {
        matches!(self, ExecutionError::Syntax { .. })
    }
}

/// A pure function boundary from (source, bindings) to a value or a fault.
pub trait ExecutionEnvironment: Send + Sync {
    type Program: Send + Sync;

    fn compile(&self, source: &str) -> Result<Self::Program, ExecutionError>;

    fn execute(&self, program: &Self::Program, bindings: &Bindings) -> Result<Value, ExecutionError>;
}

/// Compiles scripts to stack bytecode and runs them with an instruction budget,
/// which plays the role of a per-call timeout.
#[derive(Debug, Clone, Copy)]
pub struct ScriptVm {
    max_instructions: usize,
}

impl Default for ScriptVm {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INSTRUCTIONS)
    }
}

impl ScriptVm {
    pub fn new(max_instructions: usize) -> Self {
        Self { max_instructions }
    }

    /// Compiles and runs `source` in one go.
    pub fn eval(&self, source: &str, bindings: &Bindings) -> Result<Value, ExecutionError> {
        let program = self.compile(source)?;
        self.execute(&program, bindings)
    }
}

impl ExecutionEnvironment for ScriptVm {
    type Program = Program;

    fn compile(&self, source: &str) -> Result<Program, ExecutionError> {
        compiler::compile(source)
    }

    fn execute(&self, program: &Program, bindings: &Bindings) -> Result<Value, ExecutionError> {
        VirtualMachine::new(self.max_instructions).execute(program, bindings)
    }
}
