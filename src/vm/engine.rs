use crate::vm::op::{Op, Program};
use crate::vm::value::Value;
use crate::vm::{Bindings, ExecutionError};

const STACK_CAPACITY: usize = 256;

pub struct VirtualMachine {
    stack: Vec<Value>,
    /// Maximum number of instructions a single execution may run
    max_instructions: usize,
}

impl VirtualMachine {
    pub fn new(max_instructions: usize) -> Self {
        Self {
            stack: Vec::with_capacity(STACK_CAPACITY),
            max_instructions,
        }
    }

    #[cfg(test)]
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Runs a program against named bindings.
    ///
    /// An empty program evaluates to `Value::Undefined`. Variables are resolved when
    /// they are loaded, so an unbound name on a short-circuited branch is not an error.
    pub fn execute(&mut self, program: &Program, bindings: &Bindings) -> Result<Value, ExecutionError> {
        self.stack.clear();
        if program.is_empty() {
            return Ok(Value::Undefined);
        }
        let ops = &program.ops;
        let mut pc = 0;
        let mut executed = 0;

        while pc < ops.len() {
            executed += 1;
            if executed > self.max_instructions {
                return Err(ExecutionError::Timeout {
                    limit: self.max_instructions,
                });
            }
            let op = &ops[pc];
            pc += 1;
            match op {
                Op::PushConstant(val) => self.push(*val)?,
                Op::Load(slot) => {
                    let name = program
                        .variables
                        .get(*slot)
                        .ok_or(ExecutionError::InvalidProgram)?;
                    let val = bindings
                        .get(name)
                        .copied()
                        .ok_or_else(|| ExecutionError::UnboundVariable(name.clone()))?;
                    self.push(val)?;
                }
                Op::Not => {
                    let val = self.pop()?;
                    self.push(Value::Bool(!val.truthy()))?;
                }
                Op::Negate => {
                    let val = self.pop()?;
                    self.push(Value::Number(-val.to_number()))?;
                }
                Op::ToNumber => {
                    let val = self.pop()?;
                    self.push(Value::Number(val.to_number()))?;
                }
                Op::Add => self.apply_numeric(|a, b| a + b)?,
                Op::Subtract => self.apply_numeric(|a, b| a - b)?,
                Op::Multiply => self.apply_numeric(|a, b| a * b)?,
                Op::Divide => self.apply_numeric(|a, b| a / b)?,
                Op::Remainder => self.apply_numeric(|a, b| a % b)?,
                Op::LessThan => self.apply_comparison(|a, b| a.to_number() < b.to_number())?,
                Op::LessThanOrEqual => {
                    self.apply_comparison(|a, b| a.to_number() <= b.to_number())?
                }
                Op::GreaterThan => self.apply_comparison(|a, b| a.to_number() > b.to_number())?,
                Op::GreaterThanOrEqual => {
                    self.apply_comparison(|a, b| a.to_number() >= b.to_number())?
                }
                Op::Equal => self.apply_comparison(|a, b| a.loose_eq(b))?,
                Op::NotEqual => self.apply_comparison(|a, b| !a.loose_eq(b))?,
                Op::StrictEqual => self.apply_comparison(|a, b| a.strict_eq(b))?,
                Op::StrictNotEqual => self.apply_comparison(|a, b| !a.strict_eq(b))?,
                Op::JumpIfFalse(target) => {
                    let condition = self.pop()?;
                    if !condition.truthy() {
                        pc = *target;
                    }
                }
                Op::JumpIfFalseKeep(target) => {
                    if self.peek()?.truthy() {
                        self.pop()?;
                    } else {
                        pc = *target;
                    }
                }
                Op::JumpIfTrueKeep(target) => {
                    if self.peek()?.truthy() {
                        pc = *target;
                    } else {
                        self.pop()?;
                    }
                }
                Op::Jump(target) => pc = *target,
            }
        }

        let result = self.pop()?;
        if !self.stack.is_empty() {
            return Err(ExecutionError::InvalidProgram);
        }
        Ok(result)
    }

    #[inline]
    fn push(&mut self, val: Value) -> Result<(), ExecutionError> {
        if self.stack.len() < STACK_CAPACITY {
            self.stack.push(val);
            Ok(())
        } else {
            Err(ExecutionError::StackOverflow)
        }
    }

    #[inline]
    fn pop(&mut self) -> Result<Value, ExecutionError> {
        self.stack.pop().ok_or(ExecutionError::StackUnderflow)
    }

    #[inline]
    fn peek(&self) -> Result<Value, ExecutionError> {
        self.stack.last().copied().ok_or(ExecutionError::StackUnderflow)
    }

    #[inline]
    fn apply_numeric<F>(&mut self, op: F) -> Result<(), ExecutionError>
    where
        F: Fn(f64, f64) -> f64,
    {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(Value::Number(op(a.to_number(), b.to_number())))
    }

    #[inline]
    fn apply_comparison<F>(&mut self, op: F) -> Result<(), ExecutionError>
    where
        F: Fn(&Value, &Value) -> bool,
    {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(Value::Bool(op(&a, &b)))
    }
}
