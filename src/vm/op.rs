use crate::vm::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // --- Data Loading ---
    PushConstant(Value),
    /// Pushes the bound value of the program's n-th variable
    Load(usize),

    // --- Operators ---
    Not,
    Negate,
    ToNumber,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,

    // --- Control Flow ---
    /// Pops the condition and jumps when it is falsy
    JumpIfFalse(usize),
    /// `&&`: jumps keeping the top when it is falsy, pops it otherwise
    JumpIfFalseKeep(usize),
    /// `||`: jumps keeping the top when it is truthy, pops it otherwise
    JumpIfTrueKeep(usize),
    Jump(usize),
}

/// Compiled script: bytecode plus the names its `Load` ops refer to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub ops: Vec<Op>,
    pub variables: Vec<String>,
}

impl Program {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Index of a variable name, registering it on first use.
    pub fn variable_slot(&mut self, name: &str) -> usize {
        if let Some(i) = self.variables.iter().position(|v| v == name) {
            return i;
        }
        self.variables.push(name.to_string());
        self.variables.len() - 1
    }
}
