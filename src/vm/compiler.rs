use crate::vm::op::{Op, Program};
use crate::vm::value::Value;
use crate::vm::ExecutionError;

/// Deepest parenthesis/operator nesting accepted before giving up.
const MAX_NESTING: usize = 256;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    LParen,
    RParen,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    EqualEqual,
    BangEqual,
    EqualEqualEqual,
    BangEqualEqual,
    AndAnd,
    OrOr,
    Question,
    Colon,
    Semicolon,
}

fn syntax_error(position: usize, message: impl Into<String>) -> ExecutionError {
    ExecutionError::Syntax {
        position,
        message: message.into(),
    }
}

fn lex(source: &str) -> Result<Vec<(usize, Token)>, ExecutionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| syntax_error(start, format!("invalid number '{}'", text)))?;
            tokens.push((start, Token::Number(value)));
            continue;
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let after = chars.get(i + 2).copied();
        let (token, width) = match (c, next, after) {
            ('=', Some('='), Some('=')) => (Token::EqualEqualEqual, 3),
            ('!', Some('='), Some('=')) => (Token::BangEqualEqual, 3),
            ('=', Some('='), _) => (Token::EqualEqual, 2),
            ('!', Some('='), _) => (Token::BangEqual, 2),
            ('<', Some('='), _) => (Token::LessEqual, 2),
            ('>', Some('='), _) => (Token::GreaterEqual, 2),
            ('&', Some('&'), _) => (Token::AndAnd, 2),
            ('|', Some('|'), _) => (Token::OrOr, 2),
            ('!', _, _) => (Token::Bang, 1),
            ('<', _, _) => (Token::Less, 1),
            ('>', _, _) => (Token::Greater, 1),
            ('(', _, _) => (Token::LParen, 1),
            (')', _, _) => (Token::RParen, 1),
            ('+', _, _) => (Token::Plus, 1),
            ('-', _, _) => (Token::Minus, 1),
            ('*', _, _) => (Token::Star, 1),
            ('/', _, _) => (Token::Slash, 1),
            ('%', _, _) => (Token::Percent, 1),
            ('?', _, _) => (Token::Question, 1),
            (':', _, _) => (Token::Colon, 1),
            (';', _, _) => (Token::Semicolon, 1),
            _ => return Err(syntax_error(start, format!("unexpected character '{}'", c))),
        };
        tokens.push((start, token));
        i += width;
    }
    Ok(tokens)
}

/// Recursive-descent parser emitting stack bytecode directly.
/// Precedence, loosest first: `?:`, `||`, `&&`, equality, relational,
/// additive, multiplicative, unary.
struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    depth: usize,
    program: Program,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(p, _)| *p)
            .unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn emit(&mut self, op: Op) -> usize {
        self.program.ops.push(op);
        self.program.ops.len() - 1
    }

    /// Points a previously emitted jump at the next instruction.
    fn patch(&mut self, at: usize) {
        let target = self.program.ops.len();
        match self.program.ops.get_mut(at) {
            Some(Op::JumpIfFalse(t))
            | Some(Op::JumpIfFalseKeep(t))
            | Some(Op::JumpIfTrueKeep(t))
            | Some(Op::Jump(t)) => *t = target,
            _ => {}
        }
    }

    fn enter(&mut self) -> Result<(), ExecutionError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(syntax_error(self.position(), "expression nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<(), ExecutionError> {
        self.enter()?;
        self.logical_or()?;
        if self.eat(&Token::Question) {
            let to_else = self.emit(Op::JumpIfFalse(0));
            self.expression()?;
            let to_end = self.emit(Op::Jump(0));
            if !self.eat(&Token::Colon) {
                return Err(syntax_error(self.position(), "expected ':' in conditional"));
            }
            self.patch(to_else);
            self.expression()?;
            self.patch(to_end);
        }
        self.depth -= 1;
        Ok(())
    }

    fn logical_or(&mut self) -> Result<(), ExecutionError> {
        self.logical_and()?;
        while self.eat(&Token::OrOr) {
            let jump = self.emit(Op::JumpIfTrueKeep(0));
            self.logical_and()?;
            self.patch(jump);
        }
        Ok(())
    }

    fn logical_and(&mut self) -> Result<(), ExecutionError> {
        self.equality()?;
        while self.eat(&Token::AndAnd) {
            let jump = self.emit(Op::JumpIfFalseKeep(0));
            self.equality()?;
            self.patch(jump);
        }
        Ok(())
    }

    fn equality(&mut self) -> Result<(), ExecutionError> {
        self.relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqualEqual) => Op::Equal,
                Some(Token::BangEqual) => Op::NotEqual,
                Some(Token::EqualEqualEqual) => Op::StrictEqual,
                Some(Token::BangEqualEqual) => Op::StrictNotEqual,
                _ => return Ok(()),
            };
            self.pos += 1;
            self.relational()?;
            self.emit(op);
        }
    }

    fn relational(&mut self) -> Result<(), ExecutionError> {
        self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Less) => Op::LessThan,
                Some(Token::LessEqual) => Op::LessThanOrEqual,
                Some(Token::Greater) => Op::GreaterThan,
                Some(Token::GreaterEqual) => Op::GreaterThanOrEqual,
                _ => return Ok(()),
            };
            self.pos += 1;
            self.additive()?;
            self.emit(op);
        }
    }

    fn additive(&mut self) -> Result<(), ExecutionError> {
        self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Op::Add,
                Some(Token::Minus) => Op::Subtract,
                _ => return Ok(()),
            };
            self.pos += 1;
            self.multiplicative()?;
            self.emit(op);
        }
    }

    fn multiplicative(&mut self) -> Result<(), ExecutionError> {
        self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Op::Multiply,
                Some(Token::Slash) => Op::Divide,
                Some(Token::Percent) => Op::Remainder,
                _ => return Ok(()),
            };
            self.pos += 1;
            self.unary()?;
            self.emit(op);
        }
    }

    fn unary(&mut self) -> Result<(), ExecutionError> {
        let op = match self.peek() {
            Some(Token::Bang) => Op::Not,
            Some(Token::Minus) => Op::Negate,
            Some(Token::Plus) => Op::ToNumber,
            _ => return self.primary(),
        };
        self.pos += 1;
        self.enter()?;
        self.unary()?;
        self.depth -= 1;
        self.emit(op);
        Ok(())
    }

    fn primary(&mut self) -> Result<(), ExecutionError> {
        let position = self.position();
        match self.advance() {
            Some(Token::Number(n)) => {
                self.emit(Op::PushConstant(Value::Number(n)));
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => {
                    self.emit(Op::PushConstant(Value::Bool(true)));
                }
                "false" => {
                    self.emit(Op::PushConstant(Value::Bool(false)));
                }
                "undefined" => {
                    self.emit(Op::PushConstant(Value::Undefined));
                }
                _ => {
                    let slot = self.program.variable_slot(&name);
                    self.emit(Op::Load(slot));
                }
            },
            Some(Token::LParen) => {
                self.expression()?;
                if !self.eat(&Token::RParen) {
                    return Err(syntax_error(self.position(), "expected ')'"));
                }
            }
            Some(token) => {
                return Err(syntax_error(position, format!("unexpected token {:?}", token)));
            }
            None => return Err(syntax_error(position, "unexpected end of script")),
        }
        Ok(())
    }
}

/// Compiles script source into a `Program`.
///
/// An empty (or whitespace-only) script compiles to an empty program, which
/// evaluates to `undefined`. A trailing `;` is accepted.
pub fn compile(source: &str) -> Result<Program, ExecutionError> {
    let tokens = lex(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
        depth: 0,
        program: Program::default(),
    };

    while parser.eat(&Token::Semicolon) {}
    if parser.peek().is_none() {
        return Ok(parser.program);
    }

    parser.expression()?;
    while parser.eat(&Token::Semicolon) {}
    if parser.peek().is_some() {
        return Err(syntax_error(parser.position(), "unexpected trailing input"));
    }
    Ok(parser.program)
}
