use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrammarError {
    #[error("Failed to read grammar file: {0}")]
    FileReadError(#[from] std::io::Error),
    #[error("Failed to parse rule on line {line}: '{content}'")]
    ParseError { line: usize, content: String },
    #[error("Grammar defines no rules")]
    EmptyGrammar,
    #[error("Rule '{0}' is defined more than once")]
    DuplicateRule(String),
    #[error("Rule '{0}' has no alternatives")]
    NoAlternatives(String),
    #[error("Rule '{0}' contains an empty alternative")]
    EmptyAlternative(String),
    #[error("Undefined non-terminal referenced in grammar: '{0}'")]
    UndefinedNonTerminal(String),
    #[error("Start symbol '{0}' not found in grammar")]
    MissingStartSymbol(String),
}

/// A grammar symbol. Non-terminal names keep their angle brackets (`<expr>`),
/// terminal values are copied verbatim into the phenotype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Symbol {
    NonTerminal(String),
    Terminal(String),
}

impl Symbol {
    pub fn non_terminal(name: impl Into<String>) -> Self {
        Symbol::NonTerminal(name.into())
    }

    pub fn terminal(value: impl Into<String>) -> Self {
        Symbol::Terminal(value.into())
    }

    pub fn is_non_terminal(&self) -> bool {
        matches!(self, Symbol::NonTerminal(_))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::NonTerminal(name) => write!(f, "{}", name),
            Symbol::Terminal(value) => write!(f, "'{}'", value),
        }
    }
}

/// One production rule: a non-terminal and its ordered alternatives.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub alternatives: Vec<Vec<Symbol>>,
}

impl Rule {
    pub fn new(name: impl Into<String>, alternatives: Vec<Vec<Symbol>>) -> Self {
        Self {
            name: name.into(),
            alternatives,
        }
    }
}

/// An immutable, validated context-free grammar.
///
/// Rules keep their definition order, which is also the order of the
/// chromosomes in every genotype decoded against this grammar.
#[derive(Debug, Clone)]
pub struct Grammar {
    rules: Vec<Rule>,
    index: HashMap<String, usize>,
    start: usize,
}

lazy_static! {
    static ref TOKEN_REGEX: Regex = Regex::new(
        r#"(?P<nt><[^<>\s]+>)|'(?P<sq>[^']*)'|"(?P<dq>[^"]*)"|(?P<def>::=)|(?P<alt>\|)|(?P<bare>[^\s<>'"|]+)"#
    )
    .unwrap();
}

#[derive(Debug, PartialEq)]
enum Token {
    Symbol(Symbol),
    Define,
    Alternative,
}

fn tokenize(line: &str, line_no: usize) -> Result<Vec<Token>, GrammarError> {
    let parse_error = || GrammarError::ParseError {
        line: line_no,
        content: line.to_string(),
    };
    let mut tokens = Vec::new();
    let mut cursor = 0;
    for caps in TOKEN_REGEX.captures_iter(line) {
        let Some(whole) = caps.get(0) else { continue };
        // anything the regex skipped over must be whitespace
        if !line[cursor..whole.start()].trim().is_empty() {
            return Err(parse_error());
        }
        cursor = whole.end();

        let token = if let Some(m) = caps.name("nt") {
            Token::Symbol(Symbol::non_terminal(m.as_str()))
        } else if let Some(m) = caps.name("sq").or_else(|| caps.name("dq")) {
            Token::Symbol(Symbol::terminal(m.as_str()))
        } else if caps.name("def").is_some() {
            Token::Define
        } else if caps.name("alt").is_some() {
            Token::Alternative
        } else if let Some(m) = caps.name("bare") {
            Token::Symbol(Symbol::terminal(m.as_str()))
        } else {
            return Err(parse_error());
        };
        tokens.push(token);
    }
    if !line[cursor..].trim().is_empty() {
        return Err(parse_error());
    }
    Ok(tokens)
}

/// Splits a token stream on `|`. Empty alternatives are kept so that
/// validation can report them against the rule name.
fn split_alternatives(tokens: Vec<Token>, line_no: usize, line: &str) -> Result<Vec<Vec<Symbol>>, GrammarError> {
    let mut alternatives = vec![Vec::new()];
    for token in tokens {
        match token {
            Token::Symbol(symbol) => {
                if let Some(current) = alternatives.last_mut() {
                    current.push(symbol);
                }
            }
            Token::Alternative => alternatives.push(Vec::new()),
            Token::Define => {
                return Err(GrammarError::ParseError {
                    line: line_no,
                    content: line.to_string(),
                })
            }
        }
    }
    Ok(alternatives)
}

impl Grammar {
    /// Builds a grammar from rules, the first rule being the start symbol.
    ///
    /// # Arguments
    /// * `rules` - Rules in definition order
    ///
    /// # Returns
    /// * `Result<Self, GrammarError>` - The validated `Grammar`, or the first structural problem found
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self, GrammarError> {
        let mut index = HashMap::with_capacity(rules.len());
        for (i, rule) in rules.iter().enumerate() {
            if index.insert(rule.name.clone(), i).is_some() {
                return Err(GrammarError::DuplicateRule(rule.name.clone()));
            }
        }
        let grammar = Self {
            rules,
            index,
            start: 0,
        };
        grammar.validate()?;
        Ok(grammar)
    }

    /// Parses BNF text such as
    ///
    /// ```text
    /// <expr> ::= x | y | (<expr>)&&(<expr>) | !(<expr>)
    /// ```
    ///
    /// Quoted terminals keep their whitespace; whitespace between bare tokens is dropped.
    /// Lines starting with `|` continue the previous rule and `#` starts a comment line.
    pub fn parse(text: &str) -> Result<Self, GrammarError> {
        let mut rules: Vec<Rule> = Vec::new();

        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let tokens = tokenize(line, line_no)?;
            let parse_error = || GrammarError::ParseError {
                line: line_no,
                content: line.to_string(),
            };
            let is_rule_head = matches!(tokens.first(), Some(Token::Symbol(Symbol::NonTerminal(_))))
                && tokens.get(1) == Some(&Token::Define);
            let mut iter = tokens.into_iter();

            match iter.next() {
                Some(Token::Symbol(Symbol::NonTerminal(name))) if is_rule_head => {
                    // skip `::=`
                    iter.next();
                    let rest: Vec<Token> = iter.collect();
                    if rest.is_empty() {
                        return Err(GrammarError::NoAlternatives(name));
                    }
                    rules.push(Rule::new(name, split_alternatives(rest, line_no, line)?));
                }
                Some(Token::Alternative) => {
                    // continuation of the previous rule
                    let rule = rules.last_mut().ok_or_else(parse_error)?;
                    rule.alternatives
                        .extend(split_alternatives(iter.collect(), line_no, line)?);
                }
                _ => return Err(parse_error()),
            }
        }

        Self::from_rules(rules)
    }

    /// Reads and parses a grammar file.
    pub fn load(path: &Path) -> Result<Self, GrammarError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Returns a copy of this grammar deriving from `name` instead of the first rule.
    pub fn with_start(mut self, name: &str) -> Result<Self, GrammarError> {
        self.start = *self
            .index
            .get(name)
            .ok_or_else(|| GrammarError::MissingStartSymbol(name.to_string()))?;
        Ok(self)
    }

    /// Validates the structure needed for decoding: at least one rule, no rule without
    /// alternatives, no empty alternative, no reference to an undefined non-terminal.
    fn validate(&self) -> Result<(), GrammarError> {
        if self.rules.is_empty() {
            return Err(GrammarError::EmptyGrammar);
        }
        for rule in &self.rules {
            if rule.alternatives.is_empty() {
                return Err(GrammarError::NoAlternatives(rule.name.clone()));
            }
            for alternative in &rule.alternatives {
                if alternative.is_empty() {
                    return Err(GrammarError::EmptyAlternative(rule.name.clone()));
                }
                for symbol in alternative {
                    if let Symbol::NonTerminal(name) = symbol {
                        if !self.index.contains_key(name) {
                            return Err(GrammarError::UndefinedNonTerminal(name.clone()));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// The rules in definition order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn start(&self) -> &Rule {
        &self.rules[self.start]
    }

    pub fn start_index(&self) -> usize {
        self.start
    }

    /// Position of a rule, which is also the position of its chromosome.
    pub fn rule_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Ordered alternatives of a non-terminal, `None` if it is not defined.
    pub fn alternatives(&self, name: &str) -> Option<&[Vec<Symbol>]> {
        self.rule_index(name)
            .map(|i| self.rules[i].alternatives.as_slice())
    }

    /// Checks if a given symbol is a non-terminal defined by this grammar.
    pub fn is_non_terminal(&self, symbol: &Symbol) -> bool {
        match symbol {
            Symbol::NonTerminal(name) => self.index.contains_key(name),
            Symbol::Terminal(_) => false,
        }
    }
}

impl FromStr for Grammar {
    type Err = GrammarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
