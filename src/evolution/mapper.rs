use crate::evolution::genotype::Genotype;
use crate::evolution::grammar::{Grammar, Symbol};
use serde::{Deserialize, Serialize};

/// What to do with the pending symbols left when the expansion cap is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TruncationPolicy {
    /// Pending terminals are still emitted in order, pending non-terminals are dropped.
    #[default]
    DropNonTerminals,
    /// A truncated derivation yields no terminals at all.
    EmptySentence,
}

/// Outcome of decoding one genotype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivation {
    /// Resolved terminal values, leftmost first
    pub terminals: Vec<String>,
    /// Number of non-terminal expansions performed
    pub expansions: usize,
    /// `true` when the expansion cap stopped the derivation with non-terminals pending
    pub truncated: bool,
}

/// Keeps the state of one decoding: a codon cursor per chromosome.
struct MappingContext<'a> {
    /// Reference to the `Genotype` being decoded
    genotype: &'a Genotype,
    /// Next codon to consume, one per chromosome
    cursors: Vec<usize>,
}

impl<'a> MappingContext<'a> {
    fn new(genotype: &'a Genotype) -> Self {
        Self {
            genotype,
            cursors: vec![0; genotype.chromosomes.len()],
        }
    }

    /// Returns the next codon of a chromosome, wrapping around its end.
    /// A missing or empty chromosome always yields 0.
    fn next_codon(&mut self, chromosome: usize) -> u32 {
        let Some(codons) = self.genotype.chromosomes.get(chromosome) else {
            return 0;
        };
        if codons.is_empty() {
            return 0;
        }
        let cursor = &mut self.cursors[chromosome];
        let codon = codons[*cursor];
        *cursor = (*cursor + 1) % codons.len();
        codon
    }
}

/// Decodes genotypes into terminal sequences by leftmost derivation,
/// choosing each alternative with `codon % alternatives`.
#[derive(Debug, Clone, Copy)]
pub struct GrammarMapper<'a> {
    /// The `Grammar` shared by every decoding
    grammar: &'a Grammar,
    /// Max allowable number of non-terminal expansions
    max_expansions: usize,
    truncation: TruncationPolicy,
}

impl<'a> GrammarMapper<'a> {
    pub fn new(grammar: &'a Grammar, max_expansions: usize) -> Self {
        Self {
            grammar,
            max_expansions,
            truncation: TruncationPolicy::default(),
        }
    }

    pub fn with_truncation(mut self, truncation: TruncationPolicy) -> Self {
        self.truncation = truncation;
        self
    }

    pub fn grammar(&self) -> &'a Grammar {
        self.grammar
    }

    /// Decodes a genotype from the grammar's start symbol.
    ///
    /// Decoding is a pure function of the genotype: it never fails and always stops
    /// after at most `max_expansions` expansions. Chromosome `i` drives the choices of
    /// rule `i`.
    ///
    /// # Arguments
    /// * `&self` - Reference to `GrammarMapper`
    /// * `genotype` - The genotype to turn into a sentence
    ///
    /// # Returns
    /// * `Derivation` - The terminals produced and how the derivation ended
    pub fn map(&self, genotype: &Genotype) -> Derivation {
        let mut context = MappingContext::new(genotype);
        let start = self.grammar.start();
        let start_symbol = Symbol::NonTerminal(start.name.clone());

        // top of the stack is the leftmost pending symbol
        let mut pending: Vec<&Symbol> = vec![&start_symbol];
        let mut terminals = Vec::new();
        let mut expansions = 0;

        while expansions < self.max_expansions {
            let Some(symbol) = pending.pop() else { break };
            match symbol {
                Symbol::Terminal(value) => terminals.push(value.clone()),
                Symbol::NonTerminal(name) => {
                    let Some(rule_index) = self.grammar.rule_index(name) else {
                        continue;
                    };
                    let alternatives = &self.grammar.rules()[rule_index].alternatives;
                    let codon = context.next_codon(rule_index);
                    let choice = codon as usize % alternatives.len();
                    pending.extend(alternatives[choice].iter().rev());
                    expansions += 1;
                }
            }
        }

        let truncated = pending.iter().any(|s| s.is_non_terminal());
        if truncated && self.truncation == TruncationPolicy::EmptySentence {
            terminals.clear();
        } else {
            terminals.extend(pending.iter().rev().filter_map(|s| match s {
                Symbol::Terminal(value) => Some(value.clone()),
                Symbol::NonTerminal(_) => None,
            }));
        }

        Derivation {
            terminals,
            expansions,
            truncated,
        }
    }
}

/// Decodes `genotype` against `grammar` with the default truncation policy.
pub fn decode(genotype: &Genotype, grammar: &Grammar, max_expansions: usize) -> Vec<String> {
    GrammarMapper::new(grammar, max_expansions)
        .map(genotype)
        .terminals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::genotype::{ChromosomeLayout, CodonBound};
    use crate::phenotype::render;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const AND_GRAMMAR: &str = "<expr> ::= x | y | (<expr>)&&(<expr>) | !(<expr>)";

    fn grammar_from_str(text: &str) -> Grammar {
        Grammar::parse(text).unwrap()
    }

    #[test]
    fn test_single_rule_derivation() {
        let grammar = grammar_from_str(AND_GRAMMAR);
        let mapper = GrammarMapper::new(&grammar, 50);

        // 2 -> (<expr>)&&(<expr>), then 0 -> x and 1 -> y
        let genotype = Genotype::new(vec![vec![2, 0, 1]]);
        let derivation = mapper.map(&genotype);
        assert_eq!(render(&derivation.terminals), "(x)&&(y)");
        assert_eq!(derivation.expansions, 3);
        assert!(!derivation.truncated);
    }

    #[test]
    fn test_chromosome_per_rule() {
        let grammar = grammar_from_str(
            "<expr> ::= <var> | (<expr>) <op> (<expr>)\n<op> ::= ' && ' | ' || '\n<var> ::= x | y",
        );
        let mapper = GrammarMapper::new(&grammar, 50);

        // <expr> choices: 1, 0, 0 ; <op> choices: 1 ; <var> choices: 1, 0
        let genotype = Genotype::new(vec![vec![1, 0, 0], vec![1], vec![1, 0]]);
        assert_eq!(render(&mapper.map(&genotype).terminals), "(y) || (x)");
    }

    #[test]
    fn test_alternative_is_codon_mod_count() {
        let grammar = grammar_from_str("<start> ::= a | b | c | d | e");
        let mapper = GrammarMapper::new(&grammar, 10);
        let alternatives = ["a", "b", "c", "d", "e"];
        let count = alternatives.len() as u32;

        for codon in 0..10 * count {
            let genotype = Genotype::new(vec![vec![codon]]);
            let terminals = mapper.map(&genotype).terminals;
            assert_eq!(terminals, vec![alternatives[(codon % count) as usize].to_string()]);
        }
    }

    #[test]
    fn test_cursor_wraps_around_chromosome() {
        // each expansion of <s> emits the chosen digit, then recurses
        let grammar = grammar_from_str(
            "<s> ::= 0 <s> | 1 <s> | 2 <s> | 3 <s> | 4 <s> | 5 <s> | 6 <s> | 7 <s>",
        );
        let chromosome: Vec<u32> = vec![3, 1, 4, 1, 5];
        let len = chromosome.len();
        let mapper = GrammarMapper::new(&grammar, len + 1);
        let derivation = mapper.map(&Genotype::new(vec![chromosome.clone()]));

        assert_eq!(derivation.expansions, len + 1);
        let digits: Vec<u32> = derivation
            .terminals
            .iter()
            .map(|t| t.parse().unwrap())
            .collect();
        assert_eq!(&digits[..len], chromosome.as_slice());
        assert_eq!(digits[len], chromosome[0]);
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let grammar = Grammar::load(std::path::Path::new("grammar.bnf")).unwrap();
        let layout = ChromosomeLayout::for_grammar(&grammar, 25, CodonBound::Fixed(256));
        let mapper = GrammarMapper::new(&grammar, 50);
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..100 {
            let genotype = layout.random_genotype(&mut rng);
            let first = mapper.map(&genotype);
            let second = mapper.map(&genotype);
            assert_eq!(first, second);
            assert!(first.expansions <= 50);
        }
    }

    #[test]
    fn test_recursive_genotype_is_truncated() {
        let grammar = grammar_from_str(AND_GRAMMAR);
        let mapper = GrammarMapper::new(&grammar, 50);

        // every codon picks (<expr>)&&(<expr>)
        let genotype = Genotype::new(vec![vec![2; 100]]);
        let derivation = mapper.map(&genotype);
        assert_eq!(derivation.expansions, 50);
        assert!(derivation.truncated);
        assert!(derivation.terminals.iter().all(|t| t == "(" || t == ")&&(" || t == ")"));
        assert!(!derivation.terminals.is_empty());
    }

    #[test]
    fn test_truncation_keeps_pending_terminals() {
        let grammar = grammar_from_str(AND_GRAMMAR);
        let mapper = GrammarMapper::new(&grammar, 1);

        let derivation = mapper.map(&Genotype::new(vec![vec![2]]));
        assert!(derivation.truncated);
        assert_eq!(render(&derivation.terminals), "()&&()");
    }

    #[test]
    fn test_empty_sentence_truncation_policy() {
        let grammar = grammar_from_str(AND_GRAMMAR);
        let mapper =
            GrammarMapper::new(&grammar, 1).with_truncation(TruncationPolicy::EmptySentence);

        let derivation = mapper.map(&Genotype::new(vec![vec![2]]));
        assert!(derivation.truncated);
        assert!(derivation.terminals.is_empty());

        // a complete derivation is unaffected by the policy
        let derivation = mapper.map(&Genotype::new(vec![vec![1]]));
        assert!(!derivation.truncated);
        assert_eq!(derivation.terminals, vec!["y".to_string()]);
    }

    #[test]
    fn test_pending_terminals_only_is_not_truncated() {
        let grammar = grammar_from_str("<s> ::= a b c");
        let mapper = GrammarMapper::new(&grammar, 1);
        let derivation = mapper.map(&Genotype::new(vec![vec![0]]));
        assert!(!derivation.truncated);
        assert_eq!(render(&derivation.terminals), "abc");
    }

    #[test]
    fn test_missing_chromosome_reads_zero() {
        let grammar = grammar_from_str("<s> ::= <v>\n<v> ::= x | y");
        let mapper = GrammarMapper::new(&grammar, 10);
        let derivation = mapper.map(&Genotype::new(vec![vec![0]]));
        assert_eq!(derivation.terminals, vec!["x".to_string()]);
    }

    #[test]
    fn test_decode_convenience() {
        let grammar = grammar_from_str(AND_GRAMMAR);
        let terminals = decode(&Genotype::new(vec![vec![3, 0]]), &grammar, 50);
        assert_eq!(render(&terminals), "!(x)");
    }
}
