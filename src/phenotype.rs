use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Concatenates terminal values, in order, without separators.
pub fn render<S: AsRef<str>>(terminals: &[S]) -> String {
    terminals.iter().map(AsRef::as_ref).collect()
}

/// The evolvable program text decoded from a genotype.
///
/// Two phenotypes are equal when their rendered source is equal, whatever
/// genotypes they were decoded from.
#[derive(Debug, Clone, Serialize)]
pub struct Phenotype {
    pub source: String,
    /// Whether the derivation hit the expansion cap
    pub truncated: bool,
}

impl Phenotype {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            truncated: false,
        }
    }

    pub fn from_terminals<S: AsRef<str>>(terminals: &[S], truncated: bool) -> Self {
        Self {
            source: render(terminals),
            truncated,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Phenotype {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Phenotype {}

impl Hash for Phenotype {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl fmt::Display for Phenotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
