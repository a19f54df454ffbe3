//! Grammatical Evolution of boolean functions.
//!
//! Genotypes (one integer chromosome per grammar rule) are decoded against a BNF
//! grammar into expression source, executed over a truth table and scored by their
//! error. The engine evolves the population until the error is small enough or the
//! generation budget runs out.

pub mod config;
pub mod evaluation;
pub mod evolution;
pub mod export;
pub mod phenotype;
pub mod vm;
