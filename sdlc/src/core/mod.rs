//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod acceptance;
pub mod antipattern;
pub mod attempts;
pub mod classifier;
pub mod extract;
pub mod failure;
pub mod fingerprint;
pub mod review_parse;
pub mod review_rules;
pub mod sanitize;
pub mod types;
pub mod validation;
