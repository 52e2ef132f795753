//! Deterministic, pure logic shared by the resolver.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod alias;
pub mod budget;
pub mod classifier;
pub mod codes;
pub mod contract;
pub mod envelope;
pub mod event;
pub mod normalize;
pub mod policy;
pub mod remediation;
pub mod rules;
pub mod slo;
pub mod types;
