//! Scenario-based tests for pipeline runs

#[path = "../common/mod.rs"]
mod common;

mod failure_handling;
mod gating;
mod matrix_fanout;
mod success_chain;
mod variable_substitution;
