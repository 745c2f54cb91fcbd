//! Integration tests for the Satchel wallet.
//!
//! The engine runs against [`mock::MockProvider`], an in-memory chain that
//! accepts broadcasts and can inject provider failures. End-to-end flows
//! live in `tests/e2e.rs`, randomized invariants in `tests/properties.rs`.

pub mod helpers;
pub mod mock;
