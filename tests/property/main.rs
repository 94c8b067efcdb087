//! Property-based tests for the allocation strategies.
//!
//! Run with: `cargo test --test property`

mod allocator_invariants;
