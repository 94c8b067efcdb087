//! Integration tests for the os-emu scheduler and memory manager.
//!
//! Run with: `cargo test --test integration`

mod emulator_report;
mod scheduler_scenarios;
