//! Small, self-contained concurrency primitives and utilities used across
//! the project.

pub mod blocking_queue;
pub mod pause_gate;
pub mod rng;

pub use blocking_queue::BlockingQueue;
pub use pause_gate::{GateStatus, PauseGate};
pub use rng::XorShift64;
