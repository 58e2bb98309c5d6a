//! Helpers for testing code built on this crate.
//!
//! [`FaultyDriver`] wraps a real driver and fails scripted operations, so retry and transaction
//! behavior can be exercised deterministically against `SQLite`.

mod faulty;

pub use faulty::{Fault, FaultOp, FaultyDriver};
