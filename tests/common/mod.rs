//! Shared test utilities for ultimatectl
//!
//! Provides a seeded mock device plus a task store and scheduler rooted in
//! a temporary directory.

pub mod fixtures;
