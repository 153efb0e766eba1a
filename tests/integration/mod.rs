//! Integration tests for ultimatectl
//!
//! These tests verify that multiple components work together correctly.

#[path = "../common/mod.rs"]
pub mod common;

pub mod config_flow;
pub mod memory_ops;
pub mod task_lifecycle;
