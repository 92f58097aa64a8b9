//! Operator tooling for template tests: preview, validation, simulation and grading.
pub mod bundle;
pub mod commands;
pub mod config;
pub mod render;
