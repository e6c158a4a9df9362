//! spyke CLI crate
//!
//! Commands (see [commands]):
//! - generate: build a random core image, optionally with a matching spike schedule
//! - inspect: print an image's dimensions, routing table and leading rows
//! - run: load an image, inject a schedule and report per-timestep inputs and provenance
//! - init: write a default configuration file
//!
//! The binary (src/main.rs) wires up logging and argument parsing, then calls
//! [`SpykeCli::execute`]. The library surface exists so tests and scripts can
//! drive commands without spawning a process.

pub mod commands;
pub mod config;
pub mod error;
pub mod schedule;

pub use commands::SpykeCli;
