//! Shared pieces of the `scribad` and `scriba` binaries: argument
//! definitions and small CLI helpers.

pub mod cli;
