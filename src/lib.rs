//! cobra library crate
//!
//! The debounce → analyze → present pipeline and its parts. The binary wires
//! these to a solution file on disk and a terminal; tests and benchmarks use
//! them directly.

pub mod analysis;
pub mod change;
pub mod config;
pub mod debounce;
pub mod editor;
pub mod extract;
pub mod history;
pub mod keyring;
pub mod messages;
pub mod pipeline;
pub mod present;
pub mod rules;
pub mod stopwatch;
pub mod surface;
pub mod visibility;
