//! CLI-specific utilities for butterfly-wayfinder
//!
//! This module contains code specific to the command-line interface,
//! separate from the core library functionality.

pub mod output;
pub mod progress;

pub use progress::ProgressManager;
