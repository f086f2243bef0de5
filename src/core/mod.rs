//! Core library modules for butterfly-wayfinder
//!
//! This module contains the internal implementation details of the butterfly-wayfinder library.

pub mod bundle;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod link;
pub mod manifest;
pub mod session;
pub mod store;
pub mod sync;

