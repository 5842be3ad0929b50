//! Core types: configuration and error taxonomy.

pub mod config;
pub mod errors;
