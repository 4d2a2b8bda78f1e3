//! Administrative CLI for the fhirview analytics engine.

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
