//! Command implementations.

pub mod refresh;
pub mod validate;
pub mod views;
