//! CLI command implementations.

pub mod group;
pub mod keygen;
pub mod run;
