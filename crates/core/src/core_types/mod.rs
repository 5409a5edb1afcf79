//! Core types and utilities

pub mod profile;
pub mod station;
pub mod units;

pub use profile::*;
pub use station::*;
pub use units::*;
