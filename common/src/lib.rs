//! CapVault Common Types
//!
//! This crate contains shared types used across the CapVault workspace,
//! including identifiers, the value amount type, and the error taxonomy.

pub mod identifiers;
pub mod amount;
pub mod error;

pub use identifiers::*;
pub use amount::*;
pub use error::*;
