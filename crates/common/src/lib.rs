//! Error plumbing shared across the vigil crates.

pub mod error;

pub use error::FromMessage;
