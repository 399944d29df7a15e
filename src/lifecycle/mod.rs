//! Request lifecycle: canonical status, its classes, and derivation.

pub mod derive;
pub mod status;

pub use derive::derive_status;
pub use status::{CanonicalStatus, StatusClass};
