//! Core domain types.
//!
//! Identifiers, the request model, and request id generation.

pub mod ids;
pub mod random;
pub mod request;

pub use ids::{DeliveryId, PrNumber, RepoId, RequestId, RunId, Sha};
pub use random::{RandomSource, SAFE_ALPHABET, generate_request_id};
pub use request::{NewRequest, Request, RequestFacts};
