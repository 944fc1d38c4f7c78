//! Data models for catalogue-link.
//!
//! Defines the records exchanged with the server and the values carried by
//! session events.

pub mod action_record;
pub mod collection_delta;
pub mod ping_response;
pub mod server_readiness;
pub mod service_registration;
pub mod session_phase;
pub mod status_response;
pub mod token_digest;

#[cfg(test)]
mod tests;

pub use action_record::{ActionRecord, ACTION_STATE_ADDED};
pub use collection_delta::{ChangedRecord, CollectionDelta, DeltaKind};
pub use ping_response::PingResponse;
pub use server_readiness::ServerReadiness;
pub use service_registration::ServiceRegistration;
pub use session_phase::SessionPhase;
pub use status_response::{StatusResponse, UpSince, STATUS_UP};
pub use token_digest::TokenDigest;
