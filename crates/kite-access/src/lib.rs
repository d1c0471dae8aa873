//! Request authentication for inbound chat-platform interactions.
//!
//! The platform signs `timestamp || raw_body` with Ed25519 and sends the hex
//! signature and the timestamp as headers. Verification fails closed.

pub mod interaction_signature;

pub use interaction_signature::{
    decode_hex, interaction_signed_message, verify, verify_interaction_signature, AccessError,
    InteractionSignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
