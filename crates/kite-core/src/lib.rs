//! Foundational low-level utilities shared across kite crates.
//!
//! Provides the injectable clock used for conversation expiry, cooperative cancellation
//! for triage runs, and the atomic text write used by triage artifact emission.

pub mod atomic_write;
pub mod cancellation;
pub mod clock;

pub use atomic_write::write_text_atomic;
pub use cancellation::CancellationToken;
pub use clock::{
    current_unix_timestamp_ms, is_expired_unix_ms, Clock, ManualClock, SharedClock, SystemClock,
};
