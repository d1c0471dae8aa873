//! Clap argument models for the `triage` and `kite-gateway` binaries.

pub mod gateway_args;
pub mod triage_args;
pub mod validation;

pub use gateway_args::GatewayCli;
pub use triage_args::{GenerateConfigArgs, TriageCli, TriageCommand, TriageRunArgs};
pub use validation::{parse_positive_u64, parse_repo_slug};
