//! Wiring shared by the `triage` and `kite-gateway` binaries.

pub mod bootstrap_helpers;
pub mod gateway_command;
pub mod triage_command;

pub use bootstrap_helpers::init_tracing;
pub use gateway_command::{build_interaction_router, run_gateway};
pub use triage_command::{execute_triage_cli, run_triage_command};
