use anyhow::Result;
use clap::Parser;
use kite_app::{init_tracing, run_gateway};
use kite_cli::GatewayCli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = GatewayCli::parse();
    init_tracing(cli.verbose);
    run_gateway(cli).await
}
