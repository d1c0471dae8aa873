use std::process::ExitCode;

use clap::Parser;
use kite_app::{execute_triage_cli, init_tracing};
use kite_cli::{TriageCli, TriageCommand};
use kite_core::CancellationToken;
use kite_triage::EXIT_INTERRUPTED;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = TriageCli::parse();
    let verbose = matches!(&cli.command, TriageCommand::Run(args) if args.verbose);
    init_tracing(verbose);
    let cancellation = CancellationToken::new();
    {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            eprintln!("interrupted; writing the partial report (press Ctrl-C again to abort)");
            cancellation.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(EXIT_INTERRUPTED);
            }
        });
    }
    let code = execute_triage_cli(cli, cancellation).await;
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
