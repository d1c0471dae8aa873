use anyhow::{Context, Result};
use kite_cli::{GenerateConfigArgs, TriageCli, TriageCommand, TriageRunArgs};
use kite_core::CancellationToken;
use kite_github::{GithubApiClient, RepoRef};
use kite_safety::{redact_secrets, SecretRedactor};
use kite_triage::{
    generate_config, load_triage_config, run_triage, TriageConfig, TriageOutcome, TriageRequest,
    EXIT_FATAL, EXIT_SUCCESS,
};

/// Runs one `triage` invocation and returns its process exit code.
///
/// Cancelling `cancellation` ends a run early with a partial report and exit code 130.
pub async fn execute_triage_cli(cli: TriageCli, cancellation: CancellationToken) -> i32 {
    let result = match cli.command {
        TriageCommand::Run(args) => run_triage_command(&args, cancellation).await,
        TriageCommand::GenerateConfig(args) => generate_config_command(&args),
    };
    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {}", redact_secrets(&format!("{error:#}")));
            EXIT_FATAL
        }
    }
}

fn generate_config_command(args: &GenerateConfigArgs) -> Result<i32> {
    generate_config(&args.output)?;
    println!("wrote triage config {}", args.output.display());
    Ok(EXIT_SUCCESS)
}

pub async fn run_triage_command(
    args: &TriageRunArgs,
    cancellation: CancellationToken,
) -> Result<i32> {
    let config = match args.config.as_deref() {
        Some(path) => load_triage_config(path)?,
        None => TriageConfig::default(),
    };
    let repo = RepoRef::parse(&args.repo).context("invalid --repo")?;
    let token = args
        .github_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);
    if token.is_none() {
        tracing::warn!("no GitHub token configured; unauthenticated API limits apply");
    }
    let mut redactor = SecretRedactor::new().with_env_secrets();
    if let Some(token) = token.as_deref() {
        redactor = redactor.with_known_secret(token);
    }

    let client = GithubApiClient::new(
        config.github_client_config(token, args.github_api_base.clone()),
        repo,
    )
    .context("failed to create GitHub client")?;
    let mut reviewers = args.reviewers.clone();
    reviewers.retain(|reviewer| !reviewer.trim().is_empty());
    let request = TriageRequest {
        failure_ref: args.failure_ref.clone(),
        auto_fix: args.auto_fix,
        dry_run: args.dry_run,
        output_dir: args.output_dir.clone(),
        workdir: args.workdir.clone(),
        reviewers,
        cancellation,
    };
    let outcome = run_triage(&client, &config, &request, &redactor).await?;
    println!("{}", redactor.redact(&render_summary(&outcome)));
    Ok(outcome.exit_code())
}

fn render_summary(outcome: &TriageOutcome) -> String {
    let report = &outcome.report;
    let mut lines = vec![
        format!("triage {} for {} {}", report.correlation_id, report.repo, report.reference),
        format!(
            "root cause: {} ({} confidence)",
            report.root_cause.category,
            report.root_cause.confidence.as_str()
        ),
        format!(
            "fix: {} at {} risk: {}",
            report.fix.kind.as_str(),
            report.fix.risk_level.as_str(),
            report.fix.summary
        ),
    ];
    if report.pull_request.opened {
        lines.push(format!(
            "pull request: {}",
            report.pull_request.url.as_deref().unwrap_or_default()
        ));
    } else if let Some(reason) = report.pull_request.skipped_reason.as_deref() {
        lines.push(format!("pull request: not opened ({reason})"));
    }
    if report.interrupted {
        lines.push("status: interrupted, later stages were skipped".to_string());
    } else if report.incomplete {
        lines.push("status: incomplete, see the stage table in the report".to_string());
    }
    lines.push(format!("artifacts: {}", outcome.artifacts.directory.display()));
    lines.join("\n")
}
