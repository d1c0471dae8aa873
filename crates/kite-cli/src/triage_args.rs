use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::validation::parse_repo_slug;

#[derive(Debug, Parser)]
#[command(
    name = "triage",
    about = "Analyze a failing CI run or pull request and propose a fix",
    version
)]
pub struct TriageCli {
    #[command(subcommand)]
    pub command: TriageCommand,
}

#[derive(Debug, Subcommand)]
pub enum TriageCommand {
    /// Triage one failing pull request or workflow run.
    Run(TriageRunArgs),
    /// Write the default configuration file.
    GenerateConfig(GenerateConfigArgs),
}

#[derive(Debug, Clone, Args)]
pub struct TriageRunArgs {
    #[arg(
        long,
        env = "KITE_TRIAGE_REPO",
        value_parser = parse_repo_slug,
        help = "Repository in owner/repo form"
    )]
    pub repo: String,

    #[arg(
        long = "failure-ref",
        help = "Pull request number (#123 or 123), workflow run id, or a pull request / run URL"
    )]
    pub failure_ref: String,

    #[arg(
        long = "auto-fix",
        help = "Open a fix pull request when the proposal is low risk and the safety gate passes"
    )]
    pub auto_fix: bool,

    #[arg(
        long = "dry-run",
        help = "Run every stage but never write to the repository"
    )]
    pub dry_run: bool,

    #[arg(long, short = 'v', help = "Log at debug level")]
    pub verbose: bool,

    #[arg(
        long,
        env = "KITE_TRIAGE_CONFIG",
        help = "TOML configuration file (see `triage generate-config`)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "output-dir",
        env = "KITE_TRIAGE_OUTPUT_DIR",
        default_value = ".kite/triage",
        help = "Directory receiving one artifact folder per run"
    )]
    pub output_dir: PathBuf,

    #[arg(
        long,
        default_value = ".",
        help = "Local checkout used by the safety gate's checks"
    )]
    pub workdir: PathBuf,

    #[arg(
        long = "github-token",
        env = "GITHUB_TOKEN",
        hide_env_values = true,
        help = "Token for the GitHub REST API"
    )]
    pub github_token: Option<String>,

    #[arg(
        long = "github-api-base",
        env = "KITE_GITHUB_API_BASE",
        help = "Override the GitHub API base URL (defaults to the config file value)"
    )]
    pub github_api_base: Option<String>,

    #[arg(
        long = "reviewer",
        action = ArgAction::Append,
        help = "Reviewer to request on a fix pull request; repeatable"
    )]
    pub reviewers: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct GenerateConfigArgs {
    #[arg(long, help = "Path of the configuration file to create")]
    pub output: PathBuf,
}
