use std::path::PathBuf;

use clap::Parser;

use crate::validation::parse_positive_u64;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "kite-gateway",
    about = "Signed interaction endpoint for chat-platform agents",
    version
)]
pub struct GatewayCli {
    #[arg(
        long,
        env = "KITE_GATEWAY_BIND",
        default_value = "127.0.0.1:8787",
        help = "Socket address to listen on"
    )]
    pub bind: String,

    #[arg(
        long = "public-key",
        env = "KITE_DISCORD_PUBLIC_KEY",
        help = "Hex-encoded Ed25519 application public key"
    )]
    pub public_key: String,

    #[arg(
        long = "conversation-db",
        env = "KITE_CONVERSATION_DB",
        default_value = ".kite/conversations.sqlite",
        help = "SQLite file holding conversation state"
    )]
    pub conversation_db: PathBuf,

    #[arg(
        long = "conversation-ttl-seconds",
        env = "KITE_CONVERSATION_TTL_SECONDS",
        default_value_t = 3_600,
        value_parser = parse_positive_u64,
        help = "Seconds a conversation stays alive after its last turn"
    )]
    pub conversation_ttl_seconds: u64,

    #[arg(
        long = "profile-api-base",
        env = "KITE_PROFILE_API_BASE",
        default_value = "http://127.0.0.1:3000",
        help = "Base URL of the profile backend confirmed edits are written to"
    )]
    pub profile_api_base: String,

    #[arg(
        long = "profile-api-token",
        env = "KITE_PROFILE_API_TOKEN",
        hide_env_values = true,
        help = "Bearer token for the profile backend"
    )]
    pub profile_api_token: Option<String>,

    #[arg(
        long = "followup-api-base",
        env = "KITE_FOLLOWUP_API_BASE",
        default_value = "https://discord.com/api/v10",
        help = "Base URL for deferred follow-up webhooks"
    )]
    pub followup_api_base: String,

    #[arg(
        long = "response-budget-ms",
        env = "KITE_RESPONSE_BUDGET_MS",
        default_value_t = 2_500,
        value_parser = parse_positive_u64,
        help = "Maximum time an inline agent reply may take"
    )]
    pub response_budget_ms: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "KITE_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for outbound profile and follow-up requests"
    )]
    pub request_timeout_ms: u64,

    #[arg(long, short = 'v', help = "Log at debug level")]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::GatewayCli;

    #[test]
    fn unit_gateway_flags_parse_with_defaults() {
        let cli = GatewayCli::try_parse_from(["kite-gateway", "--public-key", "ab"]).expect("parse");
        assert_eq!(cli.bind, "127.0.0.1:8787");
        assert_eq!(cli.conversation_ttl_seconds, 3_600);
        assert_eq!(cli.response_budget_ms, 2_500);
        assert!(cli.profile_api_token.is_none());
    }

    #[test]
    fn regression_zero_ttl_is_rejected() {
        assert!(GatewayCli::try_parse_from([
            "kite-gateway",
            "--public-key",
            "ab",
            "--conversation-ttl-seconds",
            "0"
        ])
        .is_err());
    }
}
