use clap::Parser;

/// CLI/env config. `clap`'s `env = "..."` attributes give CLI >
/// environment variable precedence for free; anything left `None` falls
/// back to `GatewayConfig::default()`.
#[derive(Debug, Clone, Parser)]
#[command(name = "gatewarden", version, about = "Credential-rotating LLM gateway")]
pub struct CliArgs {
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "STREAMING_MODE")]
    pub streaming_mode: Option<String>,

    #[arg(long, env = "FAILURE_THRESHOLD")]
    pub failure_threshold: Option<u32>,

    #[arg(long, env = "SWITCH_ON_USES")]
    pub switch_on_uses: Option<u32>,

    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,

    #[arg(long, env = "RETRY_DELAY")]
    pub retry_delay_ms: Option<u64>,

    #[arg(long, env = "IMMEDIATE_SWITCH_STATUS_CODES")]
    pub immediate_switch_status_codes: Option<String>,

    #[arg(long, env = "API_KEYS")]
    pub api_keys: Option<String>,

    #[arg(long, env = "INITIAL_AUTH_INDEX")]
    pub initial_auth_index: Option<u32>,
}
