use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "toolgauge", version, about = "CLI wrapper for toolgauge-core")]
pub struct Cli {
    /// Emit JSON output instead of human-readable output.
    #[arg(long)]
    pub json: bool,
    /// Timeout in seconds for remote calls.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
    /// Deterministic seed for fallback argument synthesis.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Execute every synthesized test case after discovery.
    #[arg(long)]
    pub execute: bool,
    /// Completion API key; omit to evaluate without enhancement.
    #[arg(long, env = "TOOLGAUGE_COMPLETION_API_KEY")]
    pub completion_api_key: Option<String>,
    /// Completion model identifier.
    #[arg(long, default_value = "gpt-4o-mini")]
    pub completion_model: String,
    /// Endpoint override for OpenAI-compatible completion services.
    #[arg(long, env = "TOOLGAUGE_COMPLETION_BASE_URL")]
    pub completion_base_url: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Evaluate an HTTP MCP endpoint.
    Http {
        /// MCP endpoint URL.
        #[arg(long)]
        url: String,
        /// Authorization bearer token.
        #[arg(long)]
        auth_token: Option<String>,
        /// Redirect URL registered during dynamic client registration.
        #[arg(long, default_value = "http://localhost:8765/callback")]
        redirect_url: String,
        /// Authorization code returned by the external redirect.
        #[arg(long, requires = "auth_state", requires = "auth_session")]
        auth_code: Option<String>,
        /// Opaque state returned alongside the authorization code.
        #[arg(long)]
        auth_state: Option<String>,
        /// Authorization session from a previous run, as JSON or @path.
        #[arg(long, value_name = "JSON|@PATH")]
        auth_session: Option<String>,
    },
}
