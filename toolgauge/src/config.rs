use std::fs;

use toolgauge_core::auth::AuthFlowConfig;
use toolgauge_core::{
    AuthorizationSession, CompletionConfig, EvaluatorConfig, HttpTargetConfig, SynthesizerConfig,
};

use crate::cli::Cli;

/// Resume inputs decoded from the CLI, present only together.
#[derive(Debug)]
pub struct AuthResume {
    pub session: AuthorizationSession,
    pub code: String,
    pub state: String,
}

pub fn parse_auth_session(raw: &str) -> Result<AuthorizationSession, String> {
    let payload = if let Some(path) = raw.strip_prefix('@') {
        fs::read_to_string(path).map_err(|error| format!("failed to read auth-session: {error}"))?
    } else {
        raw.to_string()
    };
    serde_json::from_str(&payload).map_err(|error| format!("invalid auth-session: {error}"))
}

pub(super) fn build_evaluator_config(
    cli: &Cli,
    url: &str,
    auth_token: Option<&str>,
    redirect_url: &str,
) -> EvaluatorConfig {
    let mut target = HttpTargetConfig::new(url).with_timeout_secs(cli.timeout_secs);
    if let Some(token) = auth_token {
        target = target.with_auth_token(token);
    }
    EvaluatorConfig {
        target,
        synthesizer: SynthesizerConfig { seed: cli.seed },
        auth: AuthFlowConfig {
            redirect_url: redirect_url.to_string(),
            timeout_secs: cli.timeout_secs,
            ..AuthFlowConfig::default()
        },
    }
}

pub(super) fn build_completion_config(cli: &Cli) -> CompletionConfig {
    CompletionConfig {
        api_key: cli.completion_api_key.clone(),
        model: cli.completion_model.clone(),
        base_url: cli.completion_base_url.clone(),
        timeout_secs: cli.timeout_secs,
    }
}

pub(super) fn build_auth_resume(
    auth_code: Option<&str>,
    auth_state: Option<&str>,
    auth_session: Option<&str>,
) -> Result<Option<AuthResume>, String> {
    match (auth_code, auth_state, auth_session) {
        (Some(code), Some(state), Some(session)) => Ok(Some(AuthResume {
            session: parse_auth_session(session)?,
            code: code.to_string(),
            state: state.to_string(),
        })),
        (None, _, _) => Ok(None),
        _ => Err("auth-code, auth-state, and auth-session must be passed together".to_string()),
    }
}
