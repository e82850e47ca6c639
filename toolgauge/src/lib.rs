//! CLI wrapper around the toolgauge-core evaluation engine.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use toolgauge_core::{
    ChatCompletionsClient, CompletionClient, Evaluator, ProgressChannel, ProgressMessage,
    StartOutcome,
};

mod cli;
mod config;
mod output;

pub use cli::{Cli, Command};
pub use config::parse_auth_session;

use config::{build_auth_resume, build_completion_config, build_evaluator_config};
use output::{error_exit, exit_code_for_result, print_authorization_required, print_result};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Runs the CLI to completion, returning the process exit code.
pub async fn run(cli: Cli) -> ExitCode {
    let Command::Http {
        url,
        auth_token,
        redirect_url,
        auth_code,
        auth_state,
        auth_session,
    } = &cli.command;

    let resume = match build_auth_resume(
        auth_code.as_deref(),
        auth_state.as_deref(),
        auth_session.as_deref(),
    ) {
        Ok(resume) => resume,
        Err(message) => return error_exit(&message, cli.json),
    };

    let completion = build_completion_config(&cli);
    let client: Option<Arc<dyn CompletionClient>> =
        match ChatCompletionsClient::from_config(&completion) {
            Some(client) => Some(Arc::new(client)),
            None => {
                log::info!("no completion API key configured; using fallback synthesis only");
                None
            }
        };

    let evaluator_config =
        build_evaluator_config(&cli, url, auth_token.as_deref(), redirect_url);
    let mut evaluator = Evaluator::new(evaluator_config, client);

    let (progress, receiver) = ProgressChannel::with_keepalive(KEEPALIVE_INTERVAL);
    let printer = tokio::spawn(drain_progress(receiver));

    let outcome = match resume {
        Some(resume) => {
            evaluator
                .resume_with_code(resume.session, &resume.code, &resume.state, &progress)
                .await
        }
        None => evaluator.start(&progress).await,
    };

    let exit = match outcome {
        Ok(StartOutcome::Ready) => {
            if cli.execute {
                if let Err(error) = evaluator.execute_all(&progress).await {
                    progress.deliver_error(error.to_string());
                    let _ = printer.await;
                    return error_exit(&error.to_string(), cli.json);
                }
            }
            let result = evaluator.result();
            progress.deliver_result(result.clone());
            print_result(&result, cli.json);
            exit_code_for_result(&result)
        }
        Ok(StartOutcome::AuthorizationRequired(pending)) => {
            drop(progress);
            print_authorization_required(&pending, cli.json);
            ExitCode::SUCCESS
        }
        Ok(StartOutcome::Completed(result)) => {
            progress.deliver_result(result.clone());
            print_result(&result, cli.json);
            exit_code_for_result(&result)
        }
        Err(error) => {
            progress.deliver_error(error.to_string());
            let _ = printer.await;
            return error_exit(&error.to_string(), cli.json);
        }
    };
    let _ = printer.await;
    exit
}

async fn drain_progress(mut receiver: UnboundedReceiver<ProgressMessage>) {
    while let Some(message) = receiver.recv().await {
        match message {
            ProgressMessage::Log { message } => log::info!("{message}"),
            ProgressMessage::KeepAlive => {}
            ProgressMessage::Result { .. } => {}
            ProgressMessage::Error { message } => log::error!("{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("parse")
    }

    #[test]
    fn http_command_parses_url_and_token() {
        let cli = parse(&[
            "toolgauge",
            "http",
            "--url",
            "https://example.test/mcp",
            "--auth-token",
            "secret",
        ]);
        let Command::Http {
            url, auth_token, ..
        } = &cli.command;
        assert_eq!(url, "https://example.test/mcp");
        assert_eq!(auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn auth_code_requires_state_and_session() {
        let result = Cli::try_parse_from([
            "toolgauge",
            "http",
            "--url",
            "https://example.test/mcp",
            "--auth-code",
            "code-1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_cover_timeout_seed_and_model() {
        let cli = parse(&["toolgauge", "http", "--url", "https://example.test/mcp"]);
        assert_eq!(cli.timeout_secs, 30);
        assert_eq!(cli.seed, 0);
        assert_eq!(cli.completion_model, "gpt-4o-mini");
        assert!(!cli.execute);
        assert!(!cli.json);
    }
}
