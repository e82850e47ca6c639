use std::process::ExitCode;

use serde::Serialize;
use toolgauge_core::{EvaluationResult, PendingAuthorization, TestCase};

#[derive(Serialize)]
struct CliError<'a> {
    status: &'static str,
    message: &'a str,
}

pub(super) fn error_exit(message: &str, json: bool) -> ExitCode {
    if json {
        let payload = CliError {
            status: "error",
            message,
        };
        let output = serde_json::to_string_pretty(&payload).unwrap_or(message.to_string());
        eprintln!("{output}");
    } else {
        eprintln!("{message}");
    }
    ExitCode::from(2)
}

pub(super) fn exit_code_for_result(result: &EvaluationResult) -> ExitCode {
    if result.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

pub(super) fn print_result(result: &EvaluationResult, json: bool) {
    if json {
        let output = serde_json::to_string_pretty(result)
            .unwrap_or("<failed to serialize evaluation result>".to_string());
        println!("{output}");
    } else {
        println!("{}", format_result_human(result));
    }
}

#[derive(Serialize)]
struct AuthorizationHandoff<'a> {
    status: &'static str,
    authorize_url: &'a str,
    state: &'a str,
    session: &'a toolgauge_core::AuthorizationSession,
}

pub(super) fn print_authorization_required(pending: &PendingAuthorization, json: bool) {
    if json {
        let payload = AuthorizationHandoff {
            status: "authorization_required",
            authorize_url: &pending.authorize_url,
            state: &pending.state,
            session: &pending.session,
        };
        let output = serde_json::to_string_pretty(&payload)
            .unwrap_or("<failed to serialize authorization handoff>".to_string());
        println!("{output}");
    } else {
        let session = serde_json::to_string(&pending.session)
            .unwrap_or("<failed to serialize session>".to_string());
        println!("Authorization required.\n");
        println!("1. Open this URL and approve access:\n   {}\n", pending.authorize_url);
        println!("2. Re-run with the code from the redirect:");
        println!(
            "   toolgauge http --url <url> --auth-code <code> --auth-state '{}' --auth-session '{}'",
            pending.state, session
        );
    }
}

pub(super) fn format_result_human(result: &EvaluationResult) -> String {
    let mut output = String::new();
    output.push_str(&format!("Server: {}\n", result.server_url));

    if !result.probes.is_empty() {
        output.push_str("Probes:\n");
        for probe in &result.probes {
            let status = if probe.passed { "pass" } else { "fail" };
            output.push_str(&format!("- {}: {status}", probe.name));
            if let Some(note) = &probe.note {
                output.push_str(&format!(" ({note})"));
            }
            output.push('\n');
        }
    }

    output.push_str(&format!("Test cases: {}\n", result.test_cases.len()));
    for case in &result.test_cases {
        output.push_str(&format_case_human(case));
    }
    output
}

fn format_case_human(case: &TestCase) -> String {
    let status = if !case.executed {
        "pending"
    } else if case.passed {
        "passed"
    } else {
        "failed"
    };
    let mut output = format!("- {}: {status}\n", case.tool_name);
    let arguments = serde_json::to_string(&case.arguments).unwrap_or_default();
    output.push_str(&format!("  arguments: {arguments}\n"));
    if !case.unresolved_dependencies.is_empty() {
        output.push_str(&format!(
            "  unresolved dependencies: {}\n",
            case.unresolved_dependencies.join(", ")
        ));
        if !case.prerequisites.is_empty() {
            output.push_str(&format!(
                "  run first: {}\n",
                case.prerequisites.join(", ")
            ));
        }
    }
    if let Some(record) = &case.result {
        if let Some(message) = &record.error_message {
            output.push_str(&format!("  error: {message}\n"));
        }
        if let Some(diagnosis) = &record.diagnosis {
            output.push_str(&format!("  diagnosis: {diagnosis}\n"));
        }
    }
    output
}
