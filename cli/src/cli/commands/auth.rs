//! Login command handler.
//!
//! Runs the device flow, hands the token to the requested command through the
//! environment, and clears everything before returning.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthenticationManager, DeviceAuthorization, FailureReason};
use crate::config::GateConfig;
use crate::error::{GateError, Result};

/// Options for `ghgate login`.
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    pub no_browser: bool,
    pub scopes: Vec<String>,
    /// Program and arguments to run once authenticated.
    pub exec: Vec<String>,
}

/// Handle the `ghgate login` command.
///
/// Returns the exit code to use: the launched command's code, or 0.
pub async fn handle_login(config: &GateConfig, options: LoginOptions) -> Result<i32> {
    let manager = Arc::new(AuthenticationManager::from_config(config)?);
    let flusher = manager.auditor().spawn_flush_task();
    install_panic_cleanup(&manager);

    let result = tokio::select! {
        result = login_and_run(&manager, config, options) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            eprintln!("Interrupted.");
            let cleared = manager.store().notify_abnormal_exit().unwrap_or_default();
            tracing::debug!(cleared, "credentials cleared after interrupt");
            Err(GateError::Cancelled)
        }
    };

    if result.is_ok() {
        manager.store().notify_process_exit();
    }
    manager.dispose();
    manager.auditor().shutdown();
    flusher.abort();

    result
}

// The hook keeps a store handle so a panic anywhere still erases secrets.
fn install_panic_cleanup(manager: &AuthenticationManager) {
    let store = manager.store().clone();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        store.notify_abnormal_exit();
        previous(info);
    }));
}

async fn login_and_run(
    manager: &AuthenticationManager,
    config: &GateConfig,
    options: LoginOptions,
) -> Result<i32> {
    let scopes = (!options.scopes.is_empty()).then_some(options.scopes);
    let authorization = manager.start_authentication_with_scopes(scopes).await?;

    print_instructions(&authorization);
    if !options.no_browser {
        if open::that(authorization.browser_url()).is_ok() {
            println!("Browser opened automatically.");
        } else {
            println!("Could not open browser. Please visit the URL manually.");
        }
        println!();
    }

    println!("Waiting for authorization...");
    let outcome = manager
        .complete_authentication(&authorization.device_code)
        .await?;

    if !outcome.success {
        return Err(failure_to_error(outcome.failure, config.security.poll_timeout()));
    }

    let login = outcome
        .identity
        .as_ref()
        .map_or_else(|| "unknown".to_string(), |identity| identity.login.clone());
    println!();
    println!("Authenticated as {login}.");

    let code = if let Some((program, args)) = options.exec.split_first() {
        let variable = &config.launcher.token_env_var;
        manager.export_credential(variable).await?;
        tracing::debug!(%program, %variable, "launching command");

        let status = child_command(program, args).status().await?;
        status.code().unwrap_or(1)
    } else {
        println!("No command given; the token has been discarded.");
        0
    };

    manager.sign_out().await?;
    let validation = manager.validate_no_leak()?;
    if !validation.is_clean {
        return Err(GateError::SecurityLeakDetected(format!(
            "{} finding(s) after sign-out",
            validation.findings.len()
        )));
    }

    Ok(code)
}

// Killed when dropped, so an interrupt never leaves the child running with the token.
fn child_command(program: &str, args: &[String]) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(program);
    command.args(args).kill_on_drop(true);
    command
}

fn print_instructions(authorization: &DeviceAuthorization) {
    println!();
    println!("To authenticate, please visit:");
    println!();
    println!("  {}", authorization.verification_uri);
    println!();
    println!("And enter code: {}", authorization.user_code);
    println!();
}

fn failure_to_error(failure: Option<FailureReason>, poll_timeout: Duration) -> GateError {
    match failure {
        Some(FailureReason::Timeout) => GateError::PollTimeout {
            elapsed: poll_timeout,
        },
        Some(FailureReason::NotAuthorized) => GateError::NotAuthorized,
        Some(FailureReason::Cancelled | FailureReason::Superseded) => GateError::Cancelled,
        Some(FailureReason::InvalidToken) | None => GateError::InvalidToken,
        Some(FailureReason::Protocol { error, description }) => GateError::Protocol {
            kind: error,
            description,
        },
        Some(FailureReason::Configuration { message }) => GateError::Config(message),
        Some(other) => GateError::Network(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::ProtocolErrorKind;

    const TIMEOUT: Duration = Duration::from_secs(900);

    #[test]
    fn failures_map_to_user_facing_errors() {
        assert!(matches!(
            failure_to_error(Some(FailureReason::NotAuthorized), TIMEOUT),
            GateError::NotAuthorized
        ));
        assert_eq!(
            failure_to_error(Some(FailureReason::NotAuthorized), TIMEOUT).to_string(),
            "You are not authorized to use this tool."
        );
        assert!(matches!(
            failure_to_error(Some(FailureReason::Protocol {
                error: ProtocolErrorKind::Expired,
                description: String::new(),
            }), TIMEOUT),
            GateError::Protocol {
                kind: ProtocolErrorKind::Expired,
                ..
            }
        ));
        assert!(matches!(failure_to_error(None, TIMEOUT), GateError::InvalidToken));
        assert!(failure_to_error(Some(FailureReason::Timeout), TIMEOUT)
            .to_string()
            .contains("900s"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupted_child_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("still-running");
        let script = format!("sleep 1; touch '{}'", marker.display());

        let mut command = child_command("sh", &["-c".to_string(), script]);
        let interrupted = tokio::time::timeout(Duration::from_millis(200), command.status()).await;
        assert!(interrupted.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
