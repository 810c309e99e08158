//! jobtrack - command-line driver for the jobtrack session core.
//!
//! Each invocation restores the previous session from the OS keychain,
//! runs one command, and exits. Useful for scripting against the backend
//! and for checking what the web front end's guards would decide.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use jobtrack_core::api::{ApiClient, RegisterRequest};
use jobtrack_core::auth::{controller, SessionController};
use jobtrack_core::{Config, SessionError, SessionState};

// ============================================================================
// Constants
// ============================================================================

const LOG_FILE_NAME: &str = "jobtrack.log";

const USAGE: &str = "\
Usage: jobtrack <command>

Commands:
  status                          Show who is logged in
  login [email]                   Log in with email and password
  register                        Create an account and log in
  logout                          End the session
  oauth-url                       Print the provider sign-in URL
  oauth-complete <token> [state]  Finish provider sign-in
  route <path> [--guest]          Show what the route guard decides
  applications                    List tracked applications";

/// Initialize the tracing subscriber. Errors go to stderr; everything the
/// filter allows also goes to a log file in the cache directory.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file = config
        .cache_dir()
        .ok()
        .and_then(|dir| std::fs::create_dir_all(&dir).ok().map(|_| dir))
        .map(|dir| tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE_NAME)));

    match file {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().cloned() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    if command == "-h" || command == "--help" {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    let _log_guard = init_tracing(&config);
    info!(command = %command, "jobtrack starting");

    let session = controller::init(SessionController::from_config(config)?)?;
    let _subscription = session.store().subscribe(|state| match state {
        SessionState::Authenticated(credential) => {
            debug!(subject = %credential.subject_id(), "Session is authenticated")
        }
        SessionState::Anonymous => debug!("Session is anonymous"),
    });

    session.restore().await;

    let result = run(&session, &command, &args[1..]).await;

    if session.take_session_expired_notice() {
        eprintln!("Your session has expired. Please log in again.");
    }
    controller::teardown();
    info!("jobtrack exiting");
    result
}

async fn run(session: &Arc<SessionController>, command: &str, args: &[String]) -> Result<()> {
    match command {
        "status" => status(session),
        "login" => login(session, args.first().map(String::as_str)).await,
        "register" => register(session).await,
        "logout" => {
            session.logout().await;
            println!("Logged out.");
            Ok(())
        }
        "oauth-url" => {
            let request = session.begin_external_login()?;
            println!("{}", request.authorize_url);
            eprintln!("state: {}", request.state);
            Ok(())
        }
        "oauth-complete" => {
            let Some(token) = args.first() else {
                bail!("oauth-complete needs the provider token");
            };
            let credential = match args.get(1) {
                Some(state) => session.complete_external_callback(state, token).await,
                None => session.complete_external_login(token).await,
            }
            .map_err(report)?;
            println!("Signed in as {}", credential.subject_id());
            Ok(())
        }
        "route" => route(session, args),
        "applications" => applications(session).await,
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

fn status(session: &SessionController) -> Result<()> {
    match session.session() {
        SessionState::Authenticated(credential) => {
            println!("Logged in as {}", credential.subject_id());
            println!(
                "Access token expires in {} minutes",
                credential.minutes_until_expiry()
            );
        }
        SessionState::Anonymous => println!("Not logged in."),
    }
    Ok(())
}

fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(value) => print!("{} [{}]: ", label, value),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line).context("Failed to read input")?;
    let line = line.trim();
    Ok(match (line.is_empty(), default) {
        (true, Some(value)) => value.to_string(),
        _ => line.to_string(),
    })
}

async fn login(session: &SessionController, email: Option<&str>) -> Result<()> {
    let email = match email {
        Some(email) => email.to_string(),
        None => prompt("Email", session.config().last_email.as_deref())?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    let credential = session.login(&email, &password).await.map_err(report)?;

    let remembered = Config::load_file().and_then(|mut config| {
        config.last_email = Some(email.trim().to_string());
        config.save()
    });
    if let Err(e) = remembered {
        debug!(error = %e, "Could not remember last email");
    }

    println!("Logged in as {}", credential.subject_id());
    Ok(())
}

async fn register(session: &SessionController) -> Result<()> {
    let name = prompt("Name", None)?;
    let email = prompt("Email", None)?;
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let credential = session
        .register(RegisterRequest::new(name, email, password))
        .await
        .map_err(report)?;
    println!("Account created. Logged in as {}", credential.subject_id());
    Ok(())
}

fn route(session: &SessionController, args: &[String]) -> Result<()> {
    let guest = args.iter().any(|a| a == "--guest");
    let path = args.iter().find(|a| !a.starts_with("--"));

    let decision = match (guest, path) {
        (true, _) => session.guard().require_guest(),
        (false, Some(path)) => session.guard().require_auth(path),
        (false, None) => bail!("route needs a path"),
    };

    println!("{}", serde_json::to_string_pretty(&decision)?);
    if let Some(location) = decision.location() {
        println!("-> {}", location);
    }
    Ok(())
}

async fn applications(session: &SessionController) -> Result<()> {
    if !session.session().is_authenticated() && session.store().refresh_token().is_none() {
        bail!("Not logged in. Run `jobtrack login` first.");
    }

    let client = ApiClient::new(Arc::clone(session.authorizer()), session.config());
    let applications = client.fetch_applications().await?;
    if applications.is_empty() {
        println!("No applications yet.");
    }
    for app in applications {
        println!("{:<12} {}", app.status.to_string(), app.display_name());
    }
    Ok(())
}

/// Turn a session error into a message fit for the terminal.
fn report(error: SessionError) -> anyhow::Error {
    match error {
        SessionError::ValidationFailed(fields) => {
            let lines: Vec<String> = fields
                .iter()
                .map(|f| format!("  {}: {}", f.field, f.message))
                .collect();
            anyhow::anyhow!("Please fix the following:\n{}", lines.join("\n"))
        }
        other => other.into(),
    }
}
