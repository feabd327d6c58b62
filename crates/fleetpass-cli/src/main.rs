//! fleetpass - command-line probe for the reservation server session.
//!
//! Signs in, keeps a session alive across credential renewals, and manages
//! login secrets saved in the OS keychain.

mod keychain;

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fleetpass_core::{HttpTransport, Session, SessionConfig, SessionIdentity};
use keychain::SecretStore;

const USAGE: &str = "\
Usage: fleetpass <command> <identifier>

Commands:
  login <identifier> [--remember]   Sign in once and print the identity
  watch <identifier>                Sign in and keep the session alive until Ctrl-C
  save-secret <identifier>          Save the login secret in the OS keychain
  forget <identifier>               Remove the saved login secret";

/// Base URL override, read after the .env file is loaded
const BASE_URL_ENV: &str = "FLEETPASS_BASE_URL";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and to a daily file under the cache directory. The
/// returned guard flushes the file writer and must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_dir = SessionConfig::cache_dir()
        .and_then(|dir| std::fs::create_dir_all(&dir).map(|_| dir).map_err(Into::into));
    let (file_layer, guard) = match log_dir {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fleetpass.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

enum Command {
    Login { identifier: String, remember: bool },
    Watch { identifier: String },
    SaveSecret { identifier: String },
    Forget { identifier: String },
}

fn parse_args(args: &[String]) -> Result<Command> {
    let command = args.get(1).map(String::as_str);
    let identifier = args.get(2).cloned();

    let Some(identifier) = identifier.filter(|id| !id.starts_with("--")) else {
        bail!("{USAGE}");
    };

    let command = match command {
        Some("login") => Command::Login {
            identifier,
            remember: args[3..].iter().any(|a| a == "--remember"),
        },
        Some("watch") => Command::Watch { identifier },
        Some("save-secret") => Command::SaveSecret { identifier },
        Some("forget") => Command::Forget { identifier },
        _ => bail!("{USAGE}"),
    };
    Ok(command)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;

    let _guard = init_tracing();
    info!("fleetpass starting");

    let mut config = SessionConfig::load()?;
    if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
        config = config.with_base_url(base_url);
    }

    match command {
        Command::Login {
            identifier,
            remember,
        } => login(config, &identifier, remember).await,
        Command::Watch { identifier } => watch(config, &identifier).await,
        Command::SaveSecret { identifier } => {
            let secret = rpassword::prompt_password("Secret: ")?;
            SecretStore::store(&identifier, &secret)?;
            println!("Saved secret for {identifier}");
            Ok(())
        }
        Command::Forget { identifier } => {
            if SecretStore::delete(&identifier)? {
                println!("Removed secret for {identifier}");
            } else {
                println!("No secret saved for {identifier}");
            }
            Ok(())
        }
    }
}

/// Secret from the keychain, or prompted for when none is saved.
fn secret_for(identifier: &str) -> Result<(String, bool)> {
    match SecretStore::get(identifier) {
        Ok(Some(secret)) => return Ok((secret, true)),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Keychain unavailable, prompting instead"),
    }
    let secret = rpassword::prompt_password("Secret: ")?;
    Ok((secret, false))
}

async fn sign_in(
    config: &SessionConfig,
    identifier: &str,
    remember: bool,
) -> Result<(Session<HttpTransport>, SessionIdentity)> {
    let transport = Arc::new(HttpTransport::new(config).context("Failed to build HTTP client")?);
    let session = Session::new(config.clone(), transport)?;

    let (secret, from_keychain) = secret_for(identifier)?;
    let identity = session
        .login(identifier, &secret, remember)
        .await
        .with_context(|| format!("Login failed for {identifier}"))?;

    if remember && !from_keychain {
        if let Err(e) = SecretStore::store(identifier, &secret) {
            warn!(error = %e, "Failed to store secret");
        }
    }

    // Reload so an environment base URL override is not persisted
    let saved = SessionConfig::load().and_then(|mut saved| {
        saved.last_identifier = Some(identifier.to_string());
        saved.save()
    });
    if let Err(e) = saved {
        warn!(error = %e, "Failed to save config");
    }

    Ok((session, identity))
}

fn print_identity(identity: &SessionIdentity) {
    println!(
        "Signed in as {} <{}> ({}, {})",
        identity.display_name, identity.email, identity.role, identity.status
    );
    if identity.must_change_password {
        println!("The server asks for a password change.");
    }
}

async fn login(config: SessionConfig, identifier: &str, remember: bool) -> Result<()> {
    let (session, identity) = sign_in(&config, identifier, remember).await?;
    print_identity(&identity);
    if let Some(at) = session.next_renewal_at() {
        println!("Credential renews at {}", at.to_rfc3339());
    }
    Ok(())
}

async fn watch(config: SessionConfig, identifier: &str) -> Result<()> {
    let (session, identity) = sign_in(&config, identifier, true).await?;
    print_identity(&identity);

    let (changes, mut changed) = mpsc::unbounded_channel();
    let _subscription = session.subscribe(move |credential| {
        let _ = changes.send(credential.is_some());
    });

    if let Some(at) = session.next_renewal_at() {
        println!("Next renewal at {}", at.to_rfc3339());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Signing out...");
                session.logout().await;
                return Ok(());
            }
            change = changed.recv() => match change {
                Some(true) => {
                    info!("Credential renewed");
                    match session.next_renewal_at() {
                        Some(at) => println!("Renewed; next renewal at {}", at.to_rfc3339()),
                        None => println!("Renewed"),
                    }
                }
                Some(false) | None => bail!("Session ended; sign in again"),
            }
        }
    }
}
