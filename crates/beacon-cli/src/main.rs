//! # beacon
//!
//! Command-line front end: wires settings, the identity adapter, the GraphQL
//! pipeline and the realtime transport together.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_client::{Client, ClientBuilder, GraphQLDocument, NewUser, NewUserData, NoVariables, Ping};
use beacon_core::logging::{init_json_subscriber, init_subscriber};
use beacon_identity::storage::SESSION_FILE_NAME;
use beacon_identity::{
    ActionCodeSettings, AuthProviderError, FederatedCredential, FirebaseAuth, IdentityProvider,
    User,
};
use beacon_realtime::{AbsintheTransport, TransportConfig};
use beacon_settings::{BeaconSettings, beacon_home, load_settings, load_settings_from_path};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{debug, info};

/// Beacon GraphQL client.
#[derive(Parser, Debug)]
#[command(name = "beacon", about = "Beacon GraphQL client", version)]
struct Cli {
    /// Settings file (defaults to `$BEACON_SETTINGS` or `~/.beacon/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level (overrides settings; `RUST_LOG` wins over both).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the API answers.
    Ping,
    /// Print users as they are created.
    WatchUsers {
        /// Stop after this many events.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Create an account and sign in.
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Sign in with email and password.
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Sign in with a token from an external identity provider.
    SignInFederated {
        /// Provider ID.
        #[arg(long, default_value = "google.com")]
        provider_id: String,
        /// OIDC ID token.
        #[arg(long)]
        id_token: Option<String>,
        /// OAuth access token.
        #[arg(long)]
        access_token: Option<String>,
        /// Redirect URI registered with the provider.
        #[arg(long, default_value = "http://localhost")]
        request_uri: String,
    },
    /// Sign out and forget the stored session.
    SignOut,
    /// Email a password reset link.
    ResetPassword {
        #[arg(long)]
        email: String,
        /// Where the link should lead after the reset.
        #[arg(long)]
        continue_url: Option<String>,
    },
    /// Show the signed-in user.
    Whoami,
    /// Print a current ID token, refreshing it if needed.
    Token,
}

/// Everything a command may need.
struct App {
    settings: BeaconSettings,
    identity: Arc<FirebaseAuth>,
    client: Client,
}

impl App {
    fn new(mut settings: BeaconSettings) -> Result<Self> {
        if settings.identity.session_path.is_none() {
            let path = beacon_home().join(SESSION_FILE_NAME);
            settings.identity.session_path = Some(path.to_string_lossy().into_owned());
        }
        let identity = Arc::new(
            FirebaseAuth::new(settings.identity.clone())
                .context("failed to initialize identity provider")?,
        );
        let client = ClientBuilder::from_settings(&settings.api)
            .token_source(identity.clone())
            .build();
        Ok(Self {
            settings,
            identity,
            client,
        })
    }
}

fn load(path: Option<&PathBuf>) -> Result<BeaconSettings> {
    let settings = match path {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

fn print_user(user: &User) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(user)?);
    Ok(())
}

/// Report an identity failure the way a UI would and fail the command.
fn auth_failure(err: &AuthProviderError) -> ExitCode {
    debug!(code = %err.code, "{err}");
    eprintln!("{}", err.notice());
    ExitCode::FAILURE
}

async fn ping(app: &App) -> Result<ExitCode> {
    let data = app
        .client
        .query_as::<Ping>(&NoVariables {})
        .await
        .context("ping failed")?;
    let up = data.ping.and_then(|p| p.status).unwrap_or(false);
    println!("{}", if up { "ok" } else { "down" });
    Ok(if up { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn watch_users(app: &App, limit: Option<usize>) -> Result<ExitCode> {
    let transport = AbsintheTransport::connect(TransportConfig::from(&app.settings.realtime))
        .await
        .context("failed to open realtime socket")?;
    let client = ClientBuilder::from_settings(&app.settings.api)
        .token_source(app.identity.clone())
        .subscriptions(Arc::new(transport.clone()))
        .build();

    let mut results = client.subscription(NewUser::request(&NoVariables {}));
    let mut seen = 0usize;
    info!("watching for new users");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = results.next() => {
                let Some(result) = next else { break };
                if let Some(error) = &result.error {
                    transport.disconnect().await;
                    return Err(anyhow::Error::new(error.clone()).context("subscription failed"));
                }
                let data: NewUserData = result.data_as().context("unexpected newUser payload")?;
                if let Some(user) = data.new_user {
                    println!(
                        "{}\t{}",
                        user.id.unwrap_or_default(),
                        user.name.unwrap_or_default()
                    );
                }
                seen += 1;
                if limit.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
        }
    }

    drop(results);
    transport.disconnect().await;
    Ok(ExitCode::SUCCESS)
}

async fn run(cli: Cli, app: App) -> Result<ExitCode> {
    let identity = app.identity.as_ref();
    let code = match cli.command {
        Command::Ping => return ping(&app).await,
        Command::WatchUsers { limit } => return watch_users(&app, limit).await,
        Command::SignUp { email, password } => match identity.sign_up(&email, &password).await {
            Ok(user) => print_user(&user).map(|()| ExitCode::SUCCESS)?,
            Err(e) => auth_failure(&e),
        },
        Command::SignIn { email, password } => match identity.sign_in(&email, &password).await {
            Ok(user) => print_user(&user).map(|()| ExitCode::SUCCESS)?,
            Err(e) => auth_failure(&e),
        },
        Command::SignInFederated {
            provider_id,
            id_token,
            access_token,
            request_uri,
        } => {
            let credential = FederatedCredential {
                provider_id,
                id_token,
                access_token,
                request_uri,
            };
            match identity.sign_in_with_federated(&credential).await {
                Ok(user) => print_user(&user).map(|()| ExitCode::SUCCESS)?,
                Err(e) => auth_failure(&e),
            }
        }
        Command::SignOut => match identity.sign_out().await {
            Ok(()) => {
                app.client.clear_cache();
                println!("signed out");
                ExitCode::SUCCESS
            }
            Err(e) => auth_failure(&e),
        },
        Command::ResetPassword {
            email,
            continue_url,
        } => {
            let action = continue_url.map(|url| ActionCodeSettings {
                url,
                handle_code_in_app: false,
            });
            match identity.reset_password(&email, action.as_ref()).await {
                Ok(()) => {
                    println!("password reset email sent to {email}");
                    ExitCode::SUCCESS
                }
                Err(e) => auth_failure(&e),
            }
        }
        Command::Whoami => match identity.current_user() {
            Some(user) => print_user(&user).map(|()| ExitCode::SUCCESS)?,
            None => {
                println!("not signed in");
                ExitCode::FAILURE
            }
        },
        Command::Token => match identity.get_id_token().await.context("failed to get ID token")? {
            Some(token) => {
                println!("{token}");
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("not signed in");
                ExitCode::FAILURE
            }
        },
    };
    Ok(code)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = load(cli.settings.as_ref())?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.logging.level.clone());
    if cli.json_logs || settings.logging.json {
        init_json_subscriber(&level);
    } else {
        init_subscriber(&level);
    }

    let app = App::new(settings)?;
    run(cli, app).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
