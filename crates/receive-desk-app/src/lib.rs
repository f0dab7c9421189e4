#![warn(missing_docs)]
//! # receive-desk-app
//!
//! ## Purpose
//! Wires session, auth, navigation, and API client together for the
//! `receive-desk` command-line front end.
//!
//! ## Responsibilities
//! - Load [`AppConfig`] from `.env` and `RECEIVE_DESK_*` environment variables.
//! - Install the `tracing` subscriber.
//! - Own the shared [`SessionStore`] and hand it to every subsystem.
//! - Parse and run CLI [`Command`]s.
//! - Project session and route state into a flat [`SessionStatus`].
//!
//! ## Data flow
//! CLI args -> [`Command::parse`] -> [`App::execute`] -> auth flow / navigator
//! -> rendered text on stdout.
//!
//! ## Ownership and lifetimes
//! [`App`] holds the only `Arc<SessionStore>` created per process; the auth
//! flow, navigator, and API client each hold a clone.
//!
//! ## Error model
//! Subsystem failures are wrapped in [`AppError`]; the binary exits non-zero
//! on any of them.
//!
//! ## Security and privacy notes
//! - The password is read from `RECEIVE_DESK_PASSWORD`, never from argv.
//! - [`redact_sensitive`] strips credential values from text bound for logs.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, ConfigError, Environment};
use receive_desk_api::{ApiClient, ApiConfig, ApiError};
use receive_desk_auth::{AuthApi, AuthError, AuthFlow, AuthPhase};
use receive_desk_core::Credentials;
use receive_desk_router::{HOME_PATH, NavigationOutcome, Navigator, RouteTable};
use receive_desk_session::{SessionStore, StorageError};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("RECEIVE_DESK_VERSION");

/// Prefix of every configuration environment variable.
pub const ENV_PREFIX: &str = "RECEIVE_DESK";

/// Environment variable holding the log filter.
pub const LOG_FILTER_ENV: &str = "RECEIVE_DESK_LOG";

/// Environment variable holding the login password.
pub const PASSWORD_ENV: &str = "RECEIVE_DESK_PASSWORD";

const SENSITIVE_KEYS: [&str; 4] = ["bearer", "password", "token", "authorization"];

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    /// Base URL of the remote receiving API.
    pub api_url: String,
    /// File the session is persisted to.
    pub session_file: PathBuf,
    /// Timeout of ordinary requests, in seconds.
    pub request_timeout_secs: u64,
    /// Timeout of image uploads, in seconds.
    pub image_timeout_secs: u64,
}

impl AppConfig {
    /// Loads `.env` (when present) and then the process environment.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] when `RECEIVE_DESK_API_URL` is missing or a
    /// value has the wrong type.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_source(None)
    }

    /// Builds the config from `source` instead of the process environment
    /// when given. Keys use the full `RECEIVE_DESK_*` names.
    ///
    /// # Errors
    /// Same as [`AppConfig::load`].
    pub fn from_source(source: Option<config::Map<String, String>>) -> Result<Self, AppError> {
        let settings = Config::builder()
            .set_default("session_file", "receive-desk-session.json")?
            .set_default("request_timeout_secs", 30)?
            .set_default("image_timeout_secs", 60)?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .ignore_empty(true)
                    .source(source),
            )
            .build()?;
        Ok(settings.try_deserialize::<Self>()?)
    }

    /// API client settings derived from this config.
    ///
    /// # Errors
    /// Returns [`AppError::Api`] when the API URL is unusable.
    pub fn api_config(&self) -> Result<ApiConfig, AppError> {
        let mut api = ApiConfig::new(&self.api_url)?;
        api.request_timeout = Duration::from_secs(self.request_timeout_secs.max(1));
        api.upload_timeout = Duration::from_secs(self.image_timeout_secs.max(1));
        Ok(api)
    }
}

/// Installs the global `fmt` subscriber filtered by `RECEIVE_DESK_LOG`
/// (default `info`). Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Redacts credential values in log-safe output.
///
/// Values following `password`, `token`, or `authorization` (with `=` or `:`)
/// and the token after `Bearer` are replaced up to the next `&`, `,`, or
/// whitespace.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for key in SENSITIVE_KEYS {
        redacted = redact_key_value(&redacted, key);
    }
    redacted
}

fn redact_key_value(input: &str, key: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let mut output = String::with_capacity(input.len());
    let mut cursor = 0;

    while let Some(offset) = lower[cursor..].find(key) {
        let key_end = cursor + offset + key.len();
        let rest = &input[key_end..];
        let separator = rest
            .bytes()
            .take_while(|byte| matches!(byte, b'=' | b':' | b' '))
            .count();
        let has_assignment = rest[..separator].contains(['=', ':']);

        if separator == 0 || (!has_assignment && key != "bearer") {
            output.push_str(&input[cursor..key_end]);
            cursor = key_end;
            continue;
        }

        let value_start = key_end + separator;
        let value_len = input[value_start..]
            .find(|c: char| c == '&' || c == ',' || c.is_whitespace())
            .unwrap_or(input.len() - value_start);
        output.push_str(&input[cursor..value_start]);
        output.push_str("<redacted>");
        cursor = value_start + value_len;
    }

    output.push_str(&input[cursor..]);
    output
}

/// One CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print session and route state.
    Status,
    /// Run a navigation through the guard and print where it landed.
    Navigate(String),
    /// Sign in; the password comes from [`PASSWORD_ENV`].
    Login {
        /// Tenant selector.
        tenant: String,
        /// Database selector.
        database: String,
        /// User code.
        user_code: String,
    },
    /// Clear the stored session.
    Logout,
}

impl Command {
    /// Parses arguments following the program name.
    ///
    /// # Errors
    /// Returns [`AppError::Usage`] for unknown commands or wrong arity.
    pub fn parse(args: &[String]) -> Result<Self, AppError> {
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        match words.as_slice() {
            [] | ["status"] => Ok(Self::Status),
            ["navigate", path] => Ok(Self::Navigate((*path).to_string())),
            ["login", tenant, database, user_code] => Ok(Self::Login {
                tenant: (*tenant).to_string(),
                database: (*database).to_string(),
                user_code: (*user_code).to_string(),
            }),
            ["logout"] => Ok(Self::Logout),
            _ => Err(AppError::Usage(usage())),
        }
    }
}

/// Usage text printed on bad arguments.
pub fn usage() -> String {
    format!(
        "usage: receive-desk [status | navigate <path> | login <provider> <database> <user> | logout]\n\
         login reads the password from {PASSWORD_ENV}"
    )
}

/// Flat snapshot of session and route state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current auth phase.
    pub phase: AuthPhase,
    /// Signed-in user code.
    pub user_code: Option<String>,
    /// `provider/database` of the stored login context.
    pub tenant: Option<String>,
    /// Granted permission keys.
    pub granted: Vec<String>,
    /// Whether the user holds the super-admin override.
    pub super_admin: bool,
    /// Path of the last committed route.
    pub route: Option<String>,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "phase={:?}", self.phase)?;
        writeln!(f, "user={}", self.user_code.as_deref().unwrap_or("-"))?;
        writeln!(f, "tenant={}", self.tenant.as_deref().unwrap_or("-"))?;
        writeln!(f, "granted={}", self.granted.join(","))?;
        writeln!(f, "super_admin={}", self.super_admin)?;
        write!(f, "route={}", self.route.as_deref().unwrap_or("-"))
    }
}

/// Application root owning the shared session.
pub struct App {
    store: Arc<SessionStore>,
    api: ApiClient,
    auth: AuthFlow,
    navigator: Navigator,
}

impl App {
    /// Opens the session file and builds every subsystem from `config`.
    ///
    /// # Errors
    /// Returns [`AppError::Storage`] for an unreadable session file and
    /// [`AppError::Api`] for a bad API URL.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let store = Arc::new(SessionStore::open_file(config.session_file.clone())?);
        let api = ApiClient::new(config.api_config()?, Arc::clone(&store))?;
        let auth_api: Arc<dyn AuthApi> = Arc::new(api.clone());
        Ok(Self::with_auth_api(store, api, auth_api))
    }

    /// Builds the app with a custom authentication collaborator.
    pub fn with_auth_api(
        store: Arc<SessionStore>,
        api: ApiClient,
        auth_api: Arc<dyn AuthApi>,
    ) -> Self {
        Self {
            auth: AuthFlow::new(auth_api, Arc::clone(&store)),
            navigator: Navigator::new(RouteTable::standard(), Arc::clone(&store)),
            store,
            api,
        }
    }

    /// Shared session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// API client bound to the shared session.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Navigator bound to the shared session.
    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    /// Signs in and then navigates home.
    ///
    /// # Errors
    /// Returns [`AppError::Auth`] when the login fails.
    pub async fn login(&self, credentials: &Credentials) -> Result<NavigationOutcome, AppError> {
        let identity = self.auth.login(credentials).await?;
        info!(user_code = %identity.user_code, "session started");
        Ok(self.navigator.navigate(HOME_PATH))
    }

    /// Clears the session and navigates home, which lands on the login route.
    ///
    /// # Errors
    /// Returns [`AppError::Auth`] when the store rejects the commit.
    pub async fn logout(&self) -> Result<NavigationOutcome, AppError> {
        self.auth.logout().await?;
        Ok(self.navigator.navigate(HOME_PATH))
    }

    /// Projects the current state into a [`SessionStatus`].
    pub fn status(&self) -> SessionStatus {
        let session = self.store.get();
        SessionStatus {
            phase: self.auth.phase(),
            user_code: session
                .identity
                .as_ref()
                .map(|identity| identity.user_code.clone()),
            tenant: session.login_context.as_ref().map(|context| {
                format!("{}/{}", context.tenant_selector, context.database_selector)
            }),
            granted: session
                .permissions
                .as_ref()
                .map(|permissions| permissions.granted_keys().map(str::to_string).collect())
                .unwrap_or_default(),
            super_admin: session.is_super_admin(),
            route: self.navigator.current().map(|route| route.path),
        }
    }

    /// Runs one command and returns the text to print.
    ///
    /// # Errors
    /// - [`AppError::Usage`] when `login` runs without a password.
    /// - Subsystem errors from the command itself.
    pub async fn execute(
        &self,
        command: Command,
        password: Option<String>,
    ) -> Result<String, AppError> {
        match command {
            Command::Status => Ok(self.status().to_string()),
            Command::Navigate(path) => Ok(describe_outcome(&self.navigator.navigate(path))),
            Command::Login {
                tenant,
                database,
                user_code,
            } => {
                let password = password
                    .ok_or_else(|| AppError::Usage(format!("{PASSWORD_ENV} is not set")))?;
                let credentials = Credentials::new(tenant, database, user_code, password);
                let outcome = self.login(&credentials).await?;
                Ok(describe_outcome(&outcome))
            }
            Command::Logout => Ok(describe_outcome(&self.logout().await?)),
        }
    }
}

/// Renders a navigation outcome as one line.
pub fn describe_outcome(outcome: &NavigationOutcome) -> String {
    match outcome {
        NavigationOutcome::Arrived {
            route,
            redirected_from,
        } => {
            let name = route.name.as_deref().unwrap_or("-");
            match redirected_from {
                Some(from) => format!("{} ({name}) redirected from {from}", route.path),
                None => format!("{} ({name})", route.path),
            }
        }
        NavigationOutcome::Superseded => "navigation superseded".to_string(),
        NavigationOutcome::RedirectLimit => "navigation exceeded redirect limit".to_string(),
    }
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// API client error.
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    /// Auth flow error.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    /// Session storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// Bad command line.
    #[error("{0}")]
    Usage(String),
}

impl AppError {
    /// Text shown to the operator.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(error) => error.user_message(),
            other => other.to_string(),
        }
    }
}
