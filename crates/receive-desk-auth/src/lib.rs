#![warn(missing_docs)]
//! # receive-desk-auth
//!
//! ## Purpose
//! Turns submitted credentials into a populated session, or a reported
//! failure, for `receive-desk`.
//!
//! ## Responsibilities
//! - Reject structurally incomplete credentials before any network call.
//! - Verify credentials and fetch permissions through an injectable
//!   [`AuthApi`] collaborator.
//! - Populate the [`SessionStore`] so it is never left half-written.
//! - Serialize login and logout attempts and expose the current [`AuthPhase`].
//!
//! ## Data flow
//! Login view collects [`Credentials`] -> [`AuthFlow::login`] ->
//! [`AuthApi::authenticate`] -> [`SessionStore::put_login_context`] ->
//! [`AuthApi::fetch_permissions`] -> [`SessionStore::put`].
//!
//! ## Ownership and lifetimes
//! The flow shares the store as `Arc<SessionStore>` with the navigator and
//! API client; it is the only writer besides explicit logout.
//!
//! ## Error model
//! Collaborators report [`AuthError::Transport`]; the flow folds those into
//! [`AuthError::AuthenticationFailed`] or [`AuthError::PermissionFetchFailed`]
//! depending on the step. A permission fetch failure rolls the whole session
//! back.
//!
//! ## Security and privacy notes
//! Passwords are forwarded to the collaborator and never logged or stored.
//!
//! ## Example
//! ```rust
//! use receive_desk_auth::AuthPhase;
//!
//! assert_ne!(AuthPhase::Anonymous, AuthPhase::Authenticated);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use receive_desk_core::{
    ApiEnvelope, CoreError, Credentials, LoginContext, PermissionSet, UserIdentity,
};
use receive_desk_session::{SessionStore, StorageError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Message shown when the server accepts the request but finds no user.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid username or password";

/// Message used when the permission endpoint returns no record.
pub const NO_PERMISSIONS_MESSAGE: &str = "No permissions found";

/// Remote authentication and permission collaborator.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Submits credentials; a match yields exactly one identity row.
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<ApiEnvelope<UserIdentity>, AuthError>;

    /// Fetches the permission record of `user_code` in `login_context`.
    async fn fetch_permissions(
        &self,
        user_code: &str,
        login_context: &LoginContext,
    ) -> Result<ApiEnvelope<PermissionSet>, AuthError>;
}

/// Observable lifecycle of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    /// No identity is stored and no login is running.
    Anonymous,
    /// A login attempt is in flight.
    Authenticating,
    /// An identity with its permission record is stored.
    Authenticated,
}

/// Login/logout orchestration over a shared [`SessionStore`].
pub struct AuthFlow {
    api: Arc<dyn AuthApi>,
    store: Arc<SessionStore>,
    login_gate: Mutex<()>,
    pending: AtomicUsize,
}

impl AuthFlow {
    /// Creates a flow writing to `store` through `api`.
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<SessionStore>) -> Self {
        Self {
            api,
            store,
            login_gate: Mutex::new(()),
            pending: AtomicUsize::new(0),
        }
    }

    /// Returns the session store this flow writes to.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Returns the current lifecycle phase.
    pub fn phase(&self) -> AuthPhase {
        if self.pending.load(Ordering::Acquire) > 0 {
            AuthPhase::Authenticating
        } else if self.store.is_authenticated() {
            AuthPhase::Authenticated
        } else {
            AuthPhase::Anonymous
        }
    }

    /// Runs one login attempt.
    ///
    /// Concurrent calls are serialized: each runs to completion before the
    /// next one touches the store.
    ///
    /// # Errors
    /// - [`AuthError::InvalidInput`] for blank fields; no request is sent.
    /// - [`AuthError::AuthenticationFailed`] for transport failures, rejected
    ///   credentials, or zero identity rows; the store is untouched.
    /// - [`AuthError::PermissionFetchFailed`] when permissions cannot be
    ///   loaded; the store is cleared.
    /// - [`AuthError::Storage`] when the store rejects a commit.
    #[instrument(skip_all, fields(user_code = %credentials.user_code))]
    pub async fn login(&self, credentials: &Credentials) -> Result<UserIdentity, AuthError> {
        credentials.validate().map_err(AuthError::InvalidInput)?;

        let _pending = PendingLogin::enter(&self.pending);
        let _gate = self.login_gate.lock().await;

        let mut identity = self
            .api
            .authenticate(credentials)
            .await
            .map_err(|error| {
                warn!(%error, "authentication request failed");
                AuthError::AuthenticationFailed(error.into_message())
            })?
            .into_first()
            .ok_or_else(|| {
                info!("authentication rejected");
                AuthError::AuthenticationFailed(INVALID_CREDENTIALS_MESSAGE.to_string())
            })?;

        if identity.user_code.trim().is_empty() {
            identity.user_code = credentials.user_code.clone();
        }

        let login_context = credentials.login_context();
        self.store.put_login_context(&login_context)?;

        let permissions = match self.fetch_permissions(&identity, &login_context).await {
            Ok(permissions) => permissions,
            Err(error) => {
                warn!(%error, "permission fetch failed, rolling back session");
                self.store.clear()?;
                return Err(error);
            }
        };

        self.store.put(&identity, &permissions)?;
        info!(
            granted = ?permissions.granted_keys().collect::<Vec<_>>(),
            "login succeeded"
        );
        Ok(identity)
    }

    /// Clears the stored session. No request is sent.
    ///
    /// Waits for an in-flight login to finish first, so a login can never
    /// repopulate the store after logout returns.
    ///
    /// # Errors
    /// Returns [`AuthError::Storage`] when the store rejects the commit.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _gate = self.login_gate.lock().await;
        self.store.clear()?;
        info!("logged out");
        Ok(())
    }

    async fn fetch_permissions(
        &self,
        identity: &UserIdentity,
        login_context: &LoginContext,
    ) -> Result<PermissionSet, AuthError> {
        self.api
            .fetch_permissions(&identity.user_code, login_context)
            .await
            .map_err(|error| AuthError::PermissionFetchFailed(error.into_message()))?
            .into_first()
            .ok_or_else(|| AuthError::PermissionFetchFailed(NO_PERMISSIONS_MESSAGE.to_string()))
    }
}

/// Counts a login as pending for its whole lifetime, including cancellation.
struct PendingLogin<'a>(&'a AtomicUsize);

impl<'a> PendingLogin<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for PendingLogin<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Errors produced by the auth flow and its collaborators.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credentials are structurally incomplete.
    #[error("invalid input: {0}")]
    InvalidInput(CoreError),
    /// Collaborator could not complete the request (network, timeout, HTTP
    /// status, undecodable body).
    #[error("auth transport failure: {0}")]
    Transport(String),
    /// Credentials were rejected or could not be verified.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    /// Permissions could not be loaded after a successful authentication.
    #[error("permission fetch failed: {0}")]
    PermissionFetchFailed(String),
    /// The session store rejected a commit.
    #[error("session storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Returns the inline message for the login view.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(_) => {
                "Please enter provider, database, user code and password".to_string()
            }
            Self::Transport(message) | Self::AuthenticationFailed(message) => message.clone(),
            Self::PermissionFetchFailed(message) => {
                format!("Unable to load permissions: {message}")
            }
            Self::Storage(_) => "Unable to save the session on this device".to_string(),
        }
    }

    fn into_message(self) -> String {
        match self {
            Self::Transport(message)
            | Self::AuthenticationFailed(message)
            | Self::PermissionFetchFailed(message) => message,
            other => other.to_string(),
        }
    }
}
