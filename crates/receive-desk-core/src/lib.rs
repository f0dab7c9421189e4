#![warn(missing_docs)]
//! # receive-desk-core
//!
//! ## Purpose
//! Defines the pure data model shared across the `receive-desk` workspace.
//!
//! ## Responsibilities
//! - Represent login context, credentials, user identity, and permission sets.
//! - Provide the [`SessionState`] snapshot consumed by the navigation guard.
//! - Describe the remote API envelope and receive-document payloads.
//! - Generate receive-document numbers.
//!
//! ## Data flow
//! The login view builds [`Credentials`]; the auth flow turns the server reply
//! into a [`UserIdentity`] plus [`PermissionSet`]; the session store persists
//! them and hands out [`SessionState`] snapshots to every reader.
//!
//! ## Ownership and lifetimes
//! All values own their strings and maps so snapshots can outlive the store
//! lock they were read under.
//!
//! ## Error model
//! Validation and formatting failures return [`CoreError`].
//!
//! ## Security and privacy notes
//! [`Credentials`] redacts its password in `Debug` output and is never
//! serialized.
//!
//! ## Example
//! ```rust
//! use receive_desk_core::{PermissionSet, SessionState, UserIdentity, RECEIVE_SCREEN};
//!
//! let state = SessionState {
//!     identity: Some(UserIdentity::new("U1")),
//!     permissions: Some(PermissionSet::from_iter([(RECEIVE_SCREEN, "1")])),
//!     login_context: None,
//! };
//! assert!(state.has_permission(RECEIVE_SCREEN));
//! assert!(!state.is_super_admin());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

/// Permission key guarding the receive-document screens.
pub const RECEIVE_SCREEN: &str = "receive_screen";
/// Permission key guarding the permission administration screen.
pub const ADMIN_SCREEN: &str = "admin_screen";
/// Permission key guarding the receive history screen.
pub const HISTORY_SCREEN: &str = "history_screen";

/// Literal flag value that marks a permission as granted.
pub const PERMISSION_GRANTED: &str = "1";
/// Literal flag value written for a revoked permission.
pub const PERMISSION_DENIED: &str = "0";

/// Reserved user code that satisfies every admin requirement.
pub const SUPERADMIN_USER_CODE: &str = "SUPERADMIN";

/// Prefix of generated receive-document numbers.
pub const RECEIVE_DOC_PREFIX: &str = "RCD";

/// Tenant/database selector pair sent with every authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginContext {
    /// Tenant (provider) selector.
    #[serde(rename = "provider_name")]
    pub tenant_selector: String,
    /// Database selector within the tenant.
    #[serde(rename = "database_name")]
    pub database_selector: String,
}

impl LoginContext {
    /// Creates a login context from its two selectors.
    pub fn new(tenant_selector: impl Into<String>, database_selector: impl Into<String>) -> Self {
        Self {
            tenant_selector: tenant_selector.into(),
            database_selector: database_selector.into(),
        }
    }
}

/// User-provided login credentials, alive for one authentication attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Tenant (provider) selector.
    pub tenant_selector: String,
    /// Database selector.
    pub database_selector: String,
    /// Account user code.
    pub user_code: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials from the four login form fields.
    pub fn new(
        tenant_selector: impl Into<String>,
        database_selector: impl Into<String>,
        user_code: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            tenant_selector: tenant_selector.into(),
            database_selector: database_selector.into(),
            user_code: user_code.into(),
            password: password.into(),
        }
    }

    /// Checks that every field is non-blank.
    ///
    /// # Errors
    /// Returns [`CoreError::MissingField`] naming the first blank field.
    pub fn validate(&self) -> Result<(), CoreError> {
        let fields = [
            ("tenant_selector", &self.tenant_selector),
            ("database_selector", &self.database_selector),
            ("user_code", &self.user_code),
            ("password", &self.password),
        ];

        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(CoreError::MissingField(name));
            }
        }

        Ok(())
    }

    /// Returns the login context carried by these credentials.
    pub fn login_context(&self) -> LoginContext {
        LoginContext::new(self.tenant_selector.clone(), self.database_selector.clone())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_selector", &self.tenant_selector)
            .field("database_selector", &self.database_selector)
            .field("user_code", &self.user_code)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Identity record returned by the authentication endpoint.
///
/// Only `user_code` carries meaning; every other column is kept verbatim for
/// display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// User code, compared case-insensitively against [`SUPERADMIN_USER_CODE`].
    #[serde(default)]
    pub user_code: String,
    /// Remaining identity columns.
    #[serde(flatten)]
    pub display_fields: BTreeMap<String, Value>,
}

impl UserIdentity {
    /// Creates an identity with no display fields.
    pub fn new(user_code: impl Into<String>) -> Self {
        Self {
            user_code: user_code.into(),
            display_fields: BTreeMap::new(),
        }
    }

    /// Returns a display column rendered as text.
    pub fn display_field(&self, name: &str) -> Option<String> {
        match self.display_fields.get(name)? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Returns `true` when this identity is the SUPERADMIN sentinel.
    pub fn is_super_admin(&self) -> bool {
        self.user_code.eq_ignore_ascii_case(SUPERADMIN_USER_CODE)
    }
}

/// Open mapping of permission keys to flags. Absent keys are denied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeMap<String, Value>);

impl PermissionSet {
    /// Creates an empty, all-denied permission set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only when `key` holds the literal `"1"` flag.
    pub fn is_granted(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(Value::String(flag)) if flag == PERMISSION_GRANTED)
    }

    /// Sets a raw flag value for `key`.
    pub fn insert(&mut self, key: impl Into<String>, flag: impl Into<String>) {
        self.0.insert(key.into(), Value::String(flag.into()));
    }

    /// Iterates the keys that are granted.
    pub fn granted_keys(&self) -> impl Iterator<Item = &str> {
        self.0
            .keys()
            .map(String::as_str)
            .filter(|key| self.is_granted(key))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (key, flag) in iter {
            set.insert(key, flag);
        }
        set
    }
}

/// Snapshot of the persisted session.
///
/// `identity` and `permissions` are either both present or both absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// Signed-in user, if any.
    pub identity: Option<UserIdentity>,
    /// Permission record of the signed-in user.
    pub permissions: Option<PermissionSet>,
    /// Tenant/database selectors of the last login.
    pub login_context: Option<LoginContext>,
}

impl SessionState {
    /// Returns the empty, anonymous state.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Returns `true` iff an identity is present.
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Returns `true` when the permission record grants `key`.
    pub fn has_permission(&self, key: &str) -> bool {
        self.permissions
            .as_ref()
            .is_some_and(|permissions| permissions.is_granted(key))
    }

    /// Returns `true` when the identity is the SUPERADMIN sentinel.
    pub fn is_super_admin(&self) -> bool {
        self.identity
            .as_ref()
            .is_some_and(UserIdentity::is_super_admin)
    }
}

/// Standard `{ success, data, message }` reply of the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    /// Server-side success flag.
    #[serde(default)]
    pub success: bool,
    /// Result rows.
    #[serde(default, bound(deserialize = "T: Deserialize<'de>"))]
    pub data: Vec<T>,
    /// Optional server message.
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Returns the first row of a successful reply.
    ///
    /// A reply with `success: false` or zero rows yields `None`.
    pub fn into_first(self) -> Option<T> {
        if !self.success {
            return None;
        }
        self.data.into_iter().next()
    }
}

/// Untyped reply for pass-through endpoints whose payload shape is owned by
/// the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiReply {
    /// Server-side success flag.
    #[serde(default)]
    pub success: bool,
    /// Optional server message.
    #[serde(default)]
    pub message: Option<String>,
    /// Every other top-level field (`data`, `total`, `details_so`, ...).
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

/// Administrative permission update for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    /// Target user code.
    pub user_code: String,
    /// Access to the receive screens.
    pub receive_screen: bool,
    /// Access to permission administration.
    pub admin_screen: bool,
    /// Access to receive history.
    pub history_screen: bool,
}

impl PermissionGrant {
    /// Returns the grant as `(key, "0"|"1")` query pairs.
    pub fn flag_pairs(&self) -> [(&'static str, &'static str); 3] {
        [
            (RECEIVE_SCREEN, flag(self.receive_screen)),
            (ADMIN_SCREEN, flag(self.admin_screen)),
            (HISTORY_SCREEN, flag(self.history_screen)),
        ]
    }
}

fn flag(granted: bool) -> &'static str {
    if granted {
        PERMISSION_GRANTED
    } else {
        PERMISSION_DENIED
    }
}

/// Filter and paging for receive/SO document lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocListQuery {
    /// Free-text search.
    pub search: String,
    /// Inclusive start date (`YYYY-MM-DD`), empty for unbounded.
    pub from_date: String,
    /// Inclusive end date (`YYYY-MM-DD`), empty for unbounded.
    pub to_date: String,
    /// Optional document status filter.
    pub status: Option<i32>,
    /// One-based page number.
    pub page: u32,
    /// Page size.
    pub size: u32,
}

impl Default for DocListQuery {
    fn default() -> Self {
        Self {
            search: String::new(),
            from_date: String::new(),
            to_date: String::new(),
            status: None,
            page: 1,
            size: 20,
        }
    }
}

/// Header fields entered when opening a new receive document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveDocDraft {
    /// Referenced sales order number.
    pub doc_ref: String,
    /// Customer code.
    pub cust_code: String,
    /// Salesperson code.
    pub sale_code: Option<String>,
    /// Branch code.
    pub branch_code: String,
    /// Free-text remark.
    pub remark: Option<String>,
}

/// Body of the create-receive-document request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReceiveDoc {
    /// Generated document number.
    pub doc_no: String,
    /// Referenced sales order number.
    pub doc_ref: String,
    /// Customer code.
    pub cust_code: String,
    /// Salesperson code, empty when unknown.
    pub sale_code: String,
    /// Branch code.
    pub branch_code: String,
    /// Code of the user creating the document.
    pub user_code: String,
    /// Free-text remark, empty when unset.
    pub remark: String,
}

impl NewReceiveDoc {
    /// Builds the request body from a draft.
    pub fn from_draft(
        doc_no: impl Into<String>,
        draft: ReceiveDocDraft,
        user_code: impl Into<String>,
    ) -> Self {
        Self {
            doc_no: doc_no.into(),
            doc_ref: draft.doc_ref,
            cust_code: draft.cust_code,
            sale_code: draft.sale_code.unwrap_or_default(),
            branch_code: draft.branch_code,
            user_code: user_code.into(),
            remark: draft.remark.unwrap_or_default(),
        }
    }
}

/// Formats a receive-document number for `at` with a four-digit suffix.
///
/// # Semantics
/// Output is `RCD<YYYYMMDDHHMMSS>-<suffix>`; suffix is reduced modulo 10000
/// and zero-padded.
///
/// # Errors
/// Returns [`CoreError::Timestamp`] when formatting fails.
pub fn format_doc_no(at: OffsetDateTime, suffix: u16) -> Result<String, CoreError> {
    let stamp = at
        .format(format_description!(
            "[year][month][day][hour][minute][second]"
        ))
        .map_err(CoreError::Timestamp)?;
    Ok(format!("{RECEIVE_DOC_PREFIX}{stamp}-{:04}", suffix % 10_000))
}

/// Generates a receive-document number from the local clock and a random
/// suffix.
///
/// # Errors
/// Returns [`CoreError::Timestamp`] when formatting fails.
pub fn generate_doc_no() -> Result<String, CoreError> {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let suffix = rand::rng().random_range(0..10_000_u16);
    format_doc_no(now, suffix)
}

/// Error type for core validation and formatting failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required credential field is blank.
    #[error("{0} must be non-empty")]
    MissingField(&'static str),
    /// Timestamp formatting failed.
    #[error("timestamp formatting failure: {0}")]
    Timestamp(time::error::Format),
}

#[cfg(test)]
mod tests {
    //! Unit tests for permission flags and identity semantics.

    use super::*;

    #[test]
    fn only_literal_one_grants_permission() {
        let raw = r#"{"receive_screen":"1","admin_screen":1,"history_screen":"0","x":true}"#;
        let set: PermissionSet = serde_json::from_str(raw).expect("permission set should decode");

        assert!(set.is_granted(RECEIVE_SCREEN));
        assert!(!set.is_granted(ADMIN_SCREEN));
        assert!(!set.is_granted(HISTORY_SCREEN));
        assert!(!set.is_granted("x"));
        assert!(!set.is_granted("missing"));
        assert_eq!(set.granted_keys().collect::<Vec<_>>(), vec![RECEIVE_SCREEN]);
    }

    #[test]
    fn superadmin_match_ignores_case() {
        assert!(UserIdentity::new("superadmin").is_super_admin());
        assert!(UserIdentity::new("SuperAdmin").is_super_admin());
        assert!(!UserIdentity::new("superadmin2").is_super_admin());
    }

    #[test]
    fn identity_keeps_unknown_columns() {
        let raw = r#"{"user_code":"U1","name_1":"Somchai","level":3}"#;
        let identity: UserIdentity = serde_json::from_str(raw).expect("identity should decode");

        assert_eq!(identity.user_code, "U1");
        assert_eq!(identity.display_field("name_1").as_deref(), Some("Somchai"));
        assert_eq!(identity.display_field("level").as_deref(), Some("3"));
        assert_eq!(identity.display_field("absent"), None);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials::new("T1", "D1", "U1", "hunter2");
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn doc_no_has_expected_shape() {
        let at = time::macros::datetime!(2024-03-07 09:05:02 UTC);
        assert_eq!(
            format_doc_no(at, 42).expect("format should succeed"),
            "RCD20240307090502-0042"
        );
    }
}
