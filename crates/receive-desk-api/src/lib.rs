#![warn(missing_docs)]
//! # receive-desk-api
//!
//! ## Purpose
//! HTTP client for the remote receiving API: authentication, permission
//! administration, receive documents, and document images.
//!
//! ## Responsibilities
//! - Validate and normalize the configured base URL.
//! - Implement [`AuthApi`] for the auth flow.
//! - Attach the stored login context to every tenant-scoped request.
//! - Map transport, status, and decode failures into [`ApiError`].
//! - Downscale and re-encode photos before upload ([`compress_image`]).
//!
//! ## Data flow
//! Caller -> `ApiClient::<endpoint>` -> request built from base URL + login
//! context -> `reqwest` -> JSON envelope -> typed rows or [`ApiReply`].
//!
//! ## Ownership and lifetimes
//! The client is cheap to clone; it shares the `reqwest` connection pool and
//! the `Arc<SessionStore>` it reads the login context from.
//!
//! ## Error model
//! Every endpoint returns [`ApiError`]. Tenant-scoped calls made without a
//! stored login context fail with [`ApiError::MissingLoginContext`] before any
//! request is sent.
//!
//! ## Security and privacy notes
//! The authentication request carries the password in its query string, as the
//! server contract requires; its URL is never logged and is stripped from
//! transport errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use receive_desk_auth::{AuthApi, AuthError};
use receive_desk_core::{
    ApiEnvelope, ApiReply, Credentials, DocListQuery, LoginContext, NewReceiveDoc,
    PermissionGrant, PermissionSet, ReceiveDocDraft, UserIdentity, generate_doc_no,
};
use receive_desk_session::SessionStore;
use reqwest::{Method, Request};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

mod compress;

pub use compress::{
    DEFAULT_IMAGE_QUALITY, DEFAULT_MAX_IMAGE_WIDTH, MAX_IMAGE_PAYLOAD_BYTES, compress_image,
    estimated_payload_bytes,
};

/// Default timeout for ordinary requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout for image uploads.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for [`ApiClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL every endpoint path is joined onto.
    pub base_url: Url,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
    /// Timeout applied to image uploads instead of `request_timeout`.
    pub upload_timeout: Duration,
}

impl ApiConfig {
    /// Creates a config with default timeouts.
    ///
    /// # Errors
    /// Returns [`ApiError::InvalidEndpoint`] when `base_url` is unusable.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Ok(Self {
            base_url: validate_base_url(base_url)?,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        })
    }
}

/// Parses the API base URL and guarantees a trailing slash so endpoint paths
/// join beneath it.
///
/// # Errors
/// Returns [`ApiError::InvalidEndpoint`] for unparsable URLs or schemes other
/// than `http`/`https`.
pub fn validate_base_url(raw: &str) -> Result<Url, ApiError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|error| ApiError::InvalidEndpoint(format!("invalid api url: {error}")))?;

    match url.scheme() {
        "https" => {}
        "http" => warn!(%url, "api base url is not https"),
        other => {
            return Err(ApiError::InvalidEndpoint(format!(
                "unsupported api url scheme: {other}"
            )));
        }
    }

    if url.cannot_be_a_base() {
        return Err(ApiError::InvalidEndpoint(
            "api url cannot be used as a base".to_string(),
        ));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Result of creating a receive document.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedReceiveDoc {
    /// Generated document number.
    pub doc_no: String,
    /// Server reply.
    pub reply: ApiReply,
}

#[derive(Serialize)]
struct ReceiveDocUpdate<'a> {
    docno: &'a str,
    details: &'a [Value],
}

#[derive(Serialize)]
struct DocImageUpload<'a> {
    doc_no: &'a str,
    image_file: &'a str,
}

/// Client for the remote receiving API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
    upload_timeout: Duration,
    store: Arc<SessionStore>,
}

impl ApiClient {
    /// Builds a client reading the login context from `store`.
    ///
    /// # Errors
    /// Returns [`ApiError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: ApiConfig, store: Arc<SessionStore>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| ApiError::Transport(error.to_string()))?;

        Ok(Self {
            base: config.base_url,
            http,
            upload_timeout: config.upload_timeout,
            store,
        })
    }

    /// Configured base URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Builds a request for `path` with query parameters.
    ///
    /// # Errors
    /// Returns [`ApiError::InvalidEndpoint`] or [`ApiError::Transport`] when
    /// the URL or request cannot be built.
    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Request, ApiError> {
        self.http
            .request(method, self.endpoint(path)?)
            .query(query)
            .build()
            .map_err(|error| ApiError::Transport(error.to_string()))
    }

    /// Returns the stored login context as `provider`/`dbname` query pairs.
    ///
    /// # Errors
    /// Returns [`ApiError::MissingLoginContext`] when nobody is signed in.
    pub fn tenant_query(&self) -> Result<Vec<(&'static str, String)>, ApiError> {
        let context = self
            .store
            .login_context()
            .ok_or(ApiError::MissingLoginContext)?;
        Ok(tenant_pairs(&context))
    }

    /// URL of a stored document image.
    ///
    /// # Errors
    /// Returns [`ApiError::MissingLoginContext`] when nobody is signed in.
    pub fn image_url(&self, guid_code: &str) -> Result<Url, ApiError> {
        let mut url = self.endpoint(&format!("getDocImage/{guid_code}"))?;
        url.query_pairs_mut().extend_pairs(self.tenant_query()?);
        Ok(url)
    }

    /// Lists user permission records for administration.
    ///
    /// # Errors
    /// Returns [`ApiError::Rejected`] when the server reports failure.
    pub async fn list_permissions(&self, search: &str) -> Result<Vec<PermissionSet>, ApiError> {
        let mut query = self.tenant_query()?;
        query.push(("search", search.to_string()));

        let envelope: ApiEnvelope<PermissionSet> = self
            .send(self.build_request(Method::GET, "getPermission", &query)?)
            .await?;
        if !envelope.success {
            return Err(rejected(envelope.message, "Failed to fetch permissions"));
        }
        Ok(envelope.data)
    }

    /// Replaces the three screen flags of one user.
    ///
    /// # Errors
    /// Returns [`ApiError::Rejected`] when the server reports failure.
    pub async fn update_permission(&self, grant: &PermissionGrant) -> Result<(), ApiError> {
        let mut query = self.tenant_query()?;
        query.push(("user", grant.user_code.clone()));
        query.extend(
            grant
                .flag_pairs()
                .into_iter()
                .map(|(key, flag)| (key, flag.to_string())),
        );

        let reply: ApiReply = self
            .send(self.build_request(Method::POST, "upDatePermission", &query)?)
            .await?;
        if !reply.success {
            return Err(rejected(reply.message, "Failed to update permission"));
        }
        debug!(user_code = %grant.user_code, "permission updated");
        Ok(())
    }

    /// Pages through receive documents, optionally filtered by status.
    ///
    /// # Errors
    /// Propagates transport, status, and decode failures.
    pub async fn receive_doc_list(&self, query: &DocListQuery) -> Result<ApiReply, ApiError> {
        let pairs = self.doc_list_pairs(query)?;
        self.send(self.build_request(Method::GET, "getReceiveDocList", &pairs)?)
            .await
    }

    /// Pages through sales orders available for receiving.
    ///
    /// # Errors
    /// Propagates transport, status, and decode failures.
    pub async fn so_doc_list(&self, query: &DocListQuery) -> Result<ApiReply, ApiError> {
        let pairs = self.doc_list_pairs(query)?;
        self.send(self.build_request(Method::GET, "getSODocList", &pairs)?)
            .await
    }

    /// Submits a receive document for approval.
    ///
    /// # Errors
    /// Propagates transport, status, and decode failures.
    pub async fn send_approve(&self, docno: &str) -> Result<ApiReply, ApiError> {
        self.doc_action("sendApprove", docno).await
    }

    /// Closes a receive job.
    ///
    /// # Errors
    /// Propagates transport, status, and decode failures.
    pub async fn send_close_job(&self, docno: &str) -> Result<ApiReply, ApiError> {
        self.doc_action("sendCloseJob", docno).await
    }

    /// Deletes a receive document.
    ///
    /// # Errors
    /// Propagates transport, status, and decode failures.
    pub async fn delete_receive_doc(&self, docno: &str) -> Result<ApiReply, ApiError> {
        self.doc_action("deleteReceiveDoc", docno).await
    }

    /// Fetches sales-order lines and received lines of one document.
    ///
    /// # Errors
    /// Propagates transport, status, and decode failures.
    pub async fn receive_doc_detail(&self, docno: &str) -> Result<ApiReply, ApiError> {
        self.doc_action("getReceiveDocDetail", docno).await
    }

    /// Opens a new receive document under a generated number, attributed to
    /// the signed-in user.
    ///
    /// # Errors
    /// Returns [`ApiError::Document`] when the number cannot be generated and
    /// propagates request failures.
    #[instrument(skip_all, fields(doc_ref = %draft.doc_ref))]
    pub async fn create_receive_doc(
        &self,
        draft: ReceiveDocDraft,
    ) -> Result<CreatedReceiveDoc, ApiError> {
        let query = self.tenant_query()?;
        let doc_no = generate_doc_no().map_err(|error| ApiError::Document(error.to_string()))?;
        let user_code = self
            .store
            .get()
            .identity
            .map(|identity| acting_user_code(&identity))
            .unwrap_or_default();
        let body = NewReceiveDoc::from_draft(doc_no.clone(), draft, user_code);

        let request = self
            .http
            .post(self.endpoint("createReceiveDoc")?)
            .query(&query)
            .json(&body)
            .build()
            .map_err(|error| ApiError::Transport(error.to_string()))?;
        let reply = self.send(request).await?;
        debug!(%doc_no, "receive document created");
        Ok(CreatedReceiveDoc { doc_no, reply })
    }

    /// Replaces the received lines of a document.
    ///
    /// # Errors
    /// Propagates transport, status, and decode failures.
    pub async fn update_receive_doc(
        &self,
        docno: &str,
        details: &[Value],
    ) -> Result<ApiReply, ApiError> {
        let query = self.tenant_query()?;
        let request = self
            .http
            .post(self.endpoint("updateReceiveDoc")?)
            .query(&query)
            .json(&ReceiveDocUpdate { docno, details })
            .build()
            .map_err(|error| ApiError::Transport(error.to_string()))?;
        self.send(request).await
    }

    /// Searches items by code or name.
    ///
    /// # Errors
    /// Propagates transport, status, and decode failures.
    pub async fn item_search(&self, search: &str) -> Result<ApiReply, ApiError> {
        self.search("getItemSearch", search).await
    }

    /// Looks up an item by scanned barcode.
    ///
    /// # Errors
    /// Propagates transport, status, and decode failures.
    pub async fn barcode_search(&self, search: &str) -> Result<ApiReply, ApiError> {
        self.search("getBarcodeSearch", search).await
    }

    /// Uploads one base64 image for a document.
    ///
    /// # Errors
    /// Propagates transport, status, and decode failures; the upload timeout
    /// replaces the ordinary request timeout.
    pub async fn save_doc_image(
        &self,
        doc_no: &str,
        image_base64: &str,
    ) -> Result<ApiReply, ApiError> {
        let query = self.tenant_query()?;
        debug!(
            doc_no,
            bytes = estimated_payload_bytes(image_base64),
            "uploading document image"
        );

        let request = self
            .http
            .post(self.endpoint("saveDocImage")?)
            .query(&query)
            .timeout(self.upload_timeout)
            .json(&DocImageUpload {
                doc_no,
                image_file: image_base64,
            })
            .build()
            .map_err(|error| ApiError::Transport(error.to_string()))?;
        self.send(request).await
    }

    /// Lists images attached to a document.
    ///
    /// # Errors
    /// Propagates transport, status, and decode failures.
    pub async fn images_list(&self, doc_no: &str) -> Result<ApiReply, ApiError> {
        let mut query = self.tenant_query()?;
        query.push(("doc_no", doc_no.to_string()));
        self.send(self.build_request(Method::GET, "getImagesList", &query)?)
            .await
    }

    /// Deletes one stored image.
    ///
    /// # Errors
    /// Propagates transport, status, and decode failures.
    pub async fn delete_doc_image(&self, guid_code: &str) -> Result<ApiReply, ApiError> {
        let query = self.tenant_query()?;
        self.send(self.build_request(
            Method::GET,
            &format!("deleteDocImage/{guid_code}"),
            &query,
        )?)
        .await
    }

    /// Builds the query of a document list request.
    ///
    /// # Errors
    /// Returns [`ApiError::MissingLoginContext`] when nobody is signed in.
    pub fn doc_list_pairs(
        &self,
        query: &DocListQuery,
    ) -> Result<Vec<(&'static str, String)>, ApiError> {
        let mut pairs = self.tenant_query()?;
        pairs.push(("search", query.search.clone()));
        pairs.push(("fromdate", query.from_date.clone()));
        pairs.push(("todate", query.to_date.clone()));
        if let Some(status) = query.status {
            pairs.push(("status", status.to_string()));
        }
        pairs.push(("page", query.page.to_string()));
        pairs.push(("size", query.size.to_string()));
        Ok(pairs)
    }

    async fn doc_action(&self, path: &str, docno: &str) -> Result<ApiReply, ApiError> {
        let mut query = self.tenant_query()?;
        query.push(("docno", docno.to_string()));
        self.send(self.build_request(Method::GET, path, &query)?)
            .await
    }

    async fn search(&self, path: &str, search: &str) -> Result<ApiReply, ApiError> {
        let mut query = self.tenant_query()?;
        query.push(("search", search.to_string()));
        self.send(self.build_request(Method::GET, path, &query)?)
            .await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|error| ApiError::InvalidEndpoint(format!("invalid endpoint {path}: {error}")))
    }

    async fn send<T: DeserializeOwned>(&self, request: Request) -> Result<T, ApiError> {
        let method = request.method().clone();
        let path = request.url().path().to_string();

        let response = self.http.execute(request).await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            warn!(%method, %path, status = status.as_u16(), "api request failed");
            return Err(ApiError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(transport_error)?;
        debug!(%method, %path, bytes = body.len(), "api request completed");
        serde_json::from_slice(&body).map_err(|error| ApiError::Decode(error.to_string()))
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<ApiEnvelope<UserIdentity>, AuthError> {
        let query = [
            ("provider_name", credentials.tenant_selector.clone()),
            ("database_name", credentials.database_selector.clone()),
            ("user_code", credentials.user_code.clone()),
            ("password", credentials.password.clone()),
        ];
        let request = self
            .build_request(Method::GET, "authentication", &query)
            .map_err(into_auth_error)?;
        self.send(request).await.map_err(into_auth_error)
    }

    async fn fetch_permissions(
        &self,
        user_code: &str,
        login_context: &LoginContext,
    ) -> Result<ApiEnvelope<PermissionSet>, AuthError> {
        let mut query = tenant_pairs(login_context);
        query.push(("usercode", user_code.to_string()));
        let request = self
            .build_request(Method::GET, "getUserPermission", &query)
            .map_err(into_auth_error)?;
        self.send(request).await.map_err(into_auth_error)
    }
}

fn tenant_pairs(context: &LoginContext) -> Vec<(&'static str, String)> {
    vec![
        ("provider", context.tenant_selector.clone()),
        ("dbname", context.database_selector.clone()),
    ]
}

/// Code recorded as the creator of new documents.
///
/// Identity rows may carry a separate `code` column; `user_code` is used when
/// it is absent.
pub fn acting_user_code(identity: &UserIdentity) -> String {
    identity
        .display_field("code")
        .filter(|code| !code.trim().is_empty())
        .unwrap_or_else(|| identity.user_code.clone())
}

fn rejected(message: Option<String>, fallback: &str) -> ApiError {
    ApiError::Rejected(message.unwrap_or_else(|| fallback.to_string()))
}

fn transport_error(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport(error.without_url().to_string())
    }
}

fn into_auth_error(error: ApiError) -> AuthError {
    AuthError::Transport(error.to_string())
}

/// Errors produced by the API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Base URL or endpoint path is unusable.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// Network-level failure.
    #[error("{0}")]
    Transport(String),
    /// The request exceeded its timeout.
    #[error("request timed out")]
    Timeout,
    /// The server answered with a non-success HTTP status.
    #[error("HTTP error! status: {0}")]
    Status(u16),
    /// The body was not the expected JSON.
    #[error("invalid response body: {0}")]
    Decode(String),
    /// The server answered `success: false`.
    #[error("{0}")]
    Rejected(String),
    /// A tenant-scoped call was made without a stored login context.
    #[error("no login context; sign in first")]
    MissingLoginContext,
    /// A document number could not be generated.
    #[error("document number generation failed: {0}")]
    Document(String),
    /// An image could not be decoded or encoded.
    #[error("image processing failed: {0}")]
    Image(String),
    /// The compressed image is still over the upload limit.
    #[error("image size exceeds {limit} bytes after compression ({actual} bytes)")]
    ImageTooLarge {
        /// Upload limit in bytes.
        limit: usize,
        /// Estimated payload size in bytes.
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    //! Unit tests for base URL normalization and error mapping.

    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = validate_base_url("https://api.example.test/receive/api").expect("url is valid");
        assert_eq!(url.as_str(), "https://api.example.test/receive/api/");
    }

    #[test]
    fn base_url_rejects_other_schemes() {
        assert!(validate_base_url("ftp://api.example.test/").is_err());
        assert!(validate_base_url("not a url").is_err());
        assert!(validate_base_url("mailto:ops@example.test").is_err());
    }

    #[test]
    fn status_error_matches_login_view_text() {
        assert_eq!(ApiError::Status(500).to_string(), "HTTP error! status: 500");
        assert_eq!(
            into_auth_error(ApiError::Status(502)).user_message(),
            "HTTP error! status: 502"
        );
    }

    #[test]
    fn acting_user_prefers_code_column() {
        let mut identity = UserIdentity::new("U1");
        assert_eq!(acting_user_code(&identity), "U1");

        identity
            .display_fields
            .insert("code".to_string(), Value::String("EMP-7".to_string()));
        assert_eq!(acting_user_code(&identity), "EMP-7");
    }
}
