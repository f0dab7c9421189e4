#![warn(missing_docs)]
//! # receive-desk-router
//!
//! ## Purpose
//! Declares the application's routes with their access requirements and
//! decides, for every requested transition, whether it may complete.
//!
//! ## Responsibilities
//! - Hold the static [`RouteTable`] and match request paths to route chains.
//! - Aggregate access flags across a matched chain into a [`RouteRequirement`].
//! - Evaluate the pure navigation guard ([`evaluate`]).
//! - Drive transitions through [`Navigator`], following redirects and
//!   dropping decisions that a newer request has superseded.
//!
//! ## Data flow
//! Path -> [`RouteTable::resolve`] -> [`ResolvedRoute::requirement`] +
//! [`receive_desk_session::SessionStore::get`] -> [`evaluate`] ->
//! [`GuardDecision`] -> [`Navigator`] commits or redirects.
//!
//! ## Ownership and lifetimes
//! The table owns its records. The navigator shares the session store through
//! `Arc` and only ever reads it.
//!
//! ## Error model
//! Guard decisions are never errors; a redirect to the access-denied page is a
//! successful decision. Only table construction can fail, with [`RouteError`].
//!
//! ## Security and privacy notes
//! An unauthenticated user is always sent to login, never to access-denied, so
//! the existence of permission-gated pages is not confirmed to anonymous users.
//!
//! ## Example
//! ```rust
//! use receive_desk_core::SessionState;
//! use receive_desk_router::{GuardDecision, RouteTable, RouteTarget, evaluate, LOGIN_ROUTE};
//!
//! let table = RouteTable::standard();
//! let route = table.resolve("/pages/receivedoc");
//! let decision = evaluate(&route.requirement(), route.is_login(), &SessionState::anonymous());
//! assert_eq!(decision, GuardDecision::Redirect(RouteTarget::name(LOGIN_ROUTE)));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use receive_desk_core::{ADMIN_SCREEN, HISTORY_SCREEN, RECEIVE_SCREEN, SessionState};
use receive_desk_session::SessionStore;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Path of the default route a signed-in user lands on.
pub const HOME_PATH: &str = "/";
/// Name of the login route.
pub const LOGIN_ROUTE: &str = "login";
/// Name of the access-denied route.
pub const ACCESS_DENIED_ROUTE: &str = "accessDenied";
/// Name of the route unmatched paths resolve to.
pub const NOT_FOUND_ROUTE: &str = "notfound";

/// Upper bound on guard redirects followed for one navigation.
pub const MAX_REDIRECTS: usize = 8;

/// Access flags declared on one route record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteAccess {
    /// `requiresAuth`: a signed-in session is needed.
    pub requires_auth: bool,
    /// Permission keys that must each be granted.
    pub permissions: Vec<String>,
    /// `requiresAdminPermission`: `admin_screen` or SUPERADMIN.
    pub requires_admin: bool,
}

impl RouteAccess {
    /// No requirement.
    pub fn public() -> Self {
        Self::default()
    }

    /// Requires a signed-in session.
    pub fn authenticated() -> Self {
        Self {
            requires_auth: true,
            ..Self::default()
        }
    }

    /// Adds a required permission key.
    pub fn with_permission(mut self, key: impl Into<String>) -> Self {
        self.permissions.push(key.into());
        self
    }

    /// `requiresReceivePermission`.
    pub fn with_receive(self) -> Self {
        self.with_permission(RECEIVE_SCREEN)
    }

    /// `requiresHistoryPermission`.
    pub fn with_history(self) -> Self {
        self.with_permission(HISTORY_SCREEN)
    }

    /// `requiresAdminPermission`.
    pub fn with_admin(mut self) -> Self {
        self.requires_admin = true;
        self
    }
}

/// Requirement of a whole matched chain: each flag is active if any record in
/// the chain declares it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteRequirement {
    /// A signed-in session is needed.
    pub requires_session: bool,
    /// Permission keys that must each be granted, in declaration order.
    pub required_permissions: Vec<String>,
    /// Admin access (`admin_screen` or SUPERADMIN) is needed.
    pub requires_admin: bool,
}

impl RouteRequirement {
    /// ORs together the access flags of every record in a chain.
    pub fn aggregate<'a>(chain: impl IntoIterator<Item = &'a RouteAccess>) -> Self {
        let mut requirement = Self::default();
        let mut seen = BTreeSet::new();

        for access in chain {
            requirement.requires_session |= access.requires_auth;
            requirement.requires_admin |= access.requires_admin;
            for key in &access.permissions {
                if seen.insert(key.as_str()) {
                    requirement.required_permissions.push(key.clone());
                }
            }
        }

        requirement
    }
}

/// Where a redirect points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// A named route.
    Name(String),
    /// A literal path.
    Path(String),
}

impl RouteTarget {
    /// Targets a named route.
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Targets a path.
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }
}

/// Outcome of one guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Let the transition complete unchanged.
    Allow,
    /// Replace the transition with another target.
    Redirect(RouteTarget),
}

/// Decides the only allowed outcome for a transition.
///
/// # Semantics
/// Rules are checked in order and the first match wins:
/// 1. session required but absent -> login;
/// 2. target is login while signed in -> home;
/// 3. any required permission not granted -> access denied;
/// 4. admin required without `admin_screen` or SUPERADMIN -> access denied;
/// 5. allow.
pub fn evaluate(
    requirement: &RouteRequirement,
    target_is_login: bool,
    session: &SessionState,
) -> GuardDecision {
    let authenticated = session.is_authenticated();

    if requirement.requires_session && !authenticated {
        return GuardDecision::Redirect(RouteTarget::name(LOGIN_ROUTE));
    }

    if target_is_login && authenticated {
        return GuardDecision::Redirect(RouteTarget::path(HOME_PATH));
    }

    if requirement
        .required_permissions
        .iter()
        .any(|key| !session.has_permission(key))
    {
        return GuardDecision::Redirect(RouteTarget::name(ACCESS_DENIED_ROUTE));
    }

    if requirement.requires_admin
        && !session.is_super_admin()
        && !session.has_permission(ADMIN_SCREEN)
    {
        return GuardDecision::Redirect(RouteTarget::name(ACCESS_DENIED_ROUTE));
    }

    GuardDecision::Allow
}

/// One declared route, optionally nesting child routes under a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    /// Route name used by named redirects.
    pub name: Option<String>,
    /// Absolute path, or a path relative to the parent record.
    pub path: String,
    /// Access flags declared on this record.
    pub access: RouteAccess,
    /// Nested routes rendered inside this record.
    pub children: Vec<RouteRecord>,
}

impl RouteRecord {
    /// Declares an unnamed record (typically a layout).
    pub fn layout(path: impl Into<String>) -> Self {
        Self {
            name: None,
            path: path.into(),
            access: RouteAccess::public(),
            children: Vec::new(),
        }
    }

    /// Declares a named, public record.
    pub fn named(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::layout(path)
        }
    }

    /// Sets the record's access flags.
    pub fn access(mut self, access: RouteAccess) -> Self {
        self.access = access;
        self
    }

    /// Appends a child record.
    pub fn child(mut self, child: RouteRecord) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    name: Option<String>,
    segments: Vec<Segment>,
    chain: Vec<RouteAccess>,
}

impl CompiledRoute {
    fn matches(&self, parts: &[&str]) -> Option<BTreeMap<String, String>> {
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal.eq_ignore_ascii_case(part) => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
            }
        }
        Some(params)
    }

    fn pattern(&self) -> String {
        let rendered: Vec<String> = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(literal) => literal.clone(),
                Segment::Param(name) => format!(":{name}"),
            })
            .collect();
        format!("/{}", rendered.join("/"))
    }
}

/// A path matched against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    /// Name of the matched leaf route.
    pub name: Option<String>,
    /// Normalized request path.
    pub path: String,
    /// Captured `:param` values.
    pub params: BTreeMap<String, String>,
    /// Access flags from the outermost record to the leaf.
    pub chain: Vec<RouteAccess>,
}

impl ResolvedRoute {
    /// Aggregated requirement of the matched chain.
    pub fn requirement(&self) -> RouteRequirement {
        RouteRequirement::aggregate(&self.chain)
    }

    /// Returns `true` when this is the login route.
    pub fn is_login(&self) -> bool {
        self.name.as_deref() == Some(LOGIN_ROUTE)
    }

    /// Returns a captured path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Static route declarations with matching and lookup.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    /// Builds a table after checking names and paths.
    ///
    /// # Errors
    /// - [`RouteError::InvalidPath`] for a top-level path not starting with `/`.
    /// - [`RouteError::DuplicateName`] when two records share a name.
    /// - [`RouteError::MissingRoute`] when `login`, `accessDenied`, or
    ///   `notfound` is not declared.
    pub fn new(records: Vec<RouteRecord>) -> Result<Self, RouteError> {
        let mut names = BTreeSet::new();
        for record in &records {
            if !record.path.starts_with('/') {
                return Err(RouteError::InvalidPath(record.path.clone()));
            }
            collect_names(record, &mut names)?;
        }

        for required in [LOGIN_ROUTE, ACCESS_DENIED_ROUTE, NOT_FOUND_ROUTE] {
            if !names.contains(required) {
                return Err(RouteError::MissingRoute(required.to_string()));
            }
        }

        Ok(Self::compile(&records))
    }

    /// The receiving application's route table.
    pub fn standard() -> Self {
        Self::compile(&standard_records())
    }

    fn compile(records: &[RouteRecord]) -> Self {
        let mut routes = Vec::new();
        for record in records {
            compile_record(record, "", &[], &mut routes);
        }
        Self { routes }
    }

    /// Matches `path`; unmatched paths resolve to the not-found route.
    ///
    /// Query strings, fragments, and trailing slashes are ignored. Literal
    /// segments match case-insensitively.
    pub fn resolve(&self, path: &str) -> ResolvedRoute {
        let normalized = normalize_path(path);
        let parts = split_segments(&normalized);

        for route in &self.routes {
            if let Some(params) = route.matches(&parts) {
                return ResolvedRoute {
                    name: route.name.clone(),
                    path: normalized.clone(),
                    params,
                    chain: route.chain.clone(),
                };
            }
        }

        debug!(path = %normalized, "no route matched");
        self.by_name(NOT_FOUND_ROUTE)
            .unwrap_or_else(|| ResolvedRoute {
                name: Some(NOT_FOUND_ROUTE.to_string()),
                path: normalized.clone(),
                params: BTreeMap::new(),
                chain: Vec::new(),
            })
    }

    /// Looks up a named route.
    pub fn by_name(&self, name: &str) -> Option<ResolvedRoute> {
        let route = self
            .routes
            .iter()
            .find(|route| route.name.as_deref() == Some(name))?;

        Some(ResolvedRoute {
            name: route.name.clone(),
            path: route.pattern(),
            params: BTreeMap::new(),
            chain: route.chain.clone(),
        })
    }

    /// Resolves a redirect target.
    pub fn target(&self, target: &RouteTarget) -> ResolvedRoute {
        match target {
            RouteTarget::Name(name) => self.by_name(name).unwrap_or_else(|| {
                warn!(%name, "redirect to undeclared route");
                self.resolve(&format!("/{name}"))
            }),
            RouteTarget::Path(path) => self.resolve(path),
        }
    }
}

fn collect_names<'a>(
    record: &'a RouteRecord,
    names: &mut BTreeSet<&'a str>,
) -> Result<(), RouteError> {
    if let Some(name) = &record.name
        && !names.insert(name.as_str())
    {
        return Err(RouteError::DuplicateName(name.clone()));
    }
    for child in &record.children {
        collect_names(child, names)?;
    }
    Ok(())
}

fn compile_record(
    record: &RouteRecord,
    parent_path: &str,
    parent_chain: &[RouteAccess],
    out: &mut Vec<CompiledRoute>,
) {
    let full_path = if record.path.starts_with('/') {
        record.path.clone()
    } else {
        format!("{}/{}", parent_path.trim_end_matches('/'), record.path)
    };

    let mut chain = parent_chain.to_vec();
    chain.push(record.access.clone());

    // Children are tried before the record itself; an unnamed layout with
    // children is never a destination of its own.
    for child in &record.children {
        compile_record(child, &full_path, &chain, out);
    }
    if record.children.is_empty() || record.name.is_some() {
        out.push(CompiledRoute {
            name: record.name.clone(),
            segments: split_segments(&full_path)
                .into_iter()
                .map(|part| match part.strip_prefix(':') {
                    Some(param) => Segment::Param(param.to_string()),
                    None => Segment::Literal(part.to_string()),
                })
                .collect(),
            chain,
        });
    }
}

fn normalize_path(path: &str) -> String {
    let without_fragment = path.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();
    let parts = split_segments(without_query);
    format!("/{}", parts.join("/"))
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

/// The receiving application's route declarations.
pub fn standard_records() -> Vec<RouteRecord> {
    let uikit = [
        "formlayout",
        "input",
        "button",
        "table",
        "list",
        "tree",
        "panel",
        "overlay",
        "media",
        "message",
        "file",
        "menu",
        "charts",
        "misc",
        "timeline",
    ];

    let mut layout = RouteRecord::layout("/")
        .access(RouteAccess::authenticated())
        .child(RouteRecord::named("dashboard", "/"));
    for name in uikit {
        layout = layout.child(RouteRecord::named(name, format!("/uikit/{name}")));
    }

    let layout = layout
        .child(RouteRecord::named("blocks", "/blocks"))
        .child(RouteRecord::named("empty", "/pages/empty"))
        .child(RouteRecord::named("crud", "/pages/crud"))
        .child(RouteRecord::named("documentation", "/documentation"))
        .child(
            RouteRecord::named("permissions", "/pages/permissions")
                .access(RouteAccess::authenticated().with_admin()),
        )
        .child(
            RouteRecord::named("receivedoc", "/pages/receivedoc")
                .access(RouteAccess::authenticated().with_receive()),
        )
        .child(
            RouteRecord::named("receiveitem", "/pages/receiveitem/:docno")
                .access(RouteAccess::authenticated().with_receive()),
        )
        .child(
            RouteRecord::named("closejobreceive", "/pages/closejobreceive")
                .access(RouteAccess::authenticated().with_receive()),
        )
        .child(
            RouteRecord::named("receivehistory", "/pages/receivehistory")
                .access(RouteAccess::authenticated().with_history()),
        );

    vec![
        layout,
        RouteRecord::named("landing", "/landing"),
        RouteRecord::named(NOT_FOUND_ROUTE, "/pages/notfound"),
        RouteRecord::named(LOGIN_ROUTE, "/auth/login"),
        RouteRecord::named(ACCESS_DENIED_ROUTE, "/auth/access"),
        RouteRecord::named("error", "/auth/error"),
    ]
}

/// Handle for one requested transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationTicket {
    generation: u64,
    path: String,
}

impl NavigationTicket {
    /// Requested path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Monotonic request number.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of driving one transition to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// The transition committed `route` as current.
    Arrived {
        /// Committed route.
        route: ResolvedRoute,
        /// Originally requested path when the guard redirected.
        redirected_from: Option<String>,
    },
    /// A newer request was issued before this one resolved; nothing changed.
    Superseded,
    /// Redirects did not settle within [`MAX_REDIRECTS`]; nothing changed.
    RedirectLimit,
}

/// Runs every transition through the guard and tracks the current route.
pub struct Navigator {
    table: RouteTable,
    store: Arc<SessionStore>,
    latest: AtomicU64,
    current: RwLock<Option<ResolvedRoute>>,
}

impl Navigator {
    /// Creates a navigator reading session state from `store`.
    pub fn new(table: RouteTable, store: Arc<SessionStore>) -> Self {
        Self {
            table,
            store,
            latest: AtomicU64::new(0),
            current: RwLock::new(None),
        }
    }

    /// Registers a transition request, superseding every earlier one.
    pub fn request(&self, path: impl Into<String>) -> NavigationTicket {
        let generation = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        NavigationTicket {
            generation,
            path: path.into(),
        }
    }

    /// Evaluates `ticket`, following redirects, and commits the destination
    /// unless a newer request exists.
    pub fn resolve(&self, ticket: &NavigationTicket) -> NavigationOutcome {
        let mut route = self.table.resolve(&ticket.path);
        let mut redirected = false;

        for _ in 0..=MAX_REDIRECTS {
            let session = self.store.get();
            match evaluate(&route.requirement(), route.is_login(), &session) {
                GuardDecision::Allow => {
                    let redirected_from = redirected.then(|| ticket.path.clone());
                    return self.commit(ticket, route, redirected_from);
                }
                GuardDecision::Redirect(target) => {
                    info!(from = %route.path, to = ?target, "navigation redirected");
                    route = self.table.target(&target);
                    redirected = true;
                }
            }
        }

        warn!(path = %ticket.path, "navigation exceeded redirect limit");
        NavigationOutcome::RedirectLimit
    }

    /// Requests and resolves `path` in one step.
    pub fn navigate(&self, path: impl Into<String>) -> NavigationOutcome {
        let ticket = self.request(path);
        self.resolve(&ticket)
    }

    /// Last committed route.
    pub fn current(&self) -> Option<ResolvedRoute> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn commit(
        &self,
        ticket: &NavigationTicket,
        route: ResolvedRoute,
        redirected_from: Option<String>,
    ) -> NavigationOutcome {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if self.latest.load(Ordering::Acquire) != ticket.generation {
            debug!(path = %ticket.path, "dropping superseded navigation");
            return NavigationOutcome::Superseded;
        }

        debug!(path = %route.path, name = ?route.name, "navigation committed");
        *current = Some(route.clone());
        NavigationOutcome::Arrived {
            route,
            redirected_from,
        }
    }
}

/// Route table construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// A top-level path is not absolute.
    #[error("route path must start with '/': {0}")]
    InvalidPath(String),
    /// Two records share a name.
    #[error("duplicate route name: {0}")]
    DuplicateName(String),
    /// A route the guard redirects to is not declared.
    #[error("missing required route: {0}")]
    MissingRoute(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for path matching and table validation.

    use super::*;

    #[test]
    fn standard_table_passes_validation() {
        assert!(RouteTable::new(standard_records()).is_ok());
    }

    #[test]
    fn dashboard_wins_over_layout_at_root() {
        let route = RouteTable::standard().resolve("/");
        assert_eq!(route.name.as_deref(), Some("dashboard"));
        assert_eq!(route.chain.len(), 2);
    }

    #[test]
    fn normalizes_query_fragment_and_slashes() {
        assert_eq!(normalize_path("/pages//crud/?tab=1#top"), "/pages/crud");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut records = standard_records();
        records.push(RouteRecord::named("landing", "/landing-2"));
        assert_eq!(
            RouteTable::new(records).err(),
            Some(RouteError::DuplicateName("landing".to_string()))
        );
    }

    #[test]
    fn missing_login_route_is_rejected() {
        let records = vec![
            RouteRecord::named(NOT_FOUND_ROUTE, "/404"),
            RouteRecord::named(ACCESS_DENIED_ROUTE, "/403"),
        ];
        assert_eq!(
            RouteTable::new(records).err(),
            Some(RouteError::MissingRoute(LOGIN_ROUTE.to_string()))
        );
    }

    #[test]
    fn relative_child_paths_join_parent() {
        let table = RouteTable::new(vec![
            RouteRecord::layout("/admin")
                .access(RouteAccess::authenticated())
                .child(RouteRecord::named("users", "users/:id")),
            RouteRecord::named(LOGIN_ROUTE, "/login"),
            RouteRecord::named(ACCESS_DENIED_ROUTE, "/403"),
            RouteRecord::named(NOT_FOUND_ROUTE, "/404"),
        ])
        .expect("table should build");

        let route = table.resolve("/admin/users/7");
        assert_eq!(route.name.as_deref(), Some("users"));
        assert_eq!(route.param("id"), Some("7"));
        assert!(route.requirement().requires_session);
    }
}
