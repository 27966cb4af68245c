//! Maintenance gate: decides per request whether the studio is served, blocked
//! with a 503, or whether a bypass credential is granted or revoked.
//!
//! The decision is a pure function of [`MaintenanceConfig`] and the
//! [`RequestContext`] built from the incoming request. Turning a
//! [`GateDecision`] into an HTTP response is the server's job.

use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use url::form_urlencoded;
use utils::flags::env_flag;

pub const AUTH_COOKIE_NAME: &str = "gle_maint_unlock";
pub const UI_COOKIE_NAME: &str = "gle_bypass_ui";
pub const UI_COOKIE_VALUE: &str = "1";
pub const BYPASS_PARAM: &str = "bypass";
pub const RESET_PARAM: &str = "resetBypass";
pub const RESET_SENTINEL: &str = "1";
/// `bypass=0` is an older spelling of the reset link.
pub const BYPASS_RESET_VALUE: &str = "0";
pub const MAINTENANCE_PATH: &str = "/maintenance";
pub const UNLOCK_PATH: &str = "/unlock";

/// Seven days.
pub const BYPASS_MAX_AGE_SECONDS: i64 = 60 * 60 * 24 * 7;

const ALLOWED_EXACT: &[&str] = &[
    MAINTENANCE_PATH,
    UNLOCK_PATH,
    "/favicon.ico",
    "/manifest.json",
    "/robots.txt",
    "/sitemap.xml",
];

const ALLOWED_PREFIXES: &[&str] = &["/_next/", "/static/", "/assets/", "/icons", "/api/"];

/// Maintenance settings, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub bypass_token: Option<String>,
    pub cookie_secure: bool,
}

impl MaintenanceConfig {
    pub fn new(enabled: bool, bypass_token: Option<String>, cookie_secure: bool) -> Self {
        let bypass_token = bypass_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Self {
            enabled,
            bypass_token,
            cookie_secure,
        }
    }

    /// `MAINTENANCE_MODE`, `MAINTENANCE_TOKEN` and `MAINTENANCE_COOKIE_SECURE`.
    pub fn from_env() -> Self {
        Self::new(
            env_flag("MAINTENANCE_MODE", false),
            std::env::var("MAINTENANCE_TOKEN").ok(),
            env_flag("MAINTENANCE_COOKIE_SECURE", true),
        )
    }

    /// Enabled without a token: nothing can bypass the gate.
    pub fn is_misconfigured(&self) -> bool {
        self.enabled && self.bypass_token.is_none()
    }

    /// Exact match against the configured token. Always false when none is set.
    pub fn token_matches(&self, candidate: &str) -> bool {
        match self.bypass_token.as_deref() {
            Some(token) => tokens_match(candidate, token),
            None => false,
        }
    }
}

fn tokens_match(candidate: &str, token: &str) -> bool {
    candidate.as_bytes().ct_eq(token.as_bytes()).into()
}

/// The parts of a request the gate looks at.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub path: String,
    /// Query pairs in their original order, already percent-decoded.
    pub query: Vec<(String, String)>,
    pub fragment: Option<String>,
    pub cookie_auth: Option<String>,
}

impl RequestContext {
    pub fn new(path: impl Into<String>, raw_query: Option<&str>) -> Self {
        let query = raw_query
            .map(|q| {
                form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            path: path.into(),
            query,
            fragment: None,
            cookie_auth: None,
        }
    }

    pub fn with_cookie_auth(mut self, value: Option<String>) -> Self {
        self.cookie_auth = value;
        self
    }

    /// Requests never carry a fragment over HTTP, so the middleware leaves this
    /// unset and the browser re-applies the original fragment to a fragment-less
    /// `Location`.
    pub fn with_fragment(mut self, fragment: Option<String>) -> Self {
        self.fragment = fragment.filter(|f| !f.is_empty());
        self
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn query_bypass(&self) -> Option<&str> {
        self.param(BYPASS_PARAM)
    }

    pub fn reset_requested(&self) -> bool {
        self.param(RESET_PARAM)
            .is_some_and(|v| v.trim() == RESET_SENTINEL)
            || self
                .query_bypass()
                .is_some_and(|v| v.trim() == BYPASS_RESET_VALUE)
    }

    /// Same path and fragment, with every `bypass` parameter removed.
    fn location_without_bypass(&self) -> String {
        let kept: Vec<&(String, String)> = self
            .query
            .iter()
            .filter(|(k, _)| k != BYPASS_PARAM)
            .collect();
        let mut location = self.path.clone();
        if !kept.is_empty() {
            let mut serializer = form_urlencoded::Serializer::new(String::new());
            for (k, v) in kept {
                serializer.append_pair(k, v);
            }
            location.push('?');
            location.push_str(&serializer.finish());
        }
        push_fragment(&mut location, self.fragment.as_deref());
        location
    }

    fn maintenance_location(&self) -> String {
        let mut location = MAINTENANCE_PATH.to_string();
        push_fragment(&mut location, self.fragment.as_deref());
        location
    }
}

fn push_fragment(location: &mut String, fragment: Option<&str>) {
    if let Some(fragment) = fragment {
        location.push('#');
        location.push_str(fragment);
    }
}

/// Paths that stay reachable while maintenance is on.
pub fn is_allowlisted(path: &str) -> bool {
    ALLOWED_EXACT.contains(&path) || ALLOWED_PREFIXES.iter().any(|p| path.starts_with(p))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SameSite {
    Lax,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BypassCookie {
    pub name: &'static str,
    pub value: String,
    pub http_only: bool,
    pub same_site: SameSite,
    pub secure: bool,
    pub path: &'static str,
    pub max_age_seconds: i64,
}

/// The httpOnly credential plus a script-readable flag, which never holds the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BypassCookiePair {
    pub auth: BypassCookie,
    pub ui: BypassCookie,
}

impl BypassCookiePair {
    pub fn granted(token: &str, secure: bool) -> Self {
        Self::build(token.to_string(), UI_COOKIE_VALUE.to_string(), secure, BYPASS_MAX_AGE_SECONDS)
    }

    pub fn cleared(secure: bool) -> Self {
        Self::build(String::new(), String::new(), secure, 0)
    }

    fn build(auth_value: String, ui_value: String, secure: bool, max_age_seconds: i64) -> Self {
        Self {
            auth: BypassCookie {
                name: AUTH_COOKIE_NAME,
                value: auth_value,
                http_only: true,
                same_site: SameSite::Lax,
                secure,
                path: "/",
                max_age_seconds,
            },
            ui: BypassCookie {
                name: UI_COOKIE_NAME,
                value: ui_value,
                http_only: false,
                same_site: SameSite::Lax,
                secure,
                path: "/",
                max_age_seconds,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    PassThrough,
    MaintenanceBlock,
    BypassGrantAndRedirect {
        location: String,
        cookies: BypassCookiePair,
    },
    BypassResetAndRedirect {
        location: String,
        cookies: BypassCookiePair,
    },
}

impl GateDecision {
    pub fn label(&self) -> &'static str {
        match self {
            GateDecision::PassThrough => "pass_through",
            GateDecision::MaintenanceBlock => "maintenance_block",
            GateDecision::BypassGrantAndRedirect { .. } => "bypass_grant",
            GateDecision::BypassResetAndRedirect { .. } => "bypass_reset",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessGate {
    config: MaintenanceConfig,
}

impl AccessGate {
    pub fn new(config: MaintenanceConfig) -> Self {
        if config.is_misconfigured() {
            warn!("Maintenance mode is enabled without MAINTENANCE_TOKEN; bypass is disabled");
        }
        Self { config }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    pub fn evaluate(&self, ctx: &RequestContext) -> GateDecision {
        let decision = self.decide(ctx);
        if self.config.enabled {
            debug!(path = %ctx.path, decision = decision.label(), "Maintenance gate decision");
        }
        decision
    }

    fn decide(&self, ctx: &RequestContext) -> GateDecision {
        if !self.config.enabled {
            return GateDecision::PassThrough;
        }

        // Checked ahead of the allowlist: the reset link targets /maintenance itself.
        if ctx.reset_requested() {
            return GateDecision::BypassResetAndRedirect {
                location: ctx.maintenance_location(),
                cookies: BypassCookiePair::cleared(self.config.cookie_secure),
            };
        }

        if is_allowlisted(&ctx.path) {
            return GateDecision::PassThrough;
        }

        let Some(token) = self.config.bypass_token.as_deref() else {
            return GateDecision::MaintenanceBlock;
        };

        let cookie_valid = ctx
            .cookie_auth
            .as_deref()
            .is_some_and(|c| tokens_match(c, token));
        if cookie_valid {
            return GateDecision::PassThrough;
        }

        if ctx.query_bypass().is_some_and(|q| tokens_match(q, token)) {
            return GateDecision::BypassGrantAndRedirect {
                location: ctx.location_without_bypass(),
                cookies: BypassCookiePair::granted(token, self.config.cookie_secure),
            };
        }

        GateDecision::MaintenanceBlock
    }
}
