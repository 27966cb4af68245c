//! Maps [`GateDecision`]s onto HTTP responses and cookies.

use axum::{
    extract::{Request, State},
    http::{
        StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{self, Cookie, CookieJar};
use services::services::maintenance::{
    AUTH_COOKIE_NAME, BypassCookie, BypassCookiePair, GateDecision, RequestContext, SameSite,
};

use crate::AppState;

const NO_STORE: &str = "no-store";

pub const MAINTENANCE_HTML: &str = r#"<!doctype html>
<html lang="de">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width,initial-scale=1" />
  <title>GLE Prompt Studio – Wartung</title>
  <style>
    :root{color-scheme:dark}
    body{margin:0;min-height:100vh;display:flex;align-items:center;justify-content:center;
      font-family:-apple-system,system-ui,Segoe UI,Roboto,Arial,sans-serif;background:#050608;color:#e9f6ff}
    .box{max-width:520px;padding:28px;border:1px solid rgba(255,255,255,.10);border-radius:18px;
      background:rgba(18,18,24,.65);text-align:center}
    h1{margin:0 0 10px;font-size:22px;color:#00e676}
    p{margin:0;opacity:.85;line-height:1.6}
    .small{margin-top:10px;font-size:12px;opacity:.6}
  </style>
</head>
<body>
  <div class="box">
    <h1>Update läuft</h1>
    <p>GLE Prompt Studio wird gerade aktualisiert.</p>
    <p>Bitte später erneut versuchen.</p>
    <div class="small">Status: 503 (Maintenance)</div>
  </div>
</body>
</html>"#;

pub async fn maintenance_gate(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let uri = request.uri();
    let ctx = RequestContext::new(uri.path(), uri.query())
        .with_cookie_auth(jar.get(AUTH_COOKIE_NAME).map(|c| c.value().to_string()));

    match state.gate.evaluate(&ctx) {
        GateDecision::PassThrough => next.run(request).await,
        GateDecision::MaintenanceBlock => blocked_response(),
        GateDecision::BypassGrantAndRedirect { location, cookies }
        | GateDecision::BypassResetAndRedirect { location, cookies } => {
            redirect_with_cookies(jar, Redirect::temporary(&location), &cookies)
        }
    }
}

pub fn blocked_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [
            (CONTENT_TYPE, "text/html; charset=utf-8"),
            (CACHE_CONTROL, NO_STORE),
        ],
        MAINTENANCE_HTML,
    )
        .into_response()
}

pub fn redirect_with_cookies(jar: CookieJar, redirect: Redirect, cookies: &BypassCookiePair) -> Response {
    let jar = jar.add(to_cookie(&cookies.auth)).add(to_cookie(&cookies.ui));
    (jar, [(CACHE_CONTROL, NO_STORE)], redirect).into_response()
}

fn to_cookie(c: &BypassCookie) -> Cookie<'static> {
    let same_site = match c.same_site {
        SameSite::Lax => cookie::SameSite::Lax,
    };
    Cookie::build((c.name, c.value.clone()))
        .http_only(c.http_only)
        .secure(c.secure)
        .same_site(same_site)
        .path(c.path)
        .max_age(time::Duration::seconds(c.max_age_seconds))
        .build()
}
