//! Public maintenance page and the form-based unlock.

use axum::{
    Form, Router,
    extract::{Query, State},
    http::header::{CACHE_CONTROL, CONTENT_TYPE},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use services::services::maintenance::{
    BypassCookiePair, MAINTENANCE_PATH, RESET_PARAM, RESET_SENTINEL, UI_COOKIE_NAME,
    UI_COOKIE_VALUE, UNLOCK_PATH,
};
use tracing::info;
use utils::flags::parse_flag;

use crate::{AppState, middleware::maintenance_gate::redirect_with_cookies};

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub bad: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UnlockForm {
    #[serde(default)]
    pub token: String,
}

/// GET /maintenance
pub async fn maintenance_page(jar: CookieJar, Query(query): Query<PageQuery>) -> Response {
    let bypass_seen = jar
        .get(UI_COOKIE_NAME)
        .is_some_and(|c| c.value() == UI_COOKIE_VALUE);
    let bad_token = query.bad.as_deref().is_some_and(parse_flag);

    (
        [
            (CONTENT_TYPE, "text/html; charset=utf-8"),
            (CACHE_CONTROL, "no-store"),
        ],
        render_page(bypass_seen, bad_token),
    )
        .into_response()
}

fn render_page(bypass_seen: bool, bad_token: bool) -> String {
    let (badge_class, badge) = if bypass_seen {
        ("badge on", "Bypass aktiv")
    } else {
        ("badge off", "Öffentlich gesperrt")
    };
    let notice = if bad_token {
        r#"<div class="notice">Token ungültig.</div>"#
    } else {
        ""
    };

    format!(
        r#"<!doctype html>
<html lang="de">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width,initial-scale=1" />
  <title>GLE Prompt Studio – Wartung</title>
  <style>
    body{{margin:0;min-height:100vh;display:grid;place-items:center;padding:16px;
      font-family:-apple-system,system-ui,Segoe UI,Roboto,Arial,sans-serif;background:#fafafa;color:#111827}}
    .card{{max-width:560px;width:100%;border:1px solid #e4e4e7;border-radius:18px;padding:24px;background:#fff}}
    .head{{display:flex;justify-content:space-between;gap:12px}}
    h1{{font-size:22px;margin:0}}
    p{{color:#4b5563}}
    .badge{{height:28px;display:inline-flex;align-items:center;padding:0 10px;border-radius:999px;
      border:1px solid;font-size:12px;font-weight:700;white-space:nowrap}}
    .badge.on{{border-color:#a7f3d0;background:#ecfdf5;color:#047857}}
    .badge.off{{border-color:#fde68a;background:#fffbeb;color:#92400e}}
    .notice{{margin-top:12px;padding:10px 12px;border-radius:12px;background:#fef2f2;color:#991b1b}}
    form{{display:flex;gap:8px;margin-top:16px}}
    input{{flex:1;padding:10px;border:1px solid #e4e4e7;border-radius:12px}}
    button{{padding:10px 14px;border-radius:12px;border:0;background:#111827;color:#fff}}
    .links{{margin-top:14px;font-size:13px}}
  </style>
</head>
<body>
  <div class="card">
    <div class="head">
      <div>
        <h1>Wartung aktiv</h1>
        <p>Die App ist gerade nicht öffentlich erreichbar. Bitte später erneut versuchen.</p>
      </div>
      <div class="{badge_class}">{badge}</div>
    </div>
    {notice}
    <form method="post" action="{UNLOCK_PATH}">
      <input type="password" name="token" placeholder="Bypass-Token" autocomplete="off" />
      <button type="submit">Freischalten</button>
    </form>
    <div class="links">
      <a href="/">Zum Studio</a> · <a href="{MAINTENANCE_PATH}?{RESET_PARAM}={RESET_SENTINEL}">Bypass löschen</a>
    </div>
  </div>
</body>
</html>"#
    )
}

/// POST /unlock
pub async fn unlock(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<UnlockForm>,
) -> Response {
    let config = state.gate.config();
    if !config.token_matches(&form.token) {
        info!("Rejected unlock attempt");
        return Redirect::to(&format!("{MAINTENANCE_PATH}?bad=1")).into_response();
    }

    let cookies = BypassCookiePair::granted(&form.token, config.cookie_secure);
    redirect_with_cookies(jar, Redirect::to("/"), &cookies)
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route(MAINTENANCE_PATH, get(maintenance_page))
        .route(UNLOCK_PATH, post(unlock))
}
