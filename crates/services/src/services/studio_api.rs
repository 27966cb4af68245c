//! Client for the Prompt Studio backend (`/api/generate`, `/api/me`, `/api/health`).

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, Method, StatusCode, header::HeaderMap};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use super::{
    generation::TextGenerator,
    identity::Identity,
};

const REPAIR_USE_CASE: &str = "Korrektur";

#[derive(Debug, Clone, Error)]
pub enum StudioApiError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("invalid json (http {status}): {body}")]
    InvalidJson { status: u16, body: String },
    #[error("api error (http {status}): {error}")]
    Api {
        status: u16,
        error: String,
        message: Option<String>,
        hard: Vec<String>,
        banned: Vec<String>,
    },
    #[error("json error: {0}")]
    Serde(String),
}

impl StudioApiError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Api { status, .. } | Self::InvalidJson { status, .. } => {
                (500..=599).contains(status)
            }
            Self::Serde(_) => false,
        }
    }

    /// 401/402 mean the caller needs a plan upgrade or a key.
    pub fn requires_upgrade(&self) -> bool {
        matches!(self, Self::Api { status: 401 | 402, .. })
    }
}

/// Join the configured base and an API path without doubling `/api`.
pub fn api_url(base: &str, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return path;
    }
    if base.ends_with("/api") && path.starts_with("/api/") {
        return format!("{base}{}", &path[4..]);
    }
    format!("{base}{path}")
}

fn string_list(map: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Normalize a backend reply into success data or a structured error.
///
/// The backend sometimes answers `{ ok: bool, ... }` and sometimes just the
/// payload; an explicit `ok` wins over the HTTP status.
pub fn normalize_response(status: StatusCode, body: &str) -> Result<Value, StudioApiError> {
    let data: Value = if body.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(body).map_err(|_| StudioApiError::InvalidJson {
            status: status.as_u16(),
            body: body.to_string(),
        })?
    };

    let ok = data
        .get("ok")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| status.is_success());
    if ok {
        return Ok(data);
    }

    let empty = Map::new();
    let map = data.as_object().unwrap_or(&empty);
    let error = map
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("http_error")
        .to_string();
    let message = map
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| status.canonical_reason().map(str::to_string));
    let status_code = map
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(status.as_u16());

    Err(StudioApiError::Api {
        status: status_code,
        error,
        message,
        hard: string_list(map, &["hard", "hard_violations"]),
        banned: string_list(map, &["banned"]),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutLang {
    #[default]
    De,
    En,
}

impl OutLang {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "EN" | "ENGLISH" | "ENG" => OutLang::En,
            _ => OutLang::De,
        }
    }
}

/// Loosely-typed form input as the UI submits it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateForm {
    pub use_case: Option<String>,
    pub tone: Option<String>,
    pub goal: Option<String>,
    pub topic: Option<String>,
    pub context: Option<String>,
    pub extra: Option<String>,
    pub language: Option<String>,
    pub out_lang: Option<String>,
    #[serde(default)]
    pub boost: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub use_case: String,
    pub tone: String,
    pub topic: String,
    pub extra: String,
    pub out_lang: OutLang,
    pub boost: bool,
}

fn trimmed_or(value: Option<&str>, default: &str) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

pub fn map_generate_body(form: &GenerateForm) -> GenerateRequest {
    let topic = form.goal.as_deref().or(form.topic.as_deref());
    let extra = form.context.as_deref().or(form.extra.as_deref());
    let lang = form
        .language
        .as_deref()
        .or(form.out_lang.as_deref())
        .unwrap_or("DE");

    GenerateRequest {
        use_case: trimmed_or(form.use_case.as_deref(), "Allgemein"),
        tone: trimmed_or(form.tone.as_deref(), "Professionell"),
        topic: trimmed_or(topic, ""),
        extra: trimmed_or(extra, ""),
        out_lang: OutLang::parse(lang),
        boost: form.boost,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateOutput {
    pub text: String,
    pub model: Option<String>,
    pub tokens: Option<u64>,
}

impl GenerateOutput {
    pub fn from_value(data: &Value) -> Self {
        let text = ["result", "output", "text", "output_text"]
            .iter()
            .filter_map(|k| data.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string();

        let model = data
            .pointer("/meta/model")
            .or_else(|| data.get("model"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let tokens = ["/meta/tokens", "/tokens", "/usage/total_tokens"]
            .iter()
            .filter_map(|p| data.pointer(p).and_then(Value::as_u64))
            .find(|t| *t > 0);

        Self {
            text,
            model,
            tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plan {
    #[default]
    Free,
    Pro,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub used: u64,
    pub renew_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub byok_only: bool,
}

/// Studio backend client
#[derive(Debug, Clone)]
pub struct StudioApiClient {
    http: Client,
    base: String,
    identity: Identity,
}

impl StudioApiClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(base: impl Into<String>, identity: Identity) -> Result<Self, StudioApiError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("prompt-studio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StudioApiError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base: base.into(),
            identity,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn url(&self, path: &str) -> String {
        api_url(&self.base, path)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        extra: HeaderMap,
    ) -> Result<Value, StudioApiError> {
        let mut req = self
            .http
            .request(method, self.url(path))
            .headers(self.identity.headers(extra));
        if let Some(body) = body {
            req = req.json(body);
        }

        let res = req.send().await.map_err(map_reqwest_error)?;
        let status = res.status();
        let text = res.text().await.map_err(map_reqwest_error)?;
        normalize_response(status, &text)
    }

    /// GET with retry on transient failures.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        extra: HeaderMap,
    ) -> Result<T, StudioApiError> {
        let data = (|| async { self.send(Method::GET, path, None, extra.clone()).await })
            .retry(
                &ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_delay(Duration::from_secs(10))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .when(|e: &StudioApiError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "Studio API GET {} failed, retrying after {:.2}s: {}",
                    path,
                    dur.as_secs_f64(),
                    e
                )
            })
            .await?;

        serde_json::from_value(data).map_err(|e| StudioApiError::Serde(e.to_string()))
    }

    /// POST is never retried: generation is billed per call.
    pub async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        extra: HeaderMap,
    ) -> Result<Value, StudioApiError> {
        let body = serde_json::to_value(body).map_err(|e| StudioApiError::Serde(e.to_string()))?;
        self.send(Method::POST, path, Some(&body), extra).await
    }

    pub async fn health(&self) -> bool {
        match self.send(Method::GET, "/api/health", None, HeaderMap::new()).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Studio API health check failed");
                false
            }
        }
    }

    /// `extra` carries the caller's identity and key headers, see
    /// [`forwarded_headers`](super::identity::forwarded_headers).
    pub async fn me(&self, extra: HeaderMap) -> Result<MeResponse, StudioApiError> {
        self.get_json("/api/me", extra).await
    }
}

#[async_trait]
impl TextGenerator for StudioApiClient {
    async fn generate(
        &self,
        req: &GenerateRequest,
        extra: &HeaderMap,
    ) -> Result<GenerateOutput, StudioApiError> {
        let data = self.post_json("/api/generate", req, extra.clone()).await?;
        Ok(GenerateOutput::from_value(&data))
    }

    async fn rewrite(&self, prompt: &str, extra: &HeaderMap) -> Result<String, StudioApiError> {
        let req = GenerateRequest {
            use_case: REPAIR_USE_CASE.to_string(),
            tone: "Neutral".to_string(),
            topic: prompt.to_string(),
            extra: String::new(),
            out_lang: OutLang::De,
            boost: false,
        };
        Ok(self.generate(&req, extra).await?.text)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> StudioApiError {
    if e.is_timeout() {
        StudioApiError::Timeout
    } else {
        StudioApiError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::{Json, Router, routing::{get, post}};
    use serde_json::json;

    use super::*;
    use crate::services::identity::{ACCOUNT_ID_HEADER, OPENAI_KEY_HEADER, USER_ID_HEADER};

    /// Serves `router` on an ephemeral local port and returns its base URL.
    async fn spawn_backend(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: String) -> StudioApiClient {
        StudioApiClient::new(
            base,
            Identity {
                account_id: "acc_gateway".into(),
                user_id: "u_gateway".into(),
            },
        )
        .unwrap()
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<AtomicUsize>,
        headers: Arc<Mutex<Vec<HeaderMap>>>,
    }

    impl Recorder {
        /// Records the call and returns how many came before it.
        fn record(&self, headers: HeaderMap) -> usize {
            self.headers.lock().unwrap().push(headers);
            self.calls.fetch_add(1, Ordering::SeqCst)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_get_retries_transient_failures() {
        let recorder = Recorder::default();
        let r = recorder.clone();
        let router = Router::new().route(
            "/api/me",
            get(move |headers: HeaderMap| {
                let r = r.clone();
                async move {
                    if r.record(headers) < 2 {
                        (
                            StatusCode::SERVICE_UNAVAILABLE,
                            Json(json!({ "ok": false, "error": "busy" })),
                        )
                    } else {
                        (
                            StatusCode::OK,
                            Json(json!({ "ok": true, "plan": "PRO", "usage": { "used": 3 } })),
                        )
                    }
                }
            }),
        );
        let client = client(spawn_backend(router).await);
        assert_eq!(client.identity().account_id, "acc_gateway");

        let me = client.me(HeaderMap::new()).await.unwrap();
        assert_eq!(me.plan, Plan::Pro);
        assert_eq!(me.usage.used, 3);
        assert_eq!(recorder.calls(), 3);

        let seen = recorder.headers.lock().unwrap();
        assert!(seen.iter().all(|h| h[ACCOUNT_ID_HEADER] == "acc_gateway"));
        assert!(seen.iter().all(|h| h[USER_ID_HEADER] == "u_gateway"));
    }

    #[tokio::test]
    async fn test_get_does_not_retry_client_errors() {
        let recorder = Recorder::default();
        let r = recorder.clone();
        let router = Router::new().route(
            "/api/me",
            get(move |headers: HeaderMap| {
                let r = r.clone();
                async move {
                    r.record(headers);
                    (StatusCode::PAYMENT_REQUIRED, Json(json!({ "error": "quota" })))
                }
            }),
        );
        let client = client(spawn_backend(router).await);

        let err = client.me(HeaderMap::new()).await.unwrap_err();
        assert!(err.requires_upgrade());
        assert_eq!(recorder.calls(), 1);
    }

    #[tokio::test]
    async fn test_post_is_never_retried() {
        let recorder = Recorder::default();
        let r = recorder.clone();
        let router = Router::new().route(
            "/api/generate",
            post(move |headers: HeaderMap| {
                let r = r.clone();
                async move {
                    r.record(headers);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "ok": false, "error": "upstream_down" })),
                    )
                }
            }),
        );
        let client = client(spawn_backend(router).await);

        let req = map_generate_body(&GenerateForm::default());
        let err = client.generate(&req, &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, StudioApiError::Api { status: 500, .. }));
        assert!(err.should_retry());
        assert_eq!(recorder.calls(), 1);
    }

    #[tokio::test]
    async fn test_caller_headers_override_identity() {
        let recorder = Recorder::default();
        let r = recorder.clone();
        let router = Router::new().route(
            "/api/generate",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let r = r.clone();
                async move {
                    r.record(headers);
                    Json(json!({ "ok": true, "result": format!("echo {}", body["topic"]) }))
                }
            }),
        );
        let client = client(spawn_backend(router).await);

        let mut extra = HeaderMap::new();
        extra.insert(ACCOUNT_ID_HEADER, "acc_browser".parse().unwrap());
        extra.insert(OPENAI_KEY_HEADER, "sk-user".parse().unwrap());
        let text = client.rewrite("Korrigiere das", &extra).await.unwrap();
        assert_eq!(text, r#"echo "Korrigiere das""#);

        let seen = recorder.headers.lock().unwrap();
        assert_eq!(seen[0][ACCOUNT_ID_HEADER], "acc_browser");
        assert_eq!(seen[0][USER_ID_HEADER], "u_gateway");
        assert_eq!(seen[0][OPENAI_KEY_HEADER], "sk-user");
    }

    #[test]
    fn test_api_url_joins() {
        assert_eq!(api_url("", "/api/me"), "/api/me");
        assert_eq!(api_url("", "api/me"), "/api/me");
        assert_eq!(api_url("https://x.test/", "/health"), "https://x.test/health");
        assert_eq!(api_url("https://x.test//", "/api/me"), "https://x.test/api/me");
    }

    #[test]
    fn test_api_url_drops_duplicate_api_segment() {
        assert_eq!(api_url("https://x.test/api", "/api/generate"), "https://x.test/api/generate");
        assert_eq!(api_url("https://x.test/api/", "/api/me"), "https://x.test/api/me");
        assert_eq!(api_url("https://x.test/api", "/apis"), "https://x.test/api/apis");
    }

    #[test]
    fn test_normalize_plain_payload() {
        let data = normalize_response(StatusCode::OK, r#"{"result":"hi"}"#).unwrap();
        assert_eq!(data["result"], "hi");
        assert!(normalize_response(StatusCode::NO_CONTENT, "").is_ok());
    }

    #[test]
    fn test_normalize_ok_flag_wins_over_status() {
        let err = normalize_response(
            StatusCode::OK,
            r#"{"ok":false,"error":"content_blocked","hard_violations":["formal_address"],"banned":["Konkurrenz"]}"#,
        )
        .unwrap_err();
        match err {
            StudioApiError::Api {
                status,
                error,
                hard,
                banned,
                ..
            } => {
                assert_eq!(status, 200);
                assert_eq!(error, "content_blocked");
                assert_eq!(hard, vec!["formal_address"]);
                assert_eq!(banned, vec!["Konkurrenz"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(normalize_response(StatusCode::BAD_GATEWAY, r#"{"ok":true}"#).is_ok());
    }

    #[test]
    fn test_normalize_http_error_defaults() {
        let err = normalize_response(StatusCode::PAYMENT_REQUIRED, "{}").unwrap_err();
        assert!(err.requires_upgrade());
        match err {
            StudioApiError::Api { error, message, .. } => {
                assert_eq!(error, "http_error");
                assert_eq!(message.as_deref(), Some("Payment Required"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_normalize_invalid_json() {
        let err = normalize_response(StatusCode::BAD_GATEWAY, "<html>oops</html>").unwrap_err();
        assert!(matches!(err, StudioApiError::InvalidJson { status: 502, .. }));
        assert!(err.should_retry());
    }

    #[test]
    fn test_map_generate_body_defaults_and_aliases() {
        let form = GenerateForm {
            goal: Some("  Newsletter  ".into()),
            topic: Some("ignored".into()),
            extra: Some("Zielgruppe: Handwerk".into()),
            language: Some("english".into()),
            boost: true,
            ..Default::default()
        };
        let req = map_generate_body(&form);
        assert_eq!(req.use_case, "Allgemein");
        assert_eq!(req.tone, "Professionell");
        assert_eq!(req.topic, "Newsletter");
        assert_eq!(req.extra, "Zielgruppe: Handwerk");
        assert_eq!(req.out_lang, OutLang::En);
        assert!(req.boost);

        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["useCase"], "Allgemein");
        assert_eq!(wire["outLang"], "EN");
    }

    #[test]
    fn test_out_lang_parse() {
        assert_eq!(OutLang::parse("eng"), OutLang::En);
        assert_eq!(OutLang::parse(" EN "), OutLang::En);
        assert_eq!(OutLang::parse("fr"), OutLang::De);
        assert_eq!(OutLang::parse(""), OutLang::De);
    }

    #[test]
    fn test_generate_output_picks_first_non_empty() {
        let out = GenerateOutput::from_value(&json!({
            "result": "  ",
            "output": " Hallo Welt ",
            "meta": { "model": "gpt-x", "tokens": 0 },
            "usage": { "total_tokens": 42 }
        }));
        assert_eq!(out.text, "Hallo Welt");
        assert_eq!(out.model.as_deref(), Some("gpt-x"));
        assert_eq!(out.tokens, Some(42));

        assert_eq!(GenerateOutput::from_value(&json!({})).text, "");
    }

    #[test]
    fn test_me_response_parses_partial() {
        let me: MeResponse = serde_json::from_value(json!({
            "ok": true,
            "plan": "PRO",
            "usage": { "used": 12, "renewAt": 1767225600000i64 },
            "byokOnly": true
        }))
        .unwrap();
        assert_eq!(me.plan, Plan::Pro);
        assert_eq!(me.usage.used, 12);
        assert!(me.byok_only);

        let me: MeResponse = serde_json::from_value(json!({ "ok": true })).unwrap();
        assert_eq!(me, MeResponse::default());
    }
}
