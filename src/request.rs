use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::api::CallContext;
use crate::config::Settings;
use crate::error::AppError;
use crate::logging::{LogContext, PerfCounter};
use crate::session::{Session, SessionStore};

/// Bound request bodies are buffered up to this size for parameter binding.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Per-request state: bound parameters, the session handle, the selected
/// database, the request id and the performance counter.
///
/// The session is value-owned by the request for its lifetime; the store
/// persists it again at response time.
pub struct RequestCtx {
    pub request_id: String,
    pub started: Instant,
    pub method: String,
    pub path: String,
    pub remote_addr: String,
    pub user_agent: String,
    pub secure: bool,
    pub params: Map<String, Value>,
    pub perf: Arc<PerfCounter>,
    session: Mutex<Session>,
    db_name: Mutex<Option<String>>,
    cookie_needed: AtomicBool,
}

impl RequestCtx {
    /// Attach a session (via the cookie), select the database and build the
    /// per-request state.
    pub fn bind(
        method: &Method,
        uri: &axum::http::Uri,
        headers: &HeaderMap,
        params: Map<String, Value>,
        settings: &Settings,
        store: &dyn SessionStore,
    ) -> Arc<Self> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let method = method.to_string();
        let path = uri.path().to_string();
        let user_agent = header_str(headers, "user-agent");
        let remote_addr = header_str(headers, "x-forwarded-for");
        let secure =
            uri.scheme_str() == Some("https") || header_str(headers, "x-forwarded-proto") == "https";

        let cookie_sid = cookie_value(headers, &settings.session_cookie);
        let (mut session, fresh) = match cookie_sid {
            Some(sid) if store.is_valid_key(&sid) => match store.get(&sid) {
                Some(session) => (session, false),
                None => (store.new_session(), true),
            },
            _ => (store.new_session(), true),
        };

        let mut context_updates = Map::new();
        context_updates.insert("request_id".to_string(), Value::String(request_id.clone()));
        context_updates.insert("user_agent".to_string(), Value::String(user_agent.clone()));
        context_updates.insert("remote_addr".to_string(), Value::String(remote_addr.clone()));
        context_updates.insert("path".to_string(), Value::String(path.clone()));
        context_updates.insert("method".to_string(), Value::String(method.clone()));
        session.update_context(context_updates);
        session.touch();

        // Database selection: session binding, then the `db` query
        // parameter, then the configured default.
        let db_name = if !session.db_name.is_empty() {
            Some(session.db_name.clone())
        } else if let Some(Value::String(db)) = params.get("db") {
            Some(db.clone())
        } else if !settings.default_db.is_empty() {
            Some(settings.default_db.clone())
        } else {
            None
        };

        Arc::new(Self {
            request_id,
            started: Instant::now(),
            method,
            path,
            remote_addr,
            user_agent,
            secure,
            params,
            perf: Arc::new(PerfCounter::new()),
            session: Mutex::new(session),
            db_name: Mutex::new(db_name),
            cookie_needed: AtomicBool::new(fresh),
        })
    }

    /// Run a closure against the session under its lock.
    pub fn with_session<T>(&self, f: impl FnOnce(&mut Session) -> T) -> T {
        let mut session = self.session.lock().expect("session poisoned");
        f(&mut session)
    }

    pub fn session_id(&self) -> String {
        self.with_session(|s| s.sid.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.with_session(|s| s.is_authenticated())
    }

    pub fn user_id(&self) -> i64 {
        self.with_session(|s| s.user_id)
    }

    pub fn login(&self) -> String {
        self.with_session(|s| s.login.clone())
    }

    pub fn db_name(&self) -> Option<String> {
        self.db_name.lock().expect("db binding poisoned").clone()
    }

    pub fn set_db_name(&self, db: Option<String>) {
        *self.db_name.lock().expect("db binding poisoned") = db;
    }

    /// Whether a Set-Cookie header is owed on the response.
    pub fn cookie_needed(&self) -> bool {
        self.cookie_needed.load(Ordering::SeqCst) || self.with_session(|s| s.should_rotate)
    }

    /// Authenticate the session and rebind the request database.
    pub fn authenticate(&self, db: &str, login: &str, user_id: i64, groups: &[String]) {
        self.with_session(|session| {
            session.authenticate(db, login, user_id);
            session.set("groups", Value::Array(
                groups.iter().map(|g| Value::String(g.clone())).collect(),
            ));
        });
        self.set_db_name(Some(db.to_string()));
    }

    /// Clear authentication; `keep_db` retains the database binding.
    pub fn logout(&self, keep_db: bool) {
        self.with_session(|session| {
            session.logout(keep_db);
            session.remove("groups");
        });
        if !keep_db {
            self.set_db_name(None);
        }
    }

    pub fn groups(&self) -> Vec<String> {
        self.with_session(|session| {
            session
                .get("groups")
                .and_then(|value| {
                    value.as_array().map(|items| {
                        items
                            .iter()
                            .filter_map(|item| item.as_str().map(str::to_string))
                            .collect()
                    })
                })
                .unwrap_or_default()
        })
    }

    /// Ambient logging context carrying the database tag and the perf
    /// counter.
    pub fn log_context(&self) -> LogContext {
        let mut metadata = Map::new();
        metadata.insert("request_id".to_string(), Value::String(self.request_id.clone()));
        let user_id = self.user_id();
        if user_id != 0 {
            metadata.insert("user_id".to_string(), Value::from(user_id));
        }
        LogContext {
            db_name: self.db_name(),
            perf: Some(self.perf.clone()),
            metadata,
        }
    }

    /// Base invocation context for the dispatcher, seeded from the session
    /// context.
    pub fn call_context(&self) -> CallContext {
        CallContext {
            request_id: self.request_id.clone(),
            db_name: self.db_name(),
            user_id: self.user_id(),
            groups: self.groups(),
            context: self.with_session(|s| s.context()),
            kwargs: Map::new(),
            perf: Some(self.perf.clone()),
        }
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn param_str(&self, key: &str, default: &str) -> String {
        match self.params.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => default.to_string(),
        }
    }

    pub fn param_i64(&self, key: &str, default: i64) -> i64 {
        match self.params.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        match self.params.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "1" | "on" | "yes"),
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(default),
            _ => default,
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Extract one cookie value from the Cookie header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get("cookie")?.to_str().ok()?;
    for pair in raw.split(';') {
        let (key, value) = pair.trim().split_once('=')?;
        if key == name {
            return Some(value.to_string());
        }
    }
    None
}

/// Parse request parameters from the query string and (for POST) the body:
/// JSON object, urlencoded form or multipart text fields. The body is
/// buffered and re-installed so downstream extractors still see it.
pub async fn bind_params(req: Request) -> Result<(Request, Map<String, Value>), AppError> {
    let (parts, body) = req.into_parts();
    let mut params = Map::new();

    if let Some(query) = parts.uri.query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            insert_param(&mut params, key.into_owned(), Value::String(value.into_owned()));
        }
    }

    let bytes = axum::body::to_bytes(body, BODY_LIMIT)
        .await
        .map_err(|err| AppError::Validation(format!("unreadable request body: {}", err)))?;

    if parts.method == Method::POST && !bytes.is_empty() {
        let content_type = header_str(&parts.headers, CONTENT_TYPE.as_str());

        if content_type.starts_with("application/json") {
            if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&bytes) {
                for (key, value) in map {
                    params.insert(key, value);
                }
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            for (key, value) in url::form_urlencoded::parse(&bytes) {
                insert_param(&mut params, key.into_owned(), Value::String(value.into_owned()));
            }
        } else if content_type.starts_with("multipart/form-data") {
            parse_multipart_params(&parts.headers, bytes.clone(), &mut params).await;
        }
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok((req, params))
}

/// Repeated keys accumulate into an array, mirroring multi-valued query
/// parameters.
fn insert_param(params: &mut Map<String, Value>, key: String, value: Value) {
    match params.get_mut(&key) {
        Some(Value::Array(existing)) => existing.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            params.insert(key, value);
        }
    }
}

async fn parse_multipart_params(headers: &HeaderMap, bytes: Bytes, params: &mut Map<String, Value>) {
    let mut mp_req = Request::new(Body::from(bytes));
    if let Some(content_type) = headers.get(CONTENT_TYPE) {
        mp_req.headers_mut().insert(CONTENT_TYPE, content_type.clone());
    }

    let Ok(mut multipart) = Multipart::from_request(mp_req, &()).await else {
        return;
    };

    while let Ok(Some(field)) = multipart.next_field().await {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if let Ok(text) = field.text().await {
            insert_param(params, name, Value::String(text));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FilesystemSessionStore;
    use serde_json::json;

    fn settings() -> Settings {
        Settings {
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_file: String::new(),
            log_db: String::new(),
            log_db_level: "warning".to_string(),
            syslog: String::new(),
            log_handler: String::new(),
            session_dir: "./sessions".to_string(),
            session_cookie: "goodoo_session".to_string(),
            default_db: "demo".to_string(),
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_user: "postgres".to_string(),
            db_password: String::new(),
            db_name: String::new(),
            db_sslmode: "prefer".to_string(),
            db_maxconn: 64,
            pgappname: "goodoo-{pid}".to_string(),
        }
    }

    fn bind_ctx(
        uri: &str,
        params: Map<String, Value>,
        store: &FilesystemSessionStore,
    ) -> Arc<RequestCtx> {
        RequestCtx::bind(
            &Method::GET,
            &uri.parse().unwrap(),
            &HeaderMap::new(),
            params,
            &settings(),
            store,
        )
    }

    #[tokio::test]
    async fn test_bind_query_params() {
        let req = Request::builder()
            .uri("/x?a=1&b=two&a=3")
            .body(Body::empty())
            .unwrap();

        let (_req, params) = bind_params(req).await.unwrap();
        assert_eq!(params["b"], "two");
        assert_eq!(params["a"], json!(["1", "3"]));
    }

    #[tokio::test]
    async fn test_bind_json_body() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/x")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"login": "admin", "count": 2}"#))
            .unwrap();

        let (_req, params) = bind_params(req).await.unwrap();
        assert_eq!(params["login"], "admin");
        assert_eq!(params["count"], 2);
    }

    #[tokio::test]
    async fn test_bind_form_body() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/x")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("login=admin&password=secret"))
            .unwrap();

        let (_req, params) = bind_params(req).await.unwrap();
        assert_eq!(params["login"], "admin");
        assert_eq!(params["password"], "secret");
    }

    #[tokio::test]
    async fn test_body_reinstalled_after_binding() {
        use http_body_util::BodyExt;

        let payload = r#"{"k": "v"}"#;
        let req = Request::builder()
            .method(Method::POST)
            .uri("/x")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(payload))
            .unwrap();

        let (req, _params) = bind_params(req).await.unwrap();
        let body = req.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, payload.as_bytes());
    }

    #[test]
    fn test_cookie_value_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            "other=1; goodoo_session=abc123; trailing=x".parse().unwrap(),
        );
        assert_eq!(
            cookie_value(&headers, "goodoo_session"),
            Some("abc123".to_string())
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_bind_creates_fresh_session_and_selects_default_db() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemSessionStore::new(dir.path(), true).unwrap();

        let ctx = bind_ctx("/session", Map::new(), &store);

        assert!(ctx.cookie_needed());
        assert_eq!(ctx.session_id().len(), 64);
        assert_eq!(ctx.db_name(), Some("demo".to_string()));
        assert!(!ctx.is_authenticated());
    }

    #[test]
    fn test_db_query_param_beats_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemSessionStore::new(dir.path(), true).unwrap();

        let mut params = Map::new();
        params.insert("db".to_string(), json!("tenant2"));
        let ctx = bind_ctx("/session?db=tenant2", params, &store);

        assert_eq!(ctx.db_name(), Some("tenant2".to_string()));
    }

    #[test]
    fn test_authenticate_binds_db_and_groups() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemSessionStore::new(dir.path(), true).unwrap();
        let ctx = bind_ctx("/x", Map::new(), &store);

        ctx.authenticate("tenant1", "admin", 1, &["base.group_admin".to_string()]);
        assert!(ctx.is_authenticated());
        assert_eq!(ctx.db_name(), Some("tenant1".to_string()));
        assert_eq!(ctx.groups(), vec!["base.group_admin".to_string()]);

        let call_ctx = ctx.call_context();
        assert_eq!(call_ctx.user_id, 1);
        assert_eq!(call_ctx.context["login"], "admin");

        ctx.logout(false);
        assert!(!ctx.is_authenticated());
        assert_eq!(ctx.db_name(), None);
        assert!(ctx.groups().is_empty());
    }

    #[test]
    fn test_param_getters() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemSessionStore::new(dir.path(), true).unwrap();

        let mut params = Map::new();
        params.insert("name".to_string(), json!("Acme"));
        params.insert("count".to_string(), json!("41"));
        params.insert("flag".to_string(), json!("on"));
        let ctx = bind_ctx("/x", params, &store);

        assert_eq!(ctx.param_str("name", ""), "Acme");
        assert_eq!(ctx.param_i64("count", 0), 41);
        assert!(ctx.param_bool("flag", false));
        assert_eq!(ctx.param_str("missing", "fallback"), "fallback");
    }
}
