use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{Redirect, Response};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::AppState;

pub const SESSION_COOKIE: &str = "fitclub_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    Success,
    Error,
}

/// One take-once message shown on the next rendered page.
#[derive(Debug, Clone)]
pub struct Flash {
    pub kind: FlashKind,
    pub text: String,
}

/// Server-side session state, keyed by the opaque id in the cookie.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub user_id: Option<i32>,
    pub role: Option<String>,
    flash: Vec<Flash>,
    csrf_token: Option<String>,
}

impl Session {
    pub fn is_logged_in(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn log_in(&mut self, user_id: i32, role: &str) {
        self.user_id = Some(user_id);
        self.role = Some(role.to_string());
    }

    pub fn push_flash(&mut self, kind: FlashKind, text: impl Into<String>) {
        self.flash.push(Flash {
            kind,
            text: text.into(),
        });
    }

    /// Drains the pending flash messages. Rendering a page consumes them.
    pub fn take_flashes(&mut self) -> Vec<Flash> {
        std::mem::take(&mut self.flash)
    }

    /// Returns the CSRF token for this session, creating one on first use.
    pub fn csrf_token(&mut self) -> String {
        self.csrf_token
            .get_or_insert_with(new_token)
            .clone()
    }

    pub fn verify_csrf(&self, token: &str) -> bool {
        self.csrf_token.as_deref() == Some(token) && !token.is_empty()
    }
}

fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// In-memory session store shared across requests.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh empty session and returns its id.
    pub async fn create(&self) -> String {
        let id = new_token();
        self.inner.lock().await.insert(id.clone(), Session::default());
        id
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.lock().await.contains_key(id)
    }

    /// Runs `f` against the session for `id`, creating it if missing.
    pub async fn with<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.inner.lock().await;
        let session = sessions.entry(id.to_string()).or_default();
        f(session)
    }

    /// Logout: drop every piece of state tied to this id.
    pub async fn destroy(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }
}

/// Session id for the current request, placed in request extensions by
/// [`session_middleware`].
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

/// Attaches a session to every request: reuses the id from the cookie when
/// the store still knows it, otherwise creates a new session and sets the
/// cookie on the response.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let mut known_id = None;
    if let Some(cookie_id) = cookie_value(req.headers(), SESSION_COOKIE) {
        if state.sessions.contains(&cookie_id).await {
            known_id = Some(cookie_id);
        }
    }
    let (id, is_new) = match known_id {
        Some(id) => (id, false),
        None => (state.sessions.create().await, true),
    };

    req.extensions_mut().insert(SessionId(id.clone()));
    let mut response = next.run(req).await;

    if is_new {
        let cookie = format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax");
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

/// Queue a flash message and redirect: the write half of the
/// redirect-after-write pattern every form post follows.
pub async fn flash_redirect(
    state: &AppState,
    sid: &SessionId,
    kind: FlashKind,
    text: impl Into<String>,
    to: &str,
) -> Redirect {
    state.sessions.with(&sid.0, |s| s.push_flash(kind, text)).await;
    Redirect::to(to)
}

/// Hidden input carrying the session's CSRF token, for embedding in forms.
pub async fn csrf_field(state: &AppState, sid: &SessionId) -> String {
    let token = state.sessions.with(&sid.0, |s| s.csrf_token()).await;
    format!("<input type=\"hidden\" name=\"csrf_token\" value=\"{token}\">")
}

pub async fn verify_csrf(state: &AppState, sid: &SessionId, token: &str) -> AppResult<()> {
    let ok = state.sessions.with(&sid.0, |s| s.verify_csrf(token)).await;
    if ok {
        Ok(())
    } else {
        Err(AppError::CsrfMismatch)
    }
}

/// Pulls a single cookie value out of the request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name).then(|| v.to_string())
        })
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn created_session_is_empty_and_findable() {
        let store = SessionStore::new();
        let id = store.create().await;
        assert!(store.contains(&id).await);
        assert!(!store.with(&id, |s| s.is_logged_in()).await);
    }

    #[tokio::test]
    async fn destroy_clears_all_session_state() {
        let store = SessionStore::new();
        let id = store.create().await;
        store.with(&id, |s| s.log_in(7, "member")).await;
        store.destroy(&id).await;
        assert!(!store.contains(&id).await);
        // A later access with the same id starts from scratch.
        assert_eq!(store.with(&id, |s| s.user_id).await, None);
    }

    #[tokio::test]
    async fn flashes_are_take_once() {
        let store = SessionStore::new();
        let id = store.create().await;
        store
            .with(&id, |s| s.push_flash(FlashKind::Success, "Class booked successfully!"))
            .await;
        let first = store.with(&id, |s| s.take_flashes()).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].text, "Class booked successfully!");
        assert!(store.with(&id, |s| s.take_flashes()).await.is_empty());
    }

    #[tokio::test]
    async fn csrf_token_is_stable_and_verifiable() {
        let store = SessionStore::new();
        let id = store.create().await;
        let token = store.with(&id, |s| s.csrf_token()).await;
        assert_eq!(store.with(&id, |s| s.csrf_token()).await, token);
        assert!(store.with(&id, |s| s.verify_csrf(&token)).await);
        assert!(!store.with(&id, |s| s.verify_csrf("bogus")).await);
        assert!(!store.with(&id, |s| s.verify_csrf("")).await);
    }

    #[test]
    fn cookie_parsing_finds_the_right_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; fitclub_session=abc123; other=1"),
        );
        assert_eq!(
            cookie_value(&headers, SESSION_COOKIE).as_deref(),
            Some("abc123")
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
