//! HTTP Basic 认证：常量时间凭据比较与质询响应。

use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderValue, Request, header};
use axum::{body::Body as AxumBody, middleware, response::Response};
use axum_extra::extract::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Basic};
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::ApiError;

/// Username/password pair configured once at startup.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// Never expose the password, not even through accidental debug logging.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// clap value parser for `--auth user:pass`.
pub fn parse_auth(value: &str) -> Result<Credentials, String> {
    let Some((username, password)) = value.split_once(':') else {
        return Err("auth format must be username:password".into());
    };
    if username.is_empty() || password.is_empty() {
        return Err("username/password cannot be empty".into());
    }
    Ok(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Per-request credential check; stateless, shared read-only.
#[derive(Debug)]
pub struct AuthGate {
    credentials: Option<Credentials>,
}

impl AuthGate {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self { credentials }
    }

    pub fn enabled(&self) -> bool {
        self.credentials.is_some()
    }

    /// Allows the request or returns a 401 with a Basic challenge.
    ///
    /// Both fields go through constant-time comparison and the results are
    /// combined with a bitwise AND, so a username mismatch never skips the
    /// password comparison.
    pub fn verify(&self, supplied: Option<(&str, &str)>) -> Result<(), ApiError> {
        let Some(expected) = &self.credentials else {
            return Ok(());
        };
        let Some((username, password)) = supplied else {
            return Err(ApiError::Unauthorized(challenge_headers()));
        };

        let username_ok = username.as_bytes().ct_eq(expected.username.as_bytes());
        let password_ok = password.as_bytes().ct_eq(expected.password.as_bytes());
        if bool::from(username_ok & password_ok) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized(challenge_headers()))
        }
    }
}

fn challenge_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static(r#"Basic realm="filedrop""#),
    );
    headers
}

/// 认证中间件：除 /health 外的所有路由都经过凭据校验。
pub async fn auth_middleware(
    Extension(gate): Extension<Arc<AuthGate>>,
    auth_header: Option<TypedHeader<Authorization<Basic>>>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let supplied = auth_header
        .as_ref()
        .map(|TypedHeader(basic)| (basic.username(), basic.password()));
    gate.verify(supplied)?;
    Ok(next.run(req).await)
}
