//! Session tokens: HS256 JWTs carried in a cookie, checked against the user collection.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::protocol::{ApiResponse, NOT_LOGGED};
use super::server::GatewayState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User email.
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no session cookie")]
    Missing,
    #[error("invalid session token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("unknown user {0}")]
    UnknownUser(String),
}

/// Issues a token for `email` valid for `lifetime_hours`.
pub fn mint_token(secret: &str, email: &str, lifetime_hours: i64) -> Result<String, AuthError> {
    let now = Utc::now();
    let exp = (now + chrono::Duration::hours(lifetime_hours)).timestamp().max(0) as usize;
    let claims = Claims {
        sub: email.to_string(),
        exp,
        iat: now.timestamp().max(0) as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Checks signature and expiry.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Value of cookie `name` from the request's Cookie headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

/// The caller, resolved from the session cookie. Rejects with 405 "Not Logged".
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub email: String,
}

#[async_trait]
impl FromRequestParts<GatewayState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &GatewayState) -> Result<Self, Self::Rejection> {
        match authenticate(&parts.headers, state).await {
            Ok(user) => Ok(user),
            Err(AuthError::UnknownUser(email)) => {
                log::info!("auth: token for unknown user {}, clearing cookie", email);
                Err(clear_cookie_rejection(&state.cookie_name))
            }
            Err(e) => {
                log::debug!("auth: rejected: {}", e);
                Err(ApiResponse::message(StatusCode::METHOD_NOT_ALLOWED, NOT_LOGGED).into_response())
            }
        }
    }
}

async fn authenticate(headers: &HeaderMap, state: &GatewayState) -> Result<AuthUser, AuthError> {
    let token = cookie_value(headers, &state.cookie_name).ok_or(AuthError::Missing)?;
    let claims = verify_token(&state.jwt_secret, token)?;
    match state.store.find_user(&claims.sub).await {
        Some(user) => Ok(AuthUser { email: user.email }),
        None => Err(AuthError::UnknownUser(claims.sub)),
    }
}

fn clear_cookie_rejection(cookie_name: &str) -> Response {
    let mut res = ApiResponse::message(StatusCode::METHOD_NOT_ALLOWED, NOT_LOGGED).into_response();
    let cleared = format!(
        "{}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
        cookie_name
    );
    if let Ok(value) = HeaderValue::from_str(&cleared) {
        res.headers_mut().insert(header::SET_COOKIE, value);
    }
    res
}
