//! Caller identity.
//!
//! Users are authenticated upstream; the gateway forwards the opaque user id
//! in `x-user-id`. Operator and payment-review routes carry the shared
//! operator token in `x-operator-token` or as a bearer token.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use sixdice_types::UserId;

use super::ApiError;
use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const OPERATOR_TOKEN_HEADER: &str = "x-operator-token";

/// The calling user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Player(pub UserId);

pub(super) fn user_from_headers(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(UserId::new)
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Player {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_from_headers(&parts.headers)
            .map(Player)
            .ok_or_else(|| ApiError::unauthorized("missing x-user-id"))
    }
}

/// Proof that the caller presented the operator token.
#[derive(Clone, Copy, Debug)]
pub struct Operator;

#[async_trait]
impl FromRequestParts<AppState> for Operator {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = state.operator_token.as_deref() else {
            return Err(ApiError::unauthorized("operator access disabled"));
        };
        let bearer = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        let header_token = parts
            .headers
            .get(OPERATOR_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        if bearer == Some(token) || header_token == Some(token) {
            Ok(Operator)
        } else {
            Err(ApiError::unauthorized("invalid operator token"))
        }
    }
}
