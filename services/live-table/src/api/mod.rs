use axum::{
    extract::Request,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use sixdice_execution::{BetError, LedgerError};
use sixdice_types::{api::ErrorResponse, ErrorKind};

use crate::table::TableError;
use crate::AppState;

mod auth;
mod http;
mod ws;

pub use auth::{Operator, Player, OPERATOR_TOKEN_HEADER, USER_ID_HEADER};

const REQUEST_ID_HEADER: &str = "x-request-id";

pub struct Api {
    state: AppState,
}

impl Api {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::CONTENT_TYPE,
                header::HeaderName::from_static(REQUEST_ID_HEADER),
                header::HeaderName::from_static(USER_ID_HEADER),
                header::HeaderName::from_static(OPERATOR_TOKEN_HEADER),
            ])
            .expose_headers([header::HeaderName::from_static(REQUEST_ID_HEADER)]);

        let router = Router::new()
            .route("/healthz", get(http::healthz))
            .route("/metrics", get(http::metrics))
            .route("/round", get(http::current_round))
            .route("/round/last", get(http::last_round_results))
            .route("/bets", get(http::my_bets))
            .route("/bet", post(http::place_bet))
            .route("/bet/remove", post(http::remove_bet))
            .route("/betting-history", get(http::betting_history))
            .route("/stats", get(http::stats))
            .route("/wallet", get(http::wallet))
            .route("/wallet/history", get(http::wallet_history))
            .route("/stream", get(ws::stream));

        let router = if self.state.operator_token.is_some() {
            router
                .route("/wallet/deposit", post(http::deposit))
                .route("/wallet/withdraw", post(http::withdraw))
                .route("/set-dice", post(http::set_dice))
                .route("/dice-mode", post(http::dice_mode))
                .route("/admin/reset", post(http::reset))
        } else {
            tracing::warn!("operator token not configured; operator routes disabled");
            router
        };

        router
            .layer(cors)
            .layer(middleware::from_fn(request_id_middleware))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }
}

async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static(REQUEST_ID_HEADER),
            header_value,
        );
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}

/// Error body returned by every endpoint: a stable code and a readable message.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::InvalidPhase | ErrorKind::DuplicateBet => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidNumber | ErrorKind::InvalidAmount | ErrorKind::InsufficientFunds => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::ResolutionFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            code: self.kind,
            message: self.message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<BetError> for ApiError {
    fn from(err: BetError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<TableError> for ApiError {
    fn from(err: TableError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}
