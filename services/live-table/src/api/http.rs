use axum::{
    extract::{Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use sixdice_execution::{Entry, HistoryFilter, Ledger, LedgerError};
use sixdice_types::{
    api::{
        BetsResponse, DiceModeRequest, GameStats, HistoryEntry, LastRoundResults, PlaceBetRequest,
        RemoveBetRequest, RemoveBetResponse, ResetResponse, RoundSnapshot, SetDiceRequest,
        WalletAdjustmentRequest, WalletView,
    },
    normalize_amount, ErrorKind, RoundId, Transaction, TransactionKind,
};

use super::{ApiError, Operator, Player};
use crate::metrics::TableMetricsSnapshot;
use crate::AppState;

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

pub(super) async fn healthz() -> impl IntoResponse {
    Json(HealthzResponse { ok: true })
}

pub(super) async fn metrics(AxumState(state): AxumState<AppState>) -> Json<TableMetricsSnapshot> {
    Json(state.metrics.snapshot(state.broadcaster.session_count()))
}

/// Served from the last published frame, with the countdown re-derived.
pub(super) async fn current_round(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<RoundSnapshot>, ApiError> {
    let frame = state
        .broadcaster
        .latest()
        .ok_or_else(|| ApiError::new(ErrorKind::Unavailable, "table is starting"))?;
    Ok(Json(frame.round_at(state.clock.now_ms())))
}

pub(super) async fn last_round_results(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<LastRoundResults>, ApiError> {
    state
        .table
        .last_result()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::new(ErrorKind::NotFound, "no completed round yet"))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct BetsQuery {
    round_id: Option<RoundId>,
}

pub(super) async fn my_bets(
    AxumState(state): AxumState<AppState>,
    Player(user): Player,
    Query(query): Query<BetsQuery>,
) -> Result<Json<BetsResponse>, ApiError> {
    state.ensure_wallet(&user);
    Ok(Json(state.table.list_bets(user, query.round_id).await?))
}

pub(super) async fn place_bet(
    AxumState(state): AxumState<AppState>,
    Player(user): Player,
    Json(request): Json<PlaceBetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.ensure_wallet(&user);
    let response = state
        .table
        .place_bet(user, request.number, request.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub(super) async fn remove_bet(
    AxumState(state): AxumState<AppState>,
    Player(user): Player,
    Json(request): Json<RemoveBetRequest>,
) -> Result<Json<RemoveBetResponse>, ApiError> {
    Ok(Json(state.table.remove_bet(user, request.number).await?))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct LimitQuery {
    limit: Option<usize>,
}

pub(super) async fn betting_history(
    AxumState(state): AxumState<AppState>,
    Player(user): Player,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    Ok(Json(state.table.betting_history(user, query.limit).await?))
}

pub(super) async fn stats(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<GameStats>, ApiError> {
    Ok(Json(state.table.stats().await?))
}

pub(super) async fn wallet(
    AxumState(state): AxumState<AppState>,
    Player(user): Player,
) -> Json<WalletView> {
    state.ensure_wallet(&user);
    let balance = state.ledger.balance(&user);
    Json(WalletView { user, balance })
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct WalletHistoryQuery {
    kind: Option<TransactionKind>,
    since_ms: Option<u64>,
    limit: Option<usize>,
}

pub(super) async fn wallet_history(
    AxumState(state): AxumState<AppState>,
    Player(user): Player,
    Query(query): Query<WalletHistoryQuery>,
) -> Json<Vec<Transaction>> {
    let filter = HistoryFilter {
        kind: query.kind,
        since_ms: query.since_ms,
        limit: query.limit,
    };
    Json(state.ledger.history(&user, &filter))
}

pub(super) async fn deposit(
    AxumState(state): AxumState<AppState>,
    _operator: Operator,
    Json(request): Json<WalletAdjustmentRequest>,
) -> Result<Json<Transaction>, ApiError> {
    adjust_wallet(&state, request, TransactionKind::Deposit).map(Json)
}

pub(super) async fn withdraw(
    AxumState(state): AxumState<AppState>,
    _operator: Operator,
    Json(request): Json<WalletAdjustmentRequest>,
) -> Result<Json<Transaction>, ApiError> {
    adjust_wallet(&state, request, TransactionKind::Withdraw).map(Json)
}

/// Apply an approved deposit or withdrawal and push the new balance to
/// connected sessions.
fn adjust_wallet(
    state: &AppState,
    request: WalletAdjustmentRequest,
    kind: TransactionKind,
) -> Result<Transaction, ApiError> {
    let amount =
        normalize_amount(request.amount).ok_or(LedgerError::InvalidAmount(request.amount))?;
    let description = request
        .description
        .unwrap_or_else(|| kind.as_str().to_ascii_lowercase());
    let mut entry = Entry::new(
        request.user.clone(),
        amount,
        kind,
        description,
        state.clock.now_ms(),
    );
    if let Some(reference) = request.reference {
        entry = entry.with_reference(reference);
    }
    let transaction = if kind.is_debit() {
        state.ledger.debit(entry)?
    } else {
        state.ledger.credit(entry)?
    };
    tracing::info!(
        user = %request.user,
        kind = kind.as_str(),
        amount = %amount,
        balance = %transaction.balance_after,
        "wallet adjusted"
    );
    state.broadcaster.republish();
    Ok(transaction)
}

pub(super) async fn set_dice(
    AxumState(state): AxumState<AppState>,
    _operator: Operator,
    Json(request): Json<SetDiceRequest>,
) -> Result<StatusCode, ApiError> {
    state.table.set_dice(request.dice).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn dice_mode(
    AxumState(state): AxumState<AppState>,
    _operator: Operator,
    Json(request): Json<DiceModeRequest>,
) -> Result<Json<DiceModeRequest>, ApiError> {
    let mode = state.table.set_dice_mode(request.mode).await?;
    Ok(Json(DiceModeRequest { mode }))
}

pub(super) async fn reset(
    AxumState(state): AxumState<AppState>,
    _operator: Operator,
) -> Result<Json<ResetResponse>, ApiError> {
    Ok(Json(state.table.reset().await?))
}
