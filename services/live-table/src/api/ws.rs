use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State as AxumState,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sixdice_execution::Ledger;
use sixdice_types::{api::PlayerView, UserId};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use super::auth::user_from_headers;
use crate::broadcast::TableFrame;
use crate::AppState;

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Default, Deserialize)]
pub(super) struct StreamParams {
    user_id: Option<String>,
}

/// Browsers cannot set headers on a WebSocket upgrade, so the user id may
/// also arrive as `?user_id=`. Anonymous sessions get table state only.
pub(super) async fn stream(
    AxumState(state): AxumState<AppState>,
    headers: HeaderMap,
    Query(params): Query<StreamParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let user = user_from_headers(&headers).or_else(|| {
        params
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(UserId::new)
    });
    if let Some(user) = &user {
        state.ensure_wallet(user);
    }
    ws.on_upgrade(move |socket| handle_stream(socket, state, user))
}

/// Render `frame` for one session.
fn render(frame: &TableFrame, state: &AppState, user: Option<&UserId>) -> serde_json::Result<String> {
    let player = user.map(|user| PlayerView {
        balance: state.ledger.balance(user),
        bets: frame.player_bets(user),
    });
    serde_json::to_string(&frame.message(state.clock.now_ms(), player))
}

async fn handle_stream(socket: WebSocket, state: AppState, user: Option<UserId>) {
    // Registered before the first read: the latest frame is already queued.
    let mut subscription = state.broadcaster.subscribe();
    let session = subscription.id();
    tracing::info!(session, user = ?user, "stream connected");

    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(state.broadcaster.capacity());
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            match timeout(WS_SEND_TIMEOUT, sender.send(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    tracing::debug!(session, "stream send failed, client gone");
                    break;
                }
                Err(_) => {
                    tracing::warn!(session, "stream send timed out, closing");
                    break;
                }
            }
        }
        let _ = sender.close().await;
    });

    loop {
        tokio::select! {
            message = receiver.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if out_tx.try_send(Message::Pong(data)).is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::debug!(session, ?err, "stream read failed");
                        break;
                    }
                    _ => {}
                }
            }
            frame = subscription.recv() => {
                let Some(frame) = frame else {
                    tracing::warn!(session, "stream pruned by broadcaster");
                    break;
                };
                match render(&frame, &state, user.as_ref()) {
                    Ok(payload) => {
                        if out_tx.try_send(Message::Text(payload)).is_err() {
                            tracing::warn!(session, seq = frame.seq, "stream outbound full, closing");
                            break;
                        }
                    }
                    Err(err) => tracing::error!(session, ?err, "failed to encode frame"),
                }
            }
        }
    }

    drop(subscription);
    drop(out_tx);
    let _ = writer.await;
    tracing::info!(session, "stream disconnected");
}
