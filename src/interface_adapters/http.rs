// REST handlers for matchmaking requests, lobbies, and lobby chat. Maps
// `CoreError` onto HTTP status codes once, generically, since the error enum
// already carries its own category -- unlike
// `auth_server::interface_adapters::handlers`'s per-endpoint match (that
// crate's `AuthError` has no such category field to dispatch on).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::domain::errors::CoreError;
use crate::interface_adapters::protocol::{
    ChatMessageResponse, CurrentMatchRequestResponse, ErrorResponse, LobbyResponse,
    MatchHistoryResponse, MatchRequestResponse, MessagesQuery, MessagesResponse, PageQuery,
    SendMessageBody, SetReadyBody, SubmitMatchRequestBody,
};
use crate::interface_adapters::state::AppState;

type HandlerResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn map_core_error(err: CoreError, dev_mode: bool) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        CoreError::Validation(_) | CoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
        CoreError::Authentication(_) => StatusCode::UNAUTHORIZED,
        CoreError::Authorization(_) => StatusCode::FORBIDDEN,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Conflict(_) => StatusCode::CONFLICT,
        CoreError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
        CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse { message: err.public_message(dev_mode) }))
}

// Placeholder auth extraction: the caller's user id travels as a header
// until an upstream gateway terminates real credential verification (see
// `interface_adapters::socket_hub`'s doc comment for why no JWT crate is
// introduced here).
struct AuthedUser(Uuid);

fn extract_user(headers: &axum::http::HeaderMap) -> Result<AuthedUser, (StatusCode, Json<ErrorResponse>)> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, Json(ErrorResponse { message: "missing x-user-id header".to_string() })))?;
    let user_id = Uuid::parse_str(raw)
        .map_err(|_| (StatusCode::UNAUTHORIZED, Json(ErrorResponse { message: "invalid x-user-id header".to_string() })))?;
    Ok(AuthedUser(user_id))
}

pub async fn submit_match_request(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<SubmitMatchRequestBody>,
) -> HandlerResult<MatchRequestResponse> {
    let AuthedUser(user_id) = extract_user(&headers)?;
    let request = state
        .matchmaking
        .submit_match_request(user_id, body.criteria)
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?;
    Ok(Json(MatchRequestResponse { request }))
}

pub async fn cancel_match_request(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(request_id): Path<Uuid>,
) -> HandlerResult<MatchRequestResponse> {
    let AuthedUser(user_id) = extract_user(&headers)?;
    let request = state
        .matchmaking
        .cancel_match_request(user_id, request_id)
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?;
    Ok(Json(MatchRequestResponse { request }))
}

pub async fn get_current_match_request(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> HandlerResult<CurrentMatchRequestResponse> {
    let AuthedUser(user_id) = extract_user(&headers)?;
    let current = state
        .matchmaking
        .get_current_match_request(user_id)
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?;
    let (request, queue_info) = match current {
        Some((request, info)) => (Some(request), Some(info)),
        None => (None, None),
    };
    Ok(Json(CurrentMatchRequestResponse { request, queue_info }))
}

pub async fn get_match_history(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<PageQuery>,
) -> HandlerResult<MatchHistoryResponse> {
    let AuthedUser(user_id) = extract_user(&headers)?;
    let page = state
        .matchmaking
        .get_match_history(user_id, query.page.unwrap_or(1), query.limit.unwrap_or(20))
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?;
    Ok(Json(MatchHistoryResponse { page }))
}

pub async fn get_lobby(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(lobby_id): Path<Uuid>,
) -> HandlerResult<LobbyResponse> {
    let viewer = extract_user(&headers).ok().map(|a| a.0);
    let lobby = state
        .lobby_engine
        .get_lobby_by_id(lobby_id, viewer)
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?;
    Ok(Json(LobbyResponse { lobby }))
}

pub async fn join_lobby(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(lobby_id): Path<Uuid>,
) -> HandlerResult<LobbyResponse> {
    let AuthedUser(user_id) = extract_user(&headers)?;
    let user = state
        .persistence
        .users()
        .get(user_id)
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?
        .ok_or_else(|| map_core_error(CoreError::NotFound("user not found".into()), state.config.dev_mode))?;
    let lobby = state
        .lobby_engine
        .join_lobby(lobby_id, user_id, user.status)
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?;
    Ok(Json(LobbyResponse { lobby }))
}

pub async fn leave_lobby(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(lobby_id): Path<Uuid>,
) -> HandlerResult<LobbyResponse> {
    let AuthedUser(user_id) = extract_user(&headers)?;
    let lobby = state
        .lobby_engine
        .leave_lobby(lobby_id, user_id)
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?;
    Ok(Json(LobbyResponse { lobby }))
}

pub async fn set_ready(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(lobby_id): Path<Uuid>,
    Json(body): Json<SetReadyBody>,
) -> HandlerResult<LobbyResponse> {
    let AuthedUser(user_id) = extract_user(&headers)?;
    let lobby = state
        .lobby_engine
        .set_member_ready(lobby_id, user_id, body.ready)
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?;
    Ok(Json(LobbyResponse { lobby }))
}

pub async fn close_lobby(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(lobby_id): Path<Uuid>,
) -> HandlerResult<LobbyResponse> {
    let AuthedUser(user_id) = extract_user(&headers)?;
    let lobby = state
        .lobby_engine
        .get_lobby_by_id(lobby_id, Some(user_id))
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?;
    if lobby.host_id != user_id {
        return Err(map_core_error(
            CoreError::Authorization("only the host may close the lobby".into()),
            state.config.dev_mode,
        ));
    }
    let lobby = state
        .lobby_engine
        .close_lobby(lobby_id, "closed by host")
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?;
    Ok(Json(LobbyResponse { lobby }))
}

pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(lobby_id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> HandlerResult<MessagesResponse> {
    let messages = state
        .lobby_engine
        .get_messages(lobby_id, query.limit.unwrap_or(50), query.before)
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?;
    Ok(Json(MessagesResponse { messages }))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(lobby_id): Path<Uuid>,
    Json(body): Json<SendMessageBody>,
) -> HandlerResult<ChatMessageResponse> {
    let AuthedUser(user_id) = extract_user(&headers)?;
    let message = state
        .lobby_engine
        .send_user_message(lobby_id, user_id, &body.content, body.content_type.unwrap_or(crate::domain::chat::ContentType::Text))
        .await
        .map_err(|err| map_core_error(err, state.config.dev_mode))?;
    Ok(Json(ChatMessageResponse { message }))
}
