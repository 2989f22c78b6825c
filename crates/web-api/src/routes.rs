use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use application::services::{
    AuthenticateUserRequest, HistoryRequest, MarkReadRequest, OpenConversationRequest,
    RegisterUserRequest, SearchUsersRequest, UpdateProfileRequest,
};
use application::{ConversationDto, MessagePage, UserDto};

use crate::{auth::AuthResponse, error::ApiError, state::AppState, ws};

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    username: String,
    display_name: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct UpdateProfilePayload {
    display_name: Option<String>,
    bio: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: String,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

pub fn router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origin))
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/users/search", get(search_users))
        .route("/users/profile", put(update_profile))
        .route("/users/{user_id}", get(get_user))
        .route("/chat/conversations", get(list_conversations))
        .route("/chat/conversation/{other_user_id}", get(open_conversation))
        .route("/chat/messages/{conversation_id}", get(get_history))
        .route("/chat/messages/{conversation_id}/read", put(mark_read))
        .route("/ws", get(ws::websocket_upgrade))
}

fn cors_layer(origin: &str) -> CorsLayer {
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods([Method::GET, Method::POST, Method::PUT])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        Err(_) => {
            tracing::warn!(origin, "CLIENT_URL 不是合法的源，退回宽松 CORS 配置");
            CorsLayer::permissive()
        }
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let user = state
        .user_service
        .register(RegisterUserRequest {
            username: payload.username,
            display_name: payload.display_name,
            password: payload.password,
        })
        .await?;

    let token = state.jwt_service.generate_token(user.id)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { user, token })))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = state
        .user_service
        .authenticate(AuthenticateUserRequest {
            username: payload.username,
            password: payload.password,
        })
        .await?;

    let token = state.jwt_service.generate_token(user.id)?;
    Ok(Json(AuthResponse { user, token }))
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    state.user_service.record_logout(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserDto>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let dto = state.user_service.get_profile(user_id).await?;
    Ok(Json(dto))
}

async fn search_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserDto>>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let found = state
        .user_service
        .search(SearchUsersRequest {
            requester: user_id,
            query: query.query,
        })
        .await?;
    Ok(Json(found))
}

async fn get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserDto>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let dto = state.user_service.get_profile(user_id).await?;
    Ok(Json(dto))
}

async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateProfilePayload>,
) -> Result<Json<UserDto>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let dto = state
        .user_service
        .update_profile(UpdateProfileRequest {
            user_id,
            display_name: payload.display_name,
            bio: payload.bio,
            avatar_url: payload.avatar_url,
        })
        .await?;
    Ok(Json(dto))
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConversationDto>>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let conversations = state.chat_service.list_conversations(user_id).await?;
    Ok(Json(conversations))
}

/// 打开与指定用户的私聊会话，不存在则创建。
async fn open_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(other_user_id): Path<Uuid>,
) -> Result<Json<ConversationDto>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let dto = state
        .chat_service
        .open_direct_conversation(OpenConversationRequest {
            requester: user_id,
            other_user_id,
        })
        .await?;
    Ok(Json(dto))
}

async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let page = state
        .chat_service
        .get_history(HistoryRequest {
            requester: user_id,
            conversation_id,
            page: query.page,
            limit: query.limit,
        })
        .await?;
    Ok(Json(page))
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    state
        .chat_service
        .mark_read(MarkReadRequest {
            requester: user_id,
            conversation_id,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
