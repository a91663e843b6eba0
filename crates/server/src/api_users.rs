use crate::{
    db_error, expired_session_cookie, forbidden, session_cookie, session_token, store_error,
    ApiError, ApiJson, ApiResult, AppState, SessionUser,
};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    Extension, Json,
};
use gamegraph_protocol::{AddImage, CreateUser, Login, LoginResponse, UpdateUser, User};
use std::sync::Arc;

pub(crate) async fn api_create_user(
    State(state): State<Arc<AppState>>,
    ApiJson(input): ApiJson<CreateUser>,
) -> ApiResult<User> {
    tracing::info!(username = %input.username, "creating user");
    let user = state
        .engine
        .create_user(&input)
        .map_err(store_error(StatusCode::FORBIDDEN))?;
    Ok(Json(user))
}

pub(crate) async fn api_login(
    State(state): State<Arc<AppState>>,
    ApiJson(input): ApiJson<Login>,
) -> Result<(HeaderMap, Json<LoginResponse>), ApiError> {
    let user = state
        .engine
        .verify_credentials(&input.username, &input.password)
        .map_err(db_error)?
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                "Invalid username/password".to_string(),
            )
        })?;
    let token = state.engine.create_session(&user.id).map_err(db_error)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        session_cookie(&token, state.secure_cookies),
    );
    tracing::info!(user_id = %user.id, "logged in");
    Ok((
        headers,
        Json(LoginResponse {
            current_user: user.id,
        }),
    ))
}

pub(crate) async fn api_logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<HeaderMap, ApiError> {
    if let Some(token) = session_token(&headers) {
        state.engine.destroy_session(&token).map_err(db_error)?;
    }
    let mut out = HeaderMap::new();
    out.insert(header::SET_COOKIE, expired_session_cookie());
    Ok(out)
}

pub(crate) async fn api_check_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let Some(token) = session_token(&headers) else {
        return Ok(StatusCode::UNAUTHORIZED);
    };
    match state.engine.session_user(&token).map_err(db_error)? {
        Some(_) => Ok(StatusCode::OK),
        None => Ok(StatusCode::UNAUTHORIZED),
    }
}

pub(crate) async fn api_get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<User> {
    tracing::debug!(user_id = %id, "retrieving user");
    Ok(Json(state.engine.get_user(&id).map_err(db_error)?))
}

pub(crate) async fn api_get_user_by_username(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> ApiResult<User> {
    tracing::debug!(%username, "retrieving user by username");
    Ok(Json(
        state
            .engine
            .find_user_by_username(&username)
            .map_err(db_error)?,
    ))
}

fn require_self(me: &SessionUser, id: &str) -> Result<(), ApiError> {
    if me.0 != id {
        return Err(forbidden("Cannot modify another user"));
    }
    Ok(())
}

pub(crate) async fn api_delete_user(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(id): Path<String>,
) -> ApiResult<User> {
    require_self(&me, &id)?;
    Ok(Json(state.engine.delete_user(&id).map_err(db_error)?))
}

pub(crate) async fn api_update_user(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<UpdateUser>,
) -> ApiResult<User> {
    require_self(&me, &id)?;
    let user = state
        .engine
        .update_user(&id, &input)
        .map_err(store_error(StatusCode::FORBIDDEN))?;
    Ok(Json(user))
}

pub(crate) async fn api_add_user_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<AddImage>,
) -> ApiResult<User> {
    Ok(Json(
        state
            .engine
            .push_user_image(&id, &input.image)
            .map_err(db_error)?,
    ))
}
