use crate::{
    db_error, forbidden, store_error, ApiError, ApiJson, ApiResult, AppState, SessionUser,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use gamegraph_protocol::{
    CreateGame, Game, PermissionUpdate, UpdateGame, UserPermission, UserPermissionRecord,
};
use std::sync::Arc;

/// Permission of the caller in `game_id`; 403 when they are not a player.
pub(crate) fn require_member(
    state: &AppState,
    game_id: &str,
    me: &SessionUser,
) -> Result<UserPermission, ApiError> {
    state
        .engine
        .member_permission(game_id, &me.0)
        .map_err(db_error)?
        .ok_or_else(|| forbidden("Not a player in this game"))
}

pub(crate) fn require_game_master(
    state: &AppState,
    game_id: &str,
    me: &SessionUser,
) -> Result<(), ApiError> {
    if !require_member(state, game_id, me)?.is_game_master() {
        return Err(forbidden("Only game masters may do this"));
    }
    Ok(())
}

pub(crate) async fn api_create_game(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    ApiJson(input): ApiJson<CreateGame>,
) -> ApiResult<Game> {
    Ok(Json(
        state.engine.create_game(&me.0, &input).map_err(db_error)?,
    ))
}

pub(crate) async fn api_get_game(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(id): Path<String>,
) -> ApiResult<Game> {
    require_member(&state, &id, &me)?;
    Ok(Json(state.engine.get_game(&id).map_err(db_error)?))
}

pub(crate) async fn api_update_game(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<UpdateGame>,
) -> ApiResult<Game> {
    require_game_master(&state, &id, &me)?;
    Ok(Json(
        state.engine.update_game(&id, &input).map_err(db_error)?,
    ))
}

pub(crate) async fn api_delete_game(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_game_master(&state, &id, &me)?;
    state.engine.delete_game(&id).map_err(db_error)?;
    Ok(StatusCode::OK)
}

pub(crate) async fn api_add_player(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path((game_id, user_id)): Path<(String, String)>,
) -> ApiResult<UserPermissionRecord> {
    require_game_master(&state, &game_id, &me)?;
    let record = state
        .engine
        .add_player(&game_id, &user_id)
        .map_err(store_error(StatusCode::UNPROCESSABLE_ENTITY))?;
    tracing::info!(%game_id, %user_id, "player added");
    Ok(Json(record))
}

/// Game masters may remove anyone; players may only leave.
pub(crate) async fn api_remove_player(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path((game_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    if me.0 != user_id {
        require_game_master(&state, &game_id, &me)?;
    }
    state
        .engine
        .remove_player(&game_id, &user_id)
        .map_err(store_error(StatusCode::UNPROCESSABLE_ENTITY))?;
    tracing::info!(%game_id, %user_id, "player removed");
    Ok(StatusCode::OK)
}

pub(crate) async fn api_update_player_permission(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path((game_id, user_id)): Path<(String, String)>,
    ApiJson(input): ApiJson<PermissionUpdate>,
) -> ApiResult<UserPermissionRecord> {
    require_game_master(&state, &game_id, &me)?;
    let record = state
        .engine
        .set_player_permission(&game_id, &user_id, input.permission)
        .map_err(store_error(StatusCode::UNPROCESSABLE_ENTITY))?;
    Ok(Json(record))
}
