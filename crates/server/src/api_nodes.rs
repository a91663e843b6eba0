use crate::api_games::{require_game_master, require_member};
use crate::{
    db_error, forbidden, json_or_default, ApiError, ApiJson, ApiResult, AppState, SessionUser,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use gamegraph_protocol::{NewNode, NewSubnode, Node, NodeUpdate, Subnode, SubnodeUpdate};
use std::sync::Arc;

/// Game masters and the node's editors may change it.
fn require_node_editor(
    state: &AppState,
    game_id: &str,
    node_id: &str,
    me: &SessionUser,
) -> Result<(), ApiError> {
    if require_member(state, game_id, me)?.is_game_master() {
        return Ok(());
    }
    let node = state.engine.get_node(game_id, node_id).map_err(db_error)?;
    if !node.is_editor(&me.0) {
        return Err(forbidden("Not an editor of this node"));
    }
    Ok(())
}

pub(crate) async fn api_create_node(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(game_id): Path<String>,
    body: Bytes,
) -> ApiResult<Node> {
    require_game_master(&state, &game_id, &me)?;
    let input: NewNode = json_or_default(&body)?;
    Ok(Json(
        state
            .engine
            .create_node(&game_id, &me.0, &input)
            .map_err(db_error)?,
    ))
}

pub(crate) async fn api_update_node(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path((game_id, node_id)): Path<(String, String)>,
    ApiJson(input): ApiJson<NodeUpdate>,
) -> ApiResult<Node> {
    require_node_editor(&state, &game_id, &node_id, &me)?;
    Ok(Json(
        state
            .engine
            .update_node(&game_id, &node_id, &input)
            .map_err(db_error)?,
    ))
}

pub(crate) async fn api_delete_node(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path((game_id, node_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    require_game_master(&state, &game_id, &me)?;
    state
        .engine
        .delete_node(&game_id, &node_id)
        .map_err(db_error)?;
    Ok(StatusCode::OK)
}

pub(crate) async fn api_create_subnode(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path((game_id, node_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Subnode> {
    require_node_editor(&state, &game_id, &node_id, &me)?;
    let input: NewSubnode = json_or_default(&body)?;
    Ok(Json(
        state
            .engine
            .create_subnode(&game_id, &node_id, &input)
            .map_err(db_error)?,
    ))
}

pub(crate) async fn api_update_subnode(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path((game_id, node_id, subnode_id)): Path<(String, String, String)>,
    ApiJson(input): ApiJson<SubnodeUpdate>,
) -> ApiResult<Subnode> {
    require_node_editor(&state, &game_id, &node_id, &me)?;
    Ok(Json(
        state
            .engine
            .update_subnode(&game_id, &node_id, &subnode_id, &input)
            .map_err(db_error)?,
    ))
}

pub(crate) async fn api_delete_subnode(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path((game_id, node_id, subnode_id)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    require_node_editor(&state, &game_id, &node_id, &me)?;
    state
        .engine
        .delete_subnode(&game_id, &node_id, &subnode_id)
        .map_err(db_error)?;
    Ok(StatusCode::OK)
}
