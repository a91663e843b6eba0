//! Derived views over [`GameState`]. All of these are pure and cheap to recompute.

use crate::store::GameState;
use gamegraph_protocol::{Game, Node, Subnode, UserId};

/// A node is visible to its editors and to anyone holding an information level above zero.
pub fn is_node_visible(node: &Node, user_id: &str) -> bool {
    node.is_editor(user_id) || node.info_level_for(user_id).unwrap_or(0) > 0
}

pub fn visible_nodes<'a>(state: &'a GameState, user_id: &str) -> Vec<&'a Node> {
    state
        .game
        .iter()
        .flat_map(|g| g.nodes.iter())
        .filter(|n| is_node_visible(n, user_id))
        .collect()
}

/// Subnodes whose threshold the user meets on `node`. Editors see everything.
pub fn visible_subnodes<'a>(node: &'a Node, user_id: &str) -> Vec<&'a Subnode> {
    if node.is_editor(user_id) {
        return node.subnodes.iter().collect();
    }
    let level = node.info_level_for(user_id).unwrap_or(0);
    node.subnodes
        .iter()
        .filter(|s| s.information_level <= level)
        .collect()
}

pub fn active_node(state: &GameState) -> Option<&Node> {
    let id = state.active_node.as_deref()?;
    state.game.as_ref()?.node(id)
}

pub fn user_ids(state: &GameState) -> Vec<UserId> {
    state
        .game
        .iter()
        .flat_map(|g| g.users.iter())
        .map(|r| r.user_id.clone())
        .collect()
}

pub fn game_master_ids(state: &GameState) -> Vec<UserId> {
    state
        .game
        .iter()
        .flat_map(|g| g.users.iter())
        .filter(|r| r.permission.is_game_master())
        .map(|r| r.user_id.clone())
        .collect()
}

pub fn is_game_master(state: &GameState, user_id: &str) -> bool {
    state
        .game
        .as_ref()
        .and_then(|g: &Game| g.permission_of(user_id))
        .is_some_and(|p| p.is_game_master())
}

/// Nodes ordered by name, ties broken by id so the order is stable.
pub fn sorted_nodes(state: &GameState) -> Vec<&Node> {
    let mut nodes: Vec<&Node> = state.game.iter().flat_map(|g| g.nodes.iter()).collect();
    nodes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    nodes
}
