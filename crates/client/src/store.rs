//! The game slice: state shape, actions and the reducer that applies them.

use gamegraph_protocol::{
    Game, Node, NodeId, Subnode, UserId, UserPermission, UserPermissionRecord,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadingStatus {
    #[default]
    Loading,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameDialog {
    UserAlreadyAdded,
    UserNotFound,
    EditPermissions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DialogStatus {
    pub user_already_added: bool,
    pub user_not_found: bool,
    pub edit_permissions: bool,
}

impl DialogStatus {
    pub fn get(&self, dialog: GameDialog) -> bool {
        match dialog {
            GameDialog::UserAlreadyAdded => self.user_already_added,
            GameDialog::UserNotFound => self.user_not_found,
            GameDialog::EditPermissions => self.edit_permissions,
        }
    }

    fn set(&mut self, dialog: GameDialog, open: bool) {
        let slot = match dialog {
            GameDialog::UserAlreadyAdded => &mut self.user_already_added,
            GameDialog::UserNotFound => &mut self.user_not_found,
            GameDialog::EditPermissions => &mut self.edit_permissions,
        };
        *slot = open;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameState {
    /// `None` until the first successful fetch.
    pub game: Option<Game>,
    pub status: LoadingStatus,
    pub dialog_status: DialogStatus,
    pub active_node: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    GameLoaded(Game),
    AddPlayer(UserPermissionRecord),
    RemovePlayer(UserId),
    UpdateDialogStatus(GameDialog, bool),
    UpdateNode(Node),
    AddNode(Node),
    RemoveNode(NodeId),
    UpdateSubnode(NodeId, Subnode),
    AddSubnode(NodeId, Subnode),
    SetGameTitle(String),
    UpdatePlayerPermission(UserId, UserPermission),
    SetActiveNode(Option<NodeId>),
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Self::GameLoaded(_) => "game/gameLoaded",
            Self::AddPlayer(_) => "game/addPlayer",
            Self::RemovePlayer(_) => "game/removePlayer",
            Self::UpdateDialogStatus(..) => "game/updateDialogStatus",
            Self::UpdateNode(_) => "game/updateNode",
            Self::AddNode(_) => "game/addNode",
            Self::RemoveNode(_) => "game/removeNode",
            Self::UpdateSubnode(..) => "game/updateSubnode",
            Self::AddSubnode(..) => "game/addSubnode",
            Self::SetGameTitle(_) => "game/setGameTitle",
            Self::UpdatePlayerPermission(..) => "game/updatePlayerPermission",
            Self::SetActiveNode(_) => "nodeview/setActiveNode",
        }
    }
}

fn find_node<'a>(game: &'a mut Game, node_id: &str) -> Option<&'a mut Node> {
    game.nodes.iter_mut().find(|n| n.id == node_id)
}

/// Applies one action. Actions that target something absent leave the state untouched.
pub fn reduce(state: &mut GameState, action: Action) {
    let name = action.name();
    match action {
        Action::GameLoaded(game) => {
            if let Some(active) = &state.active_node {
                if game.node(active).is_none() {
                    state.active_node = None;
                }
            }
            state.game = Some(game);
            state.status = LoadingStatus::Idle;
            return;
        }
        Action::UpdateDialogStatus(dialog, open) => {
            state.dialog_status.set(dialog, open);
            return;
        }
        Action::SetActiveNode(node_id) => {
            state.active_node = node_id;
            return;
        }
        _ => {}
    }

    let Some(game) = state.game.as_mut() else {
        tracing::warn!(action = name, "no game loaded; action ignored");
        return;
    };

    let applied = match action {
        Action::AddPlayer(record) => {
            game.users.retain(|r| r.user_id != record.user_id);
            game.users.push(record);
            true
        }
        Action::RemovePlayer(user_id) => {
            game.users.retain(|r| r.user_id != user_id);
            true
        }
        Action::UpdateNode(node) => match find_node(game, &node.id) {
            Some(slot) => {
                *slot = node;
                true
            }
            None => false,
        },
        Action::AddNode(node) => {
            if game.node(&node.id).is_none() {
                game.nodes.push(node);
            }
            true
        }
        Action::RemoveNode(node_id) => {
            let before = game.nodes.len();
            game.nodes.retain(|n| n.id != node_id);
            if state.active_node.as_deref() == Some(node_id.as_str()) {
                state.active_node = None;
            }
            before != game.nodes.len()
        }
        Action::UpdateSubnode(node_id, subnode) => match find_node(game, &node_id) {
            Some(node) => match node.subnodes.iter_mut().find(|s| s.id == subnode.id) {
                Some(slot) => {
                    *slot = subnode;
                    true
                }
                None => false,
            },
            None => false,
        },
        Action::AddSubnode(node_id, subnode) => match find_node(game, &node_id) {
            Some(node) => {
                node.subnodes.push(subnode);
                true
            }
            None => false,
        },
        Action::SetGameTitle(title) => {
            game.title = title;
            true
        }
        Action::UpdatePlayerPermission(user_id, permission) => {
            match game.users.iter_mut().find(|r| r.user_id == user_id) {
                Some(record) => {
                    record.permission = permission;
                    true
                }
                None => false,
            }
        }
        Action::GameLoaded(_) | Action::UpdateDialogStatus(..) | Action::SetActiveNode(_) => true,
    };

    if !applied {
        tracing::warn!(action = name, "target not found; action ignored");
    }
}

/// Shared handle to the game state. Clones point at the same state.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<GameState>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&self, action: Action) {
        tracing::trace!(action = action.name(), "dispatch");
        reduce(&mut self.inner.lock(), action);
    }

    pub fn snapshot(&self) -> GameState {
        self.inner.lock().clone()
    }

    /// Runs `f` against the current state without cloning it.
    pub fn select<R>(&self, f: impl FnOnce(&GameState) -> R) -> R {
        f(&self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamegraph_protocol::InformationLevel;

    fn node(id: &str, name: &str) -> Node {
        Node {
            id: id.to_string(),
            name: name.to_string(),
            x: 0.0,
            y: 0.0,
            subnodes: Vec::new(),
            information_levels: Vec::new(),
            editors: Vec::new(),
        }
    }

    fn loaded() -> GameState {
        let mut state = GameState::default();
        reduce(
            &mut state,
            Action::GameLoaded(Game {
                id: "g1".into(),
                title: "Keep".into(),
                image: None,
                nodes: vec![node("n1", "Gate"), node("n2", "Tower")],
                users: vec![UserPermissionRecord {
                    user_id: "gm".into(),
                    permission: UserPermission::GameMaster,
                }],
            }),
        );
        state
    }

    #[test]
    fn initial_state_is_loading_with_closed_dialogs() {
        let state = GameState::default();
        assert_eq!(state.status, LoadingStatus::Loading);
        assert!(state.game.is_none());
        assert_eq!(state.dialog_status, DialogStatus::default());
    }

    #[test]
    fn game_loaded_sets_idle() {
        let state = loaded();
        assert_eq!(state.status, LoadingStatus::Idle);
        assert_eq!(state.game.as_ref().unwrap().nodes.len(), 2);
    }

    #[test]
    fn actions_before_load_are_ignored() {
        let mut state = GameState::default();
        reduce(&mut state, Action::SetGameTitle("x".into()));
        reduce(&mut state, Action::AddNode(node("n1", "Gate")));
        assert_eq!(state, GameState::default());
    }

    #[test]
    fn players_add_remove_and_promote() {
        let mut state = loaded();
        let rec = UserPermissionRecord {
            user_id: "p".into(),
            permission: UserPermission::Player,
        };
        reduce(&mut state, Action::AddPlayer(rec.clone()));
        reduce(&mut state, Action::AddPlayer(rec));
        assert_eq!(state.game.as_ref().unwrap().users.len(), 2);

        reduce(
            &mut state,
            Action::UpdatePlayerPermission("p".into(), UserPermission::GameMaster),
        );
        assert_eq!(
            state.game.as_ref().unwrap().permission_of("p"),
            Some(UserPermission::GameMaster)
        );

        reduce(&mut state, Action::RemovePlayer("p".into()));
        assert_eq!(state.game.as_ref().unwrap().users.len(), 1);
    }

    #[test]
    fn update_node_replaces_in_place_and_ignores_unknown_ids() {
        let mut state = loaded();
        let mut n = node("n2", "Keep Tower");
        n.information_levels.push(InformationLevel {
            user_id: "gm".into(),
            info_level: 1,
        });
        reduce(&mut state, Action::UpdateNode(n.clone()));
        let game = state.game.as_ref().unwrap();
        assert_eq!(game.nodes[1], n);
        assert_eq!(game.nodes[0].name, "Gate");

        let before = state.clone();
        reduce(&mut state, Action::UpdateNode(node("ghost", "Ghost")));
        assert_eq!(state, before);
    }

    #[test]
    fn subnodes_are_added_and_replaced() {
        let mut state = loaded();
        let sub = Subnode {
            id: "s1".into(),
            name: "Notes".into(),
            content: "old".into(),
            information_level: 0,
        };
        reduce(&mut state, Action::AddSubnode("n1".into(), sub.clone()));
        reduce(
            &mut state,
            Action::UpdateSubnode(
                "n1".into(),
                Subnode {
                    content: "new".into(),
                    ..sub
                },
            ),
        );
        let n1 = state.game.as_ref().unwrap().node("n1").unwrap();
        assert_eq!(n1.subnodes.len(), 1);
        assert_eq!(n1.subnodes[0].content, "new");
    }

    #[test]
    fn removing_the_active_node_clears_selection() {
        let mut state = loaded();
        reduce(&mut state, Action::SetActiveNode(Some("n1".into())));
        reduce(&mut state, Action::RemoveNode("n1".into()));
        assert_eq!(state.active_node, None);
        assert_eq!(state.game.as_ref().unwrap().nodes.len(), 1);
    }

    #[test]
    fn dialogs_toggle_independently() {
        let mut state = GameState::default();
        reduce(
            &mut state,
            Action::UpdateDialogStatus(GameDialog::UserNotFound, true),
        );
        assert!(state.dialog_status.get(GameDialog::UserNotFound));
        assert!(!state.dialog_status.get(GameDialog::UserAlreadyAdded));
        reduce(
            &mut state,
            Action::UpdateDialogStatus(GameDialog::UserNotFound, false),
        );
        assert!(!state.dialog_status.user_not_found);
    }

    #[test]
    fn store_clones_share_state() {
        let store = Store::new();
        let other = store.clone();
        other.dispatch(Action::UpdateDialogStatus(GameDialog::EditPermissions, true));
        assert!(store.select(|s| s.dialog_status.edit_permissions));
        assert!(store.snapshot().dialog_status.edit_permissions);
    }
}
