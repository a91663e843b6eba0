//! Async action creators. Each one performs a request, then dispatches plain actions on success.
//! Failures are logged and otherwise swallowed; nothing here retries.

use crate::layout::NodeLayout;
use crate::selectors;
use crate::store::{Action, GameDialog, Store};
use crate::transport::{ApiResponse, Transport};
use axum::http::{Method, StatusCode};
use gamegraph_protocol::{
    paths, CreateUser, Game, GameId, Login, LoginResponse, NewNode, NewSubnode, Node, NodeId,
    NodeUpdate, PermissionUpdate, Subnode, SubnodeUpdate, UpdateGame, User, UserId,
    UserPermission, UserPermissionRecord,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct GameClient {
    transport: Arc<dyn Transport>,
    store: Store,
    current_user: Arc<Mutex<Option<UserId>>>,
}

fn body_of<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::error!(error = %e, "could not encode request body");
            None
        }
    }
}

impl GameClient {
    pub fn new(transport: Arc<dyn Transport>, store: Store) -> Self {
        Self {
            transport,
            store,
            current_user: Arc::new(Mutex::new(None)),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.current_user.lock().clone()
    }

    /// For sessions restored from a cookie set elsewhere.
    pub fn set_current_user(&self, user_id: Option<UserId>) {
        *self.current_user.lock() = user_id;
    }

    async fn call(
        &self,
        what: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Option<ApiResponse> {
        match self.transport.send(method, path, body).await {
            Ok(resp) => Some(resp),
            Err(e) => {
                tracing::error!(error = %e, path, "could not {what}");
                None
            }
        }
    }

    /// The decoded body of a 200 response; anything else is logged and dropped.
    async fn call_ok<T: DeserializeOwned>(
        &self,
        what: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Option<T> {
        let resp = self.call(what, method, path, body).await?;
        if !resp.is_ok() {
            tracing::warn!(status = %resp.status, body = %resp.text(), path, "could not {what}");
            return None;
        }
        match resp.json() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!(error = %e, path, "could not {what}");
                None
            }
        }
    }

    pub async fn fetch_game(&self, game_id: &str) {
        tracing::debug!(%game_id, "fetching game");
        if let Some(game) = self
            .call_ok::<Game>("fetch game", Method::GET, &paths::game(game_id), None)
            .await
        {
            self.store.dispatch(Action::GameLoaded(game));
        }
    }

    /// Adds `user_id` as a player. 404 and 422 open the matching dialog instead.
    pub async fn add_player(&self, game_id: &str, user_id: &str) {
        let Some(resp) = self
            .call(
                "add player",
                Method::POST,
                &paths::game_user(game_id, user_id),
                None,
            )
            .await
        else {
            return;
        };
        match resp.status {
            StatusCode::OK => match resp.json::<UserPermissionRecord>() {
                Ok(record) => self.store.dispatch(Action::AddPlayer(record)),
                Err(e) => tracing::error!(error = %e, "could not decode player record"),
            },
            StatusCode::NOT_FOUND => self
                .store
                .dispatch(Action::UpdateDialogStatus(GameDialog::UserNotFound, true)),
            StatusCode::UNPROCESSABLE_ENTITY => self
                .store
                .dispatch(Action::UpdateDialogStatus(GameDialog::UserAlreadyAdded, true)),
            status => {
                tracing::warn!(%status, body = %resp.text(), %user_id, "could not add player")
            }
        }
    }

    pub async fn add_player_by_username(&self, game_id: &str, username: &str) {
        match self.find_user_by_username(username).await {
            Some(user) => self.add_player(game_id, &user.id).await,
            None => self
                .store
                .dispatch(Action::UpdateDialogStatus(GameDialog::UserNotFound, true)),
        }
    }

    pub async fn remove_player(&self, game_id: &str, player_id: &str) {
        let Some(resp) = self
            .call(
                "remove player",
                Method::DELETE,
                &paths::game_user(game_id, player_id),
                None,
            )
            .await
        else {
            return;
        };
        if resp.is_ok() {
            self.store.dispatch(Action::RemovePlayer(player_id.to_string()));
        } else {
            tracing::warn!(status = %resp.status, %player_id, "could not remove player from the game");
        }
    }

    /// Applies `node` locally right away, then replaces it with the server's copy once saved.
    pub async fn update_node(&self, game_id: &str, node: Node) {
        self.store.dispatch(Action::UpdateNode(node.clone()));
        let body = body_of(&NodeUpdate::from(&node));
        if let Some(saved) = self
            .call_ok::<Node>(
                "update node",
                Method::PATCH,
                &paths::node(game_id, &node.id),
                body,
            )
            .await
        {
            self.store.dispatch(Action::UpdateNode(saved));
        }
    }

    /// Creates a node with server defaults. Players are shown the edit-permissions dialog instead.
    pub async fn add_default_node(&self, game_id: &str) {
        let is_gm = self
            .current_user()
            .is_some_and(|me| self.store.select(|s| selectors::is_game_master(s, &me)));
        if !is_gm {
            self.store
                .dispatch(Action::UpdateDialogStatus(GameDialog::EditPermissions, true));
            return;
        }
        if let Some(node) = self
            .call_ok::<Node>(
                "add node",
                Method::POST,
                &paths::nodes(game_id),
                body_of(&NewNode::default()),
            )
            .await
        {
            self.store.dispatch(Action::AddNode(node));
        }
    }

    pub async fn remove_node(&self, game_id: &str, node_id: &str) {
        let Some(resp) = self
            .call(
                "remove node",
                Method::DELETE,
                &paths::node(game_id, node_id),
                None,
            )
            .await
        else {
            return;
        };
        if resp.is_ok() {
            self.store.dispatch(Action::RemoveNode(node_id.to_string()));
        } else {
            tracing::warn!(status = %resp.status, %node_id, "could not remove node");
        }
    }

    pub async fn update_subnode(&self, game_id: &str, node_id: &str, subnode: Subnode) {
        if let Some(saved) = self
            .call_ok::<Subnode>(
                "update subnode",
                Method::PATCH,
                &paths::subnode(game_id, node_id, &subnode.id),
                body_of(&SubnodeUpdate::from(&subnode)),
            )
            .await
        {
            self.store
                .dispatch(Action::UpdateSubnode(node_id.to_string(), saved));
        }
    }

    pub async fn add_subnode(&self, game_id: &str, node_id: &str, subnode: NewSubnode) {
        if let Some(created) = self
            .call_ok::<Subnode>(
                "add subnode",
                Method::POST,
                &paths::subnodes(game_id, node_id),
                body_of(&subnode),
            )
            .await
        {
            self.store
                .dispatch(Action::AddSubnode(node_id.to_string(), created));
        }
    }

    pub async fn set_game_title(&self, game_id: &str, title: &str) {
        let body = body_of(&UpdateGame {
            title: Some(title.to_string()),
            image: None,
        });
        if self
            .call_ok::<Game>("set game title", Method::PATCH, &paths::game(game_id), body)
            .await
            .is_some()
        {
            self.store.dispatch(Action::SetGameTitle(title.to_string()));
        }
    }

    pub async fn update_player_permission(
        &self,
        game_id: &str,
        user_id: &str,
        permission: UserPermission,
    ) {
        if let Some(record) = self
            .call_ok::<UserPermissionRecord>(
                "update player permission",
                Method::PATCH,
                &paths::game_user(game_id, user_id),
                body_of(&PermissionUpdate { permission }),
            )
            .await
        {
            self.store
                .dispatch(Action::UpdatePlayerPermission(record.user_id, record.permission));
        }
    }

    /// Saves every node of the loaded game with its laid-out position, one request per node.
    /// The requests run independently; await the handles only if you need to know they finished.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, like `tokio::spawn`.
    pub fn update_all_nodes(&self, game_id: &GameId, layout: &NodeLayout) -> Vec<JoinHandle<()>> {
        let nodes: Vec<Node> = self
            .store
            .select(|s| s.game.as_ref().map(|g| g.nodes.clone()))
            .unwrap_or_default();
        nodes
            .into_iter()
            .map(|mut node| {
                layout.apply_to(&mut node);
                let client = self.clone();
                let game_id = game_id.clone();
                tokio::spawn(async move { client.update_node(&game_id, node).await })
            })
            .collect()
    }

    pub async fn register(&self, input: &CreateUser) -> Option<User> {
        self.call_ok("register", Method::POST, paths::USER, body_of(input))
            .await
    }

    /// Logs in and remembers the returned user id as the current user.
    pub async fn login(&self, username: &str, password: &str) -> Option<UserId> {
        let body = body_of(&Login {
            username: username.to_string(),
            password: password.to_string(),
        });
        let resp: LoginResponse = self
            .call_ok("log in", Method::POST, paths::USER_LOGIN, body)
            .await?;
        self.set_current_user(Some(resp.current_user.clone()));
        Some(resp.current_user)
    }

    pub async fn logout(&self) {
        self.call("log out", Method::GET, paths::USER_LOGOUT, None)
            .await;
        self.set_current_user(None);
    }

    pub async fn check_session(&self) -> bool {
        self.call(
            "check session",
            Method::GET,
            paths::USER_CHECK_SESSION,
            None,
        )
        .await
        .is_some_and(|r| r.is_ok())
    }

    pub async fn find_user_by_username(&self, username: &str) -> Option<User> {
        self.call_ok(
            "find user",
            Method::GET,
            &paths::user_by_username(username),
            None,
        )
        .await
    }

    /// The active node id, if it still names a node of the loaded game.
    pub fn active_node_id(&self) -> Option<NodeId> {
        self.store
            .select(|s| selectors::active_node(s).map(|n| n.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Bytes;

    /// Answers every request with the same canned status and body.
    struct Canned(StatusCode, &'static str);

    #[async_trait]
    impl Transport for Canned {
        async fn send(&self, _: Method, _: &str, _: Option<Value>) -> anyhow::Result<ApiResponse> {
            Ok(ApiResponse {
                status: self.0,
                body: Bytes::from_static(self.1.as_bytes()),
            })
        }
    }

    struct Offline;

    #[async_trait]
    impl Transport for Offline {
        async fn send(&self, _: Method, _: &str, _: Option<Value>) -> anyhow::Result<ApiResponse> {
            anyhow::bail!("connection refused")
        }
    }

    fn client(t: impl Transport + 'static) -> GameClient {
        GameClient::new(Arc::new(t), Store::new())
    }

    #[tokio::test]
    async fn add_player_status_codes_open_dialogs() {
        let c = client(Canned(StatusCode::NOT_FOUND, "User not found"));
        c.add_player("g", "u").await;
        assert!(c.store().snapshot().dialog_status.user_not_found);

        let c = client(Canned(StatusCode::UNPROCESSABLE_ENTITY, ""));
        c.add_player("g", "u").await;
        let s = c.store().snapshot();
        assert!(s.dialog_status.user_already_added);
        assert!(!s.dialog_status.user_not_found);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_state_loading() {
        let c = client(Canned(StatusCode::FORBIDDEN, "Not a player in this game"));
        c.fetch_game("g").await;
        assert!(c.store().snapshot().game.is_none());

        let c = client(Offline);
        c.fetch_game("g").await;
        assert!(!c.check_session().await);
        assert!(c.login("a", "b").await.is_none());
        assert!(c.current_user().is_none());
    }

    #[tokio::test]
    async fn players_cannot_add_nodes() {
        let c = client(Canned(StatusCode::OK, "{}"));
        c.add_default_node("g").await;
        assert!(c.store().snapshot().dialog_status.edit_permissions);
    }

    #[tokio::test]
    async fn fetch_game_dispatches_loaded_game() {
        let c = client(Canned(
            StatusCode::OK,
            r#"{"_id":"g","title":"Keep","nodes":[],"users":[{"userId":"u","permission":0}]}"#,
        ));
        c.fetch_game("g").await;
        let s = c.store().snapshot();
        assert_eq!(s.game.as_ref().map(|g| g.title.as_str()), Some("Keep"));
        assert!(selectors::is_game_master(&s, "u"));
    }
}
