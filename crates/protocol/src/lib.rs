use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type GameId = String;
pub type NodeId = String;
pub type SubnodeId = String;

/// Administrative rank of a player inside a game. Lower ranks carry more authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum UserPermission {
    GameMaster,
    Player,
}

impl UserPermission {
    pub fn rank(self) -> i64 {
        match self {
            Self::GameMaster => 0,
            Self::Player => 1,
        }
    }

    pub fn is_game_master(self) -> bool {
        matches!(self, Self::GameMaster)
    }
}

impl Default for UserPermission {
    fn default() -> Self {
        Self::Player
    }
}

impl From<UserPermission> for i64 {
    fn from(p: UserPermission) -> Self {
        p.rank()
    }
}

impl TryFrom<i64> for UserPermission {
    type Error = String;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::GameMaster),
            1 => Ok(Self::Player),
            other => Err(format!("unknown permission rank {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPermissionRecord {
    pub user_id: UserId,
    pub permission: UserPermission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InformationLevel {
    pub user_id: UserId,
    pub info_level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnode {
    #[serde(rename = "_id")]
    pub id: SubnodeId,
    pub name: String,
    #[serde(default)]
    pub content: String,
    /// Minimum information level a viewer needs on the parent node to read this subnode.
    #[serde(default)]
    pub information_level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(rename = "_id")]
    pub id: NodeId,
    pub name: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub subnodes: Vec<Subnode>,
    #[serde(default)]
    pub information_levels: Vec<InformationLevel>,
    #[serde(default)]
    pub editors: Vec<UserId>,
}

impl Node {
    pub fn info_level_for(&self, user_id: &str) -> Option<i64> {
        self.information_levels
            .iter()
            .find(|l| l.user_id == user_id)
            .map(|l| l.info_level)
    }

    pub fn is_editor(&self, user_id: &str) -> bool {
        self.editors.iter().any(|e| e == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    #[serde(rename = "_id")]
    pub id: GameId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub users: Vec<UserPermissionRecord>,
}

impl Game {
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn permission_of(&self, user_id: &str) -> Option<UserPermission> {
        self.users
            .iter()
            .find(|r| r.user_id == user_id)
            .map(|r| r.permission)
    }
}

/// Public view of an account. The credential hash never leaves the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub games: Vec<GameId>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub password: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Login {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub current_user: UserId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddImage {
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGame {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateGame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PermissionUpdate {
    pub permission: UserPermission,
}

pub const DEFAULT_NODE_NAME: &str = "New node";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

/// Partial node update. A full `Node` body deserializes into this too; its id and subnodes are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub information_levels: Option<Vec<InformationLevel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editors: Option<Vec<UserId>>,
}

impl From<&Node> for NodeUpdate {
    fn from(node: &Node) -> Self {
        Self {
            name: Some(node.name.clone()),
            x: Some(node.x),
            y: Some(node.y),
            information_levels: Some(node.information_levels.clone()),
            editors: Some(node.editors.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubnode {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub information_level: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnodeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub information_level: Option<i64>,
}

impl From<&Subnode> for SubnodeUpdate {
    fn from(s: &Subnode) -> Self {
        Self {
            name: Some(s.name.clone()),
            content: Some(s.content.clone()),
            information_level: Some(s.information_level),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub ok: bool,
    pub rev: i64,
}

/// Request paths relative to the API prefix. Every id or name is percent-encoded as one
/// path segment.
pub mod paths {
    use percent_encoding::{utf8_percent_encode, AsciiSet, PercentEncode, NON_ALPHANUMERIC};

    pub const USER: &str = "/user";
    pub const USER_LOGIN: &str = "/user/login";
    pub const USER_LOGOUT: &str = "/user/logout";
    pub const USER_CHECK_SESSION: &str = "/user/check-session";
    pub const GAME: &str = "/game";

    // RFC 3986 unreserved characters stay as they are.
    const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
        .remove(b'-')
        .remove(b'_')
        .remove(b'.')
        .remove(b'~');

    fn seg(s: &str) -> PercentEncode<'_> {
        utf8_percent_encode(s, SEGMENT)
    }

    pub fn user(id: &str) -> String {
        format!("/user/{}", seg(id))
    }

    pub fn user_by_username(username: &str) -> String {
        format!("/user/username/{}", seg(username))
    }

    pub fn user_images(id: &str) -> String {
        format!("/user/{}/images", seg(id))
    }

    pub fn game(id: &str) -> String {
        format!("/game/{}", seg(id))
    }

    pub fn game_user(game_id: &str, user_id: &str) -> String {
        format!("/game/{}/user/{}", seg(game_id), seg(user_id))
    }

    pub fn nodes(game_id: &str) -> String {
        format!("/node/{}", seg(game_id))
    }

    pub fn node(game_id: &str, node_id: &str) -> String {
        format!("/node/{}/{}", seg(game_id), seg(node_id))
    }

    pub fn subnodes(game_id: &str, node_id: &str) -> String {
        format!("/subnode/{}/{}", seg(game_id), seg(node_id))
    }

    pub fn subnode(game_id: &str, node_id: &str, subnode_id: &str) -> String {
        format!(
            "/subnode/{}/{}/{}",
            seg(game_id),
            seg(node_id),
            seg(subnode_id)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_wire_format_uses_mongo_style_ids() {
        let raw = r#"{
            "_id": "node-1",
            "name": "Tavern",
            "x": 10.5,
            "y": -3.0,
            "informationLevels": [{ "userId": "u1", "infoLevel": 2 }],
            "editors": ["u2"]
        }"#;
        let node: Node = serde_json::from_str(raw).unwrap();
        assert_eq!(node.id, "node-1");
        assert!(node.subnodes.is_empty());
        assert_eq!(node.info_level_for("u1"), Some(2));
        assert_eq!(node.info_level_for("u2"), None);
        assert!(node.is_editor("u2"));
    }

    #[test]
    fn permission_is_an_integer_rank() {
        let rec = UserPermissionRecord {
            user_id: "u1".to_string(),
            permission: UserPermission::GameMaster,
        };
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v, serde_json::json!({ "userId": "u1", "permission": 0 }));
        assert!(serde_json::from_str::<PermissionUpdate>(r#"{"permission":7}"#).is_err());
    }

    #[test]
    fn full_node_body_is_a_valid_update() {
        let raw = r#"{"_id":"n","name":"A","x":1,"y":2,"subnodes":[{"_id":"s","name":"t"}]}"#;
        let upd: NodeUpdate = serde_json::from_str(raw).unwrap();
        assert_eq!(upd.name.as_deref(), Some("A"));
        assert_eq!(upd.x, Some(1.0));
        assert!(upd.information_levels.is_none());
    }

    #[test]
    fn paths_encode_each_segment() {
        assert_eq!(paths::game("game-1a_b"), "/game/game-1a_b");
        assert_eq!(
            paths::user_by_username("Ada Lovelace"),
            "/user/username/Ada%20Lovelace"
        );
        assert_eq!(paths::user_by_username("a/b?c#d"), "/user/username/a%2Fb%3Fc%23d");
        assert_eq!(
            paths::game_user("g 1", "Zoë"),
            "/game/g%201/user/Zo%C3%AB"
        );
    }
}
