use crate::games::{game_exists, touch_game};
use crate::{append_event_tx, new_id, non_empty, now_ms, Engine, StoreError, StoreResult};
use gamegraph_protocol::{
    InformationLevel, NewNode, NewSubnode, Node, NodeUpdate, Subnode, SubnodeUpdate, UserId,
    DEFAULT_NODE_NAME,
};
use rusqlite::{Connection, OptionalExtension};

/// Information level a game master starts with on a freshly created node.
pub const GAME_MASTER_INFO_LEVEL: i64 = 1;

fn load_subnodes(conn: &Connection, node_id: &str) -> StoreResult<Vec<Subnode>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, content, info_level FROM subnodes WHERE node_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map([node_id], |row| {
        Ok(Subnode {
            id: row.get(0)?,
            name: row.get(1)?,
            content: row.get(2)?,
            information_level: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn fill_node(conn: &Connection, node: &mut Node) -> StoreResult<()> {
    let mut stmt = conn.prepare(
        "SELECT l.user_id, l.info_level FROM node_info_levels l
         LEFT JOIN game_users g ON g.user_id = l.user_id
           AND g.game_id = (SELECT game_id FROM nodes WHERE id = ?1)
         WHERE l.node_id = ?1 ORDER BY g.joined_at_ms, l.rowid",
    )?;
    node.information_levels = stmt
        .query_map([&node.id], |row| {
            Ok(InformationLevel {
                user_id: row.get(0)?,
                info_level: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt =
        conn.prepare("SELECT user_id FROM node_editors WHERE node_id = ?1 ORDER BY rowid")?;
    node.editors = stmt
        .query_map([&node.id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    node.subnodes = load_subnodes(conn, &node.id)?;
    Ok(())
}

fn node_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get(0)?,
        name: row.get(1)?,
        x: row.get(2)?,
        y: row.get(3)?,
        subnodes: Vec::new(),
        information_levels: Vec::new(),
        editors: Vec::new(),
    })
}

pub(crate) fn load_nodes(conn: &Connection, game_id: &str) -> StoreResult<Vec<Node>> {
    let mut stmt =
        conn.prepare("SELECT id, name, x, y FROM nodes WHERE game_id = ?1 ORDER BY rowid")?;
    let mut nodes = stmt
        .query_map([game_id], node_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for node in &mut nodes {
        fill_node(conn, node)?;
    }
    Ok(nodes)
}

pub(crate) fn load_node(conn: &Connection, game_id: &str, node_id: &str) -> StoreResult<Node> {
    let mut node = conn
        .query_row(
            "SELECT id, name, x, y FROM nodes WHERE id = ?1 AND game_id = ?2",
            (node_id, game_id),
            node_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound("node"))?;
    fill_node(conn, &mut node)?;
    Ok(node)
}

fn load_subnode(conn: &Connection, node_id: &str, subnode_id: &str) -> StoreResult<Subnode> {
    conn.query_row(
        "SELECT id, name, content, info_level FROM subnodes WHERE id = ?1 AND node_id = ?2",
        (subnode_id, node_id),
        |row| {
            Ok(Subnode {
                id: row.get(0)?,
                name: row.get(1)?,
                content: row.get(2)?,
                information_level: row.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or(StoreError::NotFound("subnode"))
}

fn ensure_members(conn: &Connection, game_id: &str, user_ids: &[&UserId]) -> StoreResult<()> {
    for user_id in user_ids {
        if crate::games::member_permission_tx(conn, game_id, user_id)?.is_none() {
            return Err(StoreError::Invalid(format!(
                "user {user_id} is not a player in game {game_id}"
            )));
        }
    }
    Ok(())
}

fn touch_node(conn: &Connection, node_id: &str) -> StoreResult<()> {
    conn.execute(
        "UPDATE nodes SET updated_at_ms = ?2 WHERE id = ?1",
        (node_id, now_ms()),
    )?;
    Ok(())
}

impl Engine {
    pub fn get_node(&self, game_id: &str, node_id: &str) -> StoreResult<Node> {
        let conn = self.open()?;
        load_node(&conn, game_id, node_id)
    }

    /// Creates a node. Every current member gets an information level on it
    /// (game masters start above zero) and `creator` becomes an editor.
    pub fn create_node(&self, game_id: &str, creator: &str, req: &NewNode) -> StoreResult<Node> {
        let name = match &req.name {
            Some(name) => non_empty("name", name)?,
            None => DEFAULT_NODE_NAME.to_string(),
        };
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        game_exists(&tx, game_id)?;

        let id = new_id("node");
        let ts = now_ms();
        tx.execute(
            "INSERT INTO nodes (id, game_id, name, x, y, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            (
                &id,
                game_id,
                &name,
                req.x.unwrap_or(0.0),
                req.y.unwrap_or(0.0),
                ts,
            ),
        )?;
        tx.execute(
            "INSERT INTO node_info_levels (node_id, user_id, info_level)
             SELECT ?1, user_id, CASE WHEN permission = 0 THEN ?3 ELSE 0 END
             FROM game_users WHERE game_id = ?2",
            (&id, game_id, GAME_MASTER_INFO_LEVEL),
        )?;
        tx.execute(
            "INSERT INTO node_editors (node_id, user_id)
             SELECT ?1, user_id FROM game_users WHERE game_id = ?2 AND user_id = ?3",
            (&id, game_id, creator),
        )?;
        touch_game(&tx, game_id)?;
        append_event_tx(
            &tx,
            "node.created",
            Some(&id),
            Some(game_id),
            serde_json::json!({ "game_id": game_id, "id": id, "name": name }),
        )?;
        let node = load_node(&tx, game_id, &id)?;
        tx.commit()?;
        Ok(node)
    }

    /// Partial update. Information levels and editors, when present, replace the stored lists.
    pub fn update_node(&self, game_id: &str, node_id: &str, upd: &NodeUpdate) -> StoreResult<Node> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        load_node(&tx, game_id, node_id)?;

        if let Some(name) = &upd.name {
            let name = non_empty("name", name)?;
            tx.execute("UPDATE nodes SET name = ?2 WHERE id = ?1", (node_id, name))?;
        }
        if let Some(x) = upd.x {
            tx.execute("UPDATE nodes SET x = ?2 WHERE id = ?1", (node_id, x))?;
        }
        if let Some(y) = upd.y {
            tx.execute("UPDATE nodes SET y = ?2 WHERE id = ?1", (node_id, y))?;
        }
        if let Some(levels) = &upd.information_levels {
            let ids: Vec<&UserId> = levels.iter().map(|l| &l.user_id).collect();
            ensure_members(&tx, game_id, &ids)?;
            tx.execute("DELETE FROM node_info_levels WHERE node_id = ?1", [node_id])?;
            for l in levels {
                tx.execute(
                    "INSERT OR REPLACE INTO node_info_levels (node_id, user_id, info_level) VALUES (?1, ?2, ?3)",
                    (node_id, &l.user_id, l.info_level),
                )?;
            }
        }
        if let Some(editors) = &upd.editors {
            let ids: Vec<&UserId> = editors.iter().collect();
            ensure_members(&tx, game_id, &ids)?;
            tx.execute("DELETE FROM node_editors WHERE node_id = ?1", [node_id])?;
            for user_id in editors {
                tx.execute(
                    "INSERT OR IGNORE INTO node_editors (node_id, user_id) VALUES (?1, ?2)",
                    (node_id, user_id),
                )?;
            }
        }

        touch_node(&tx, node_id)?;
        append_event_tx(
            &tx,
            "node.updated",
            Some(node_id),
            Some(game_id),
            serde_json::json!({ "game_id": game_id, "id": node_id }),
        )?;
        let node = load_node(&tx, game_id, node_id)?;
        tx.commit()?;
        Ok(node)
    }

    pub fn delete_node(&self, game_id: &str, node_id: &str) -> StoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let n = tx.execute(
            "DELETE FROM nodes WHERE id = ?1 AND game_id = ?2",
            (node_id, game_id),
        )?;
        if n == 0 {
            return Err(StoreError::NotFound("node"));
        }
        touch_game(&tx, game_id)?;
        append_event_tx(
            &tx,
            "node.deleted",
            Some(node_id),
            Some(game_id),
            serde_json::json!({ "game_id": game_id, "id": node_id }),
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn create_subnode(
        &self,
        game_id: &str,
        node_id: &str,
        req: &NewSubnode,
    ) -> StoreResult<Subnode> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        load_node(&tx, game_id, node_id)?;

        let id = new_id("subnode");
        let ts = now_ms();
        tx.execute(
            "INSERT INTO subnodes (id, node_id, name, content, info_level, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            (
                &id,
                node_id,
                req.name.trim(),
                &req.content,
                req.information_level,
                ts,
            ),
        )?;
        touch_node(&tx, node_id)?;
        append_event_tx(
            &tx,
            "subnode.created",
            Some(&id),
            Some(game_id),
            serde_json::json!({ "game_id": game_id, "node_id": node_id, "id": id }),
        )?;
        let subnode = load_subnode(&tx, node_id, &id)?;
        tx.commit()?;
        Ok(subnode)
    }

    pub fn update_subnode(
        &self,
        game_id: &str,
        node_id: &str,
        subnode_id: &str,
        upd: &SubnodeUpdate,
    ) -> StoreResult<Subnode> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        load_node(&tx, game_id, node_id)?;
        load_subnode(&tx, node_id, subnode_id)?;

        let ts = now_ms();
        if let Some(name) = &upd.name {
            tx.execute(
                "UPDATE subnodes SET name = ?2, updated_at_ms = ?3 WHERE id = ?1",
                (subnode_id, name.trim(), ts),
            )?;
        }
        if let Some(content) = &upd.content {
            tx.execute(
                "UPDATE subnodes SET content = ?2, updated_at_ms = ?3 WHERE id = ?1",
                (subnode_id, content, ts),
            )?;
        }
        if let Some(level) = upd.information_level {
            tx.execute(
                "UPDATE subnodes SET info_level = ?2, updated_at_ms = ?3 WHERE id = ?1",
                (subnode_id, level, ts),
            )?;
        }
        touch_node(&tx, node_id)?;
        append_event_tx(
            &tx,
            "subnode.updated",
            Some(subnode_id),
            Some(game_id),
            serde_json::json!({ "game_id": game_id, "node_id": node_id, "id": subnode_id }),
        )?;
        let subnode = load_subnode(&tx, node_id, subnode_id)?;
        tx.commit()?;
        Ok(subnode)
    }

    pub fn delete_subnode(&self, game_id: &str, node_id: &str, subnode_id: &str) -> StoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        load_node(&tx, game_id, node_id)?;
        let n = tx.execute(
            "DELETE FROM subnodes WHERE id = ?1 AND node_id = ?2",
            (subnode_id, node_id),
        )?;
        if n == 0 {
            return Err(StoreError::NotFound("subnode"));
        }
        touch_node(&tx, node_id)?;
        append_event_tx(
            &tx,
            "subnode.deleted",
            Some(subnode_id),
            Some(game_id),
            serde_json::json!({ "game_id": game_id, "node_id": node_id, "id": subnode_id }),
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::GAME_MASTER_INFO_LEVEL;
    use crate::test_support::*;
    use crate::StoreError;
    use gamegraph_protocol::{
        CreateGame, InformationLevel, NewNode, NewSubnode, NodeUpdate, SubnodeUpdate,
        DEFAULT_NODE_NAME,
    };

    fn setup() -> (crate::Engine, String, String, String) {
        let engine = temp_engine();
        let gm = seed_user(&engine, "gm");
        let p = seed_user(&engine, "p");
        let game = engine
            .create_game(
                &gm.id,
                &CreateGame {
                    title: "Atlas".into(),
                    image: None,
                },
            )
            .unwrap();
        engine.add_player(&game.id, &p.id).unwrap();
        (engine, game.id, gm.id, p.id)
    }

    #[test]
    fn default_node_seeds_levels_and_editor() {
        let (engine, game_id, gm, p) = setup();
        let node = engine
            .create_node(&game_id, &gm, &NewNode::default())
            .unwrap();
        assert_eq!(node.name, DEFAULT_NODE_NAME);
        assert_eq!((node.x, node.y), (0.0, 0.0));
        assert_eq!(node.info_level_for(&gm), Some(GAME_MASTER_INFO_LEVEL));
        assert_eq!(node.info_level_for(&p), Some(0));
        assert_eq!(node.editors, vec![gm]);
    }

    #[test]
    fn update_replaces_levels_and_editors() {
        let (engine, game_id, gm, p) = setup();
        let node = engine
            .create_node(
                &game_id,
                &gm,
                &NewNode {
                    name: Some("Cave".into()),
                    x: Some(4.0),
                    y: Some(-2.5),
                },
            )
            .unwrap();

        let updated = engine
            .update_node(
                &game_id,
                &node.id,
                &NodeUpdate {
                    x: Some(10.0),
                    information_levels: Some(vec![InformationLevel {
                        user_id: p.clone(),
                        info_level: 3,
                    }]),
                    editors: Some(vec![p.clone()]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Cave");
        assert_eq!((updated.x, updated.y), (10.0, -2.5));
        assert_eq!(updated.info_level_for(&p), Some(3));
        assert_eq!(updated.info_level_for(&gm), None);
        assert_eq!(updated.editors, vec![p]);
    }

    #[test]
    fn levels_for_strangers_are_rejected() {
        let (engine, game_id, gm, _p) = setup();
        let outsider = seed_user(&engine, "outsider");
        let node = engine
            .create_node(&game_id, &gm, &NewNode::default())
            .unwrap();
        let err = engine
            .update_node(
                &game_id,
                &node.id,
                &NodeUpdate {
                    editors: Some(vec![outsider.id]),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn nodes_are_scoped_to_their_game() {
        let (engine, game_id, gm, _p) = setup();
        let other = engine
            .create_game(
                &gm,
                &CreateGame {
                    title: "Other".into(),
                    image: None,
                },
            )
            .unwrap();
        let node = engine
            .create_node(&game_id, &gm, &NewNode::default())
            .unwrap();
        assert!(matches!(
            engine.get_node(&other.id, &node.id),
            Err(StoreError::NotFound("node"))
        ));
        assert!(matches!(
            engine.delete_node(&other.id, &node.id),
            Err(StoreError::NotFound("node"))
        ));
        engine.delete_node(&game_id, &node.id).unwrap();
        assert!(engine.get_game(&game_id).unwrap().nodes.is_empty());
    }

    #[test]
    fn subnode_lifecycle() {
        let (engine, game_id, gm, _p) = setup();
        let node = engine
            .create_node(&game_id, &gm, &NewNode::default())
            .unwrap();
        let sub = engine
            .create_subnode(
                &game_id,
                &node.id,
                &NewSubnode {
                    name: "Rumours".into(),
                    content: "The well is dry.".into(),
                    information_level: 2,
                },
            )
            .unwrap();
        assert_eq!(sub.information_level, 2);

        let sub = engine
            .update_subnode(
                &game_id,
                &node.id,
                &sub.id,
                &SubnodeUpdate {
                    content: Some("The well is cursed.".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(sub.name, "Rumours");
        assert_eq!(sub.content, "The well is cursed.");

        let loaded = engine.get_node(&game_id, &node.id).unwrap();
        assert_eq!(loaded.subnodes, vec![sub.clone()]);

        engine.delete_subnode(&game_id, &node.id, &sub.id).unwrap();
        assert!(matches!(
            engine.delete_subnode(&game_id, &node.id, &sub.id),
            Err(StoreError::NotFound("subnode"))
        ));
    }
}
