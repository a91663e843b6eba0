use crate::nodes::load_nodes;
use crate::{append_event_tx, new_id, non_empty, now_ms, Engine, StoreError, StoreResult};
use gamegraph_protocol::{
    CreateGame, Game, UpdateGame, UserPermission, UserPermissionRecord,
};
use rusqlite::{Connection, OptionalExtension};

pub(crate) fn permission_from_sql(idx: usize, v: i64) -> rusqlite::Result<UserPermission> {
    UserPermission::try_from(v).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Integer, e.into())
    })
}

pub(crate) fn load_members(conn: &Connection, game_id: &str) -> StoreResult<Vec<UserPermissionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, permission FROM game_users WHERE game_id = ?1 ORDER BY joined_at_ms, rowid",
    )?;
    let rows = stmt.query_map([game_id], |row| {
        Ok(UserPermissionRecord {
            user_id: row.get(0)?,
            permission: permission_from_sql(1, row.get(1)?)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn member_permission_tx(
    conn: &Connection,
    game_id: &str,
    user_id: &str,
) -> StoreResult<Option<UserPermission>> {
    let v: Option<i64> = conn
        .query_row(
            "SELECT permission FROM game_users WHERE game_id = ?1 AND user_id = ?2",
            (game_id, user_id),
            |r| r.get(0),
        )
        .optional()?;
    match v {
        Some(v) => Ok(Some(permission_from_sql(0, v)?)),
        None => Ok(None),
    }
}

pub(crate) fn game_exists(conn: &Connection, game_id: &str) -> StoreResult<()> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM games WHERE id = ?1", [game_id], |r| {
        r.get(0)
    })?;
    if n == 0 {
        return Err(StoreError::NotFound("game"));
    }
    Ok(())
}

/// Fails when `user_id` is the only game master left, so the game is never orphaned.
fn ensure_not_last_game_master(
    conn: &Connection,
    game_id: &str,
    user_id: &str,
) -> StoreResult<()> {
    if member_permission_tx(conn, game_id, user_id)? != Some(UserPermission::GameMaster) {
        return Ok(());
    }
    let masters: i64 = conn.query_row(
        "SELECT COUNT(*) FROM game_users WHERE game_id = ?1 AND permission = ?2",
        (game_id, UserPermission::GameMaster.rank()),
        |r| r.get(0),
    )?;
    if masters <= 1 {
        return Err(StoreError::Conflict(
            "A game needs at least one game master".into(),
        ));
    }
    Ok(())
}

pub(crate) fn touch_game(conn: &Connection, game_id: &str) -> StoreResult<()> {
    conn.execute(
        "UPDATE games SET updated_at_ms = ?2 WHERE id = ?1",
        (game_id, now_ms()),
    )?;
    Ok(())
}

pub(crate) fn load_game(conn: &Connection, game_id: &str) -> StoreResult<Game> {
    let row: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT id, title, image FROM games WHERE id = ?1",
            [game_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((id, title, image)) = row else {
        return Err(StoreError::NotFound("game"));
    };
    let users = load_members(conn, &id)?;
    let nodes = load_nodes(conn, &id)?;
    Ok(Game {
        id,
        title,
        image,
        nodes,
        users,
    })
}

impl Engine {
    /// Creates a game and makes `owner` its game master.
    pub fn create_game(&self, owner: &str, req: &CreateGame) -> StoreResult<Game> {
        let title = non_empty("title", &req.title)?;
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        if crate::users::load_user(&tx, owner)?.is_none() {
            return Err(StoreError::NotFound("user"));
        }

        let id = new_id("game");
        let ts = now_ms();
        tx.execute(
            "INSERT INTO games (id, title, image, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            (&id, &title, &req.image, ts),
        )?;
        tx.execute(
            "INSERT INTO game_users (game_id, user_id, permission, joined_at_ms) VALUES (?1, ?2, ?3, ?4)",
            (&id, owner, UserPermission::GameMaster.rank(), ts),
        )?;
        append_event_tx(
            &tx,
            "game.created",
            Some(&id),
            Some(&id),
            serde_json::json!({ "id": id, "title": title, "owner": owner }),
        )?;
        let game = load_game(&tx, &id)?;
        tx.commit()?;
        tracing::info!(game_id = %id, %owner, "game created");
        Ok(game)
    }

    pub fn get_game(&self, game_id: &str) -> StoreResult<Game> {
        let conn = self.open()?;
        load_game(&conn, game_id)
    }

    pub fn update_game(&self, game_id: &str, upd: &UpdateGame) -> StoreResult<Game> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        game_exists(&tx, game_id)?;
        if let Some(title) = &upd.title {
            let title = non_empty("title", title)?;
            tx.execute("UPDATE games SET title = ?2 WHERE id = ?1", (game_id, title))?;
        }
        if let Some(image) = &upd.image {
            tx.execute("UPDATE games SET image = ?2 WHERE id = ?1", (game_id, image))?;
        }
        touch_game(&tx, game_id)?;
        append_event_tx(
            &tx,
            "game.updated",
            Some(game_id),
            Some(game_id),
            serde_json::json!({ "id": game_id, "title": upd.title, "image": upd.image }),
        )?;
        let game = load_game(&tx, game_id)?;
        tx.commit()?;
        Ok(game)
    }

    pub fn delete_game(&self, game_id: &str) -> StoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let n = tx.execute("DELETE FROM games WHERE id = ?1", [game_id])?;
        if n == 0 {
            return Err(StoreError::NotFound("game"));
        }
        append_event_tx(
            &tx,
            "game.deleted",
            Some(game_id),
            Some(game_id),
            serde_json::json!({ "id": game_id }),
        )?;
        tx.commit()?;
        tracing::info!(%game_id, "game deleted");
        Ok(())
    }

    pub fn member_permission(
        &self,
        game_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<UserPermission>> {
        let conn = self.open()?;
        game_exists(&conn, game_id)?;
        member_permission_tx(&conn, game_id, user_id)
    }

    /// Adds `user_id` as a regular player with information level 0 on every existing node.
    pub fn add_player(&self, game_id: &str, user_id: &str) -> StoreResult<UserPermissionRecord> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        game_exists(&tx, game_id)?;
        if crate::users::load_user(&tx, user_id)?.is_none() {
            return Err(StoreError::NotFound("user"));
        }
        if member_permission_tx(&tx, game_id, user_id)?.is_some() {
            return Err(StoreError::Conflict(format!(
                "user {user_id} is already in game {game_id}"
            )));
        }

        let permission = UserPermission::Player;
        tx.execute(
            "INSERT INTO game_users (game_id, user_id, permission, joined_at_ms) VALUES (?1, ?2, ?3, ?4)",
            (game_id, user_id, permission.rank(), now_ms()),
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO node_info_levels (node_id, user_id, info_level)
             SELECT id, ?2, 0 FROM nodes WHERE game_id = ?1",
            (game_id, user_id),
        )?;
        touch_game(&tx, game_id)?;
        append_event_tx(
            &tx,
            "game.player_added",
            Some(game_id),
            Some(game_id),
            serde_json::json!({ "game_id": game_id, "user_id": user_id }),
        )?;
        tx.commit()?;
        Ok(UserPermissionRecord {
            user_id: user_id.to_string(),
            permission,
        })
    }

    /// Removes the membership and the player's per-node levels and editor entries.
    /// The last game master cannot be removed.
    pub fn remove_player(&self, game_id: &str, user_id: &str) -> StoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        game_exists(&tx, game_id)?;
        ensure_not_last_game_master(&tx, game_id, user_id)?;
        let n = tx.execute(
            "DELETE FROM game_users WHERE game_id = ?1 AND user_id = ?2",
            (game_id, user_id),
        )?;
        if n == 0 {
            return Err(StoreError::NotFound("player"));
        }
        for table in ["node_info_levels", "node_editors"] {
            tx.execute(
                &format!(
                    "DELETE FROM {table} WHERE user_id = ?2
                     AND node_id IN (SELECT id FROM nodes WHERE game_id = ?1)"
                ),
                (game_id, user_id),
            )?;
        }
        touch_game(&tx, game_id)?;
        append_event_tx(
            &tx,
            "game.player_removed",
            Some(game_id),
            Some(game_id),
            serde_json::json!({ "game_id": game_id, "user_id": user_id }),
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_player_permission(
        &self,
        game_id: &str,
        user_id: &str,
        permission: UserPermission,
    ) -> StoreResult<UserPermissionRecord> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        game_exists(&tx, game_id)?;
        if permission != UserPermission::GameMaster {
            ensure_not_last_game_master(&tx, game_id, user_id)?;
        }
        let n = tx.execute(
            "UPDATE game_users SET permission = ?3 WHERE game_id = ?1 AND user_id = ?2",
            (game_id, user_id, permission.rank()),
        )?;
        if n == 0 {
            return Err(StoreError::NotFound("player"));
        }
        touch_game(&tx, game_id)?;
        append_event_tx(
            &tx,
            "game.permission_changed",
            Some(game_id),
            Some(game_id),
            serde_json::json!({ "game_id": game_id, "user_id": user_id, "permission": permission }),
        )?;
        tx.commit()?;
        Ok(UserPermissionRecord {
            user_id: user_id.to_string(),
            permission,
        })
    }
}
