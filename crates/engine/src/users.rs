use crate::{
    append_event_tx, auth, new_id, non_empty, now_ms, Engine, StoreError, StoreResult,
};
use gamegraph_protocol::{CreateUser, UpdateUser, User, UserId};
use rusqlite::{Connection, OptionalExtension};
use std::sync::OnceLock;

fn email_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles")
    })
}

fn valid_email(email: &str) -> StoreResult<String> {
    let email = email.trim();
    if !email_re().is_match(email) {
        return Err(StoreError::Invalid(format!("malformed email: {email}")));
    }
    Ok(email.to_string())
}

fn valid_password(password: &str) -> StoreResult<()> {
    if password.is_empty() {
        return Err(StoreError::Invalid("password must not be empty".into()));
    }
    Ok(())
}

pub(crate) fn load_user(conn: &Connection, id: &str) -> StoreResult<Option<User>> {
    let row = conn
        .query_row(
            "SELECT id, username, email, images_json FROM users WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((id, username, email, images_json)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT game_id FROM game_users WHERE user_id = ?1 ORDER BY joined_at_ms, rowid",
    )?;
    let games = stmt
        .query_map([&id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let images: Vec<String> = serde_json::from_str(&images_json).unwrap_or_default();

    Ok(Some(User {
        id,
        username,
        email,
        games,
        images,
    }))
}

fn taken(conn: &Connection, column: &str, value: &str, except: Option<&str>) -> StoreResult<bool> {
    let sql = format!("SELECT COUNT(*) FROM users WHERE {column} = ?1 AND id != ?2");
    let n: i64 = conn.query_row(&sql, (value, except.unwrap_or("")), |r| r.get(0))?;
    Ok(n > 0)
}

impl Engine {
    pub fn create_user(&self, req: &CreateUser) -> StoreResult<User> {
        let username = non_empty("username", &req.username)?;
        let email = valid_email(&req.email)?;
        valid_password(&req.password)?;

        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        if taken(&tx, "username", &username, None)? || taken(&tx, "email", &email, None)? {
            return Err(StoreError::Conflict(
                "Username and email must be unique.".to_string(),
            ));
        }

        let id = new_id("user");
        let ts = now_ms();
        let hash = auth::hash_password(&req.password)?;
        tx.execute(
            "INSERT INTO users (id, username, email, password_hash, images_json, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, '[]', ?5, ?5)",
            (&id, &username, &email, &hash, ts),
        )?;
        append_event_tx(
            &tx,
            "user.created",
            Some(&id),
            None,
            serde_json::json!({ "id": id, "username": username }),
        )?;
        tx.commit()?;
        tracing::info!(user_id = %id, %username, "user created");

        Ok(User {
            id,
            username,
            email,
            games: Vec::new(),
            images: Vec::new(),
        })
    }

    /// Returns the user when the password matches, `None` for any mismatch.
    pub fn verify_credentials(&self, username: &str, password: &str) -> StoreResult<Option<User>> {
        let conn = self.open()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT id, password_hash FROM users WHERE username = ?1",
                [username.trim()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        match row {
            Some((id, hash)) if auth::verify_password(password, &hash) => load_user(&conn, &id),
            _ => Ok(None),
        }
    }

    pub fn get_user(&self, id: &str) -> StoreResult<User> {
        let conn = self.open()?;
        load_user(&conn, id)?.ok_or(StoreError::NotFound("user"))
    }

    pub fn find_user_by_username(&self, username: &str) -> StoreResult<User> {
        let conn = self.open()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                [username.trim()],
                |r| r.get(0),
            )
            .optional()?;
        match id {
            Some(id) => load_user(&conn, &id)?.ok_or(StoreError::NotFound("user")),
            None => Err(StoreError::NotFound("user")),
        }
    }

    pub fn update_user(&self, id: &str, upd: &UpdateUser) -> StoreResult<User> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        if load_user(&tx, id)?.is_none() {
            return Err(StoreError::NotFound("user"));
        }
        let ts = now_ms();

        if let Some(username) = &upd.username {
            let username = non_empty("username", username)?;
            if taken(&tx, "username", &username, Some(id))? {
                return Err(StoreError::Conflict("Username is already taken.".into()));
            }
            tx.execute(
                "UPDATE users SET username = ?2, updated_at_ms = ?3 WHERE id = ?1",
                (id, &username, ts),
            )?;
        }
        if let Some(email) = &upd.email {
            let email = valid_email(email)?;
            if taken(&tx, "email", &email, Some(id))? {
                return Err(StoreError::Conflict("Email is already taken.".into()));
            }
            tx.execute(
                "UPDATE users SET email = ?2, updated_at_ms = ?3 WHERE id = ?1",
                (id, &email, ts),
            )?;
        }
        if let Some(password) = &upd.password {
            valid_password(password)?;
            let hash = auth::hash_password(password)?;
            tx.execute(
                "UPDATE users SET password_hash = ?2, updated_at_ms = ?3 WHERE id = ?1",
                (id, hash, ts),
            )?;
        }

        append_event_tx(&tx, "user.updated", Some(id), None, serde_json::json!({ "id": id }))?;
        let user = load_user(&tx, id)?.ok_or(StoreError::NotFound("user"))?;
        tx.commit()?;
        Ok(user)
    }

    pub fn push_user_image(&self, id: &str, image: &str) -> StoreResult<User> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let mut user = load_user(&tx, id)?.ok_or(StoreError::NotFound("user"))?;
        user.images.push(image.to_string());
        let images_json = serde_json::to_string(&user.images)
            .map_err(|e| StoreError::Other(anyhow::Error::new(e)))?;
        tx.execute(
            "UPDATE users SET images_json = ?2, updated_at_ms = ?3 WHERE id = ?1",
            (id, images_json, now_ms()),
        )?;
        append_event_tx(
            &tx,
            "user.image_added",
            Some(id),
            None,
            serde_json::json!({ "id": id, "count": user.images.len() }),
        )?;
        tx.commit()?;
        Ok(user)
    }

    /// Deletes the account. Memberships, node levels, editor entries and sessions cascade.
    pub fn delete_user(&self, id: &str) -> StoreResult<User> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let user = load_user(&tx, id)?.ok_or(StoreError::NotFound("user"))?;
        tx.execute("DELETE FROM users WHERE id = ?1", [id])?;
        append_event_tx(&tx, "user.deleted", Some(id), None, serde_json::json!({ "id": id }))?;
        tx.commit()?;
        tracing::info!(user_id = %id, "user deleted");
        Ok(user)
    }

    /// Returns the raw token for the cookie; only its digest is stored.
    pub fn create_session(&self, user_id: &str) -> StoreResult<String> {
        let conn = self.open()?;
        let token = auth::new_session_token();
        conn.execute(
            "INSERT INTO sessions (token_hash, user_id, created_at_ms) VALUES (?1, ?2, ?3)",
            (auth::session_key(&token), user_id, now_ms()),
        )?;
        Ok(token)
    }

    pub fn session_user(&self, token: &str) -> StoreResult<Option<UserId>> {
        let conn = self.open()?;
        Ok(conn
            .query_row(
                "SELECT user_id FROM sessions WHERE token_hash = ?1",
                [auth::session_key(token)],
                |r| r.get(0),
            )
            .optional()?)
    }

    pub fn destroy_session(&self, token: &str) -> StoreResult<bool> {
        let conn = self.open()?;
        let n = conn.execute(
            "DELETE FROM sessions WHERE token_hash = ?1",
            [auth::session_key(token)],
        )?;
        Ok(n > 0)
    }
}
