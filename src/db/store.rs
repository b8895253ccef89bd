//! SQLite-backed account, group, event, friendship, and presence store.
//!
//! One `Connection` per worker; all access is serialized through the
//! adapter's command channel, so nothing here needs its own locking.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::config::DbConfig;
use crate::error::Result;

/// Timestamp layout on the wire and in `events.start_ts` / `end_ts`.
/// Fixed-width ISO-8601, so text comparison orders correctly in SQL.
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    user_id     INTEGER PRIMARY KEY,
    schedule_id INTEGER NOT NULL DEFAULT 0,
    user_name   TEXT NOT NULL UNIQUE,
    passwd      TEXT NOT NULL,
    email       TEXT NOT NULL,
    cell        TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS groups (
    group_id   INTEGER PRIMARY KEY,
    group_name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS user_groups (
    user_id  INTEGER NOT NULL,
    group_id INTEGER NOT NULL,
    UNIQUE (user_id, group_id)
);
CREATE TABLE IF NOT EXISTS events (
    event_id    INTEGER PRIMARY KEY,
    owner_id    INTEGER,
    title       TEXT NOT NULL,
    location    TEXT NOT NULL DEFAULT '',
    start_ts    TEXT NOT NULL,
    end_ts      TEXT NOT NULL,
    repeat_rule TEXT NOT NULL DEFAULT '',
    notes       TEXT NOT NULL DEFAULT '',
    color       TEXT NOT NULL DEFAULT '',
    is_group    INTEGER NOT NULL DEFAULT 0,
    group_id    INTEGER
);
CREATE TABLE IF NOT EXISTS friendships (
    user_a   INTEGER NOT NULL,
    user_b   INTEGER NOT NULL,
    accepted INTEGER NOT NULL DEFAULT 0,
    UNIQUE (user_a, user_b)
);
CREATE TABLE IF NOT EXISTS presence (
    user_id      INTEGER PRIMARY KEY,
    present_flag INTEGER NOT NULL DEFAULT 1
);
";

#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    pub user_name: String,
    pub email: String,
    pub cell: String,
    pub present: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRow {
    pub event_id: i64,
    pub title: String,
    pub location: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub repeat_rule: String,
    pub notes: String,
    pub color: String,
}

/// Payload of a not-yet-inserted event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub title: String,
    pub location: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub repeat_rule: String,
    pub notes: String,
    pub color: String,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open the database named by `DBNAME` (`:memory:` supported) and
    /// ensure the schema exists.
    pub fn open(config: &DbConfig) -> Result<Self> {
        let conn = if config.name == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.name)?
        };
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn user_id(&self, user_name: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT user_id FROM users WHERE user_name = ?1",
                params![user_name],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn group_id(&self, group_name: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT group_id FROM groups WHERE group_name = ?1",
                params![group_name],
                |row| row.get(0),
            )
            .optional()?)
    }

    // ------------------------------------------------------------------
    // accounts

    pub fn create_account(&self, user: &str, pass: &str, email: &str) -> Result<bool> {
        if self.user_id(user)?.is_some() {
            return Ok(false);
        }
        self.conn.execute(
            "INSERT INTO users (schedule_id, user_name, passwd, email)
             VALUES (0, ?1, ?2, ?3)",
            params![user, pass, email],
        )?;
        let uid = self.conn.last_insert_rowid();
        self.conn.execute(
            "INSERT INTO presence (user_id, present_flag) VALUES (?1, 1)",
            params![uid],
        )?;
        Ok(true)
    }

    pub fn login(&self, user: &str, pass: &str) -> Result<bool> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT passwd FROM users WHERE user_name = ?1",
                params![user],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.as_deref() == Some(pass))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_user(
        &self,
        old_user: &str,
        old_pass: &str,
        new_pass: &str,
        new_user: &str,
        new_mail: &str,
        new_cell: &str,
    ) -> Result<bool> {
        if !self.login(old_user, old_pass)? {
            return Ok(false);
        }
        if new_user != old_user && self.user_id(new_user)?.is_some() {
            return Ok(false);
        }
        let changed = self.conn.execute(
            "UPDATE users SET user_name = ?1, passwd = ?2, email = ?3, cell = ?4
             WHERE user_name = ?5",
            params![new_user, new_pass, new_mail, new_cell, old_user],
        )?;
        Ok(changed > 0)
    }

    pub fn reset_password(&self, user: &str, email: &str, new_pass: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE users SET passwd = ?1 WHERE user_name = ?2 AND email = ?3",
            params![new_pass, user, email],
        )?;
        Ok(changed > 0)
    }

    pub fn account_info(&self, user: &str) -> Result<Option<AccountInfo>> {
        Ok(self
            .conn
            .query_row(
                "SELECT u.user_name, u.email, u.cell,
                        COALESCE(p.present_flag, 1)
                 FROM users u
                 LEFT JOIN presence p ON p.user_id = u.user_id
                 WHERE u.user_name = ?1",
                params![user],
                |row| {
                    Ok(AccountInfo {
                        user_name: row.get(0)?,
                        email: row.get(1)?,
                        cell: row.get(2)?,
                        present: row.get::<_, i64>(3)? != 0,
                    })
                },
            )
            .optional()?)
    }

    pub fn set_presence(&self, user: &str, present: bool) -> Result<bool> {
        let Some(uid) = self.user_id(user)? else {
            return Ok(false);
        };
        self.conn.execute(
            "INSERT INTO presence (user_id, present_flag) VALUES (?1, ?2)
             ON CONFLICT (user_id) DO UPDATE SET present_flag = ?2",
            params![uid, present as i64],
        )?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // groups

    pub fn create_group(&self, group: &str) -> Result<bool> {
        if self.group_id(group)?.is_some() {
            return Ok(false);
        }
        self.conn.execute(
            "INSERT INTO groups (group_name) VALUES (?1)",
            params![group],
        )?;
        Ok(true)
    }

    pub fn delete_group(&self, group: &str) -> Result<bool> {
        let Some(gid) = self.group_id(group)? else {
            return Ok(false);
        };
        self.conn.execute(
            "DELETE FROM user_groups WHERE group_id = ?1",
            params![gid],
        )?;
        self.conn.execute(
            "DELETE FROM events WHERE is_group = 1 AND group_id = ?1",
            params![gid],
        )?;
        self.conn
            .execute("DELETE FROM groups WHERE group_id = ?1", params![gid])?;
        Ok(true)
    }

    pub fn join_group(&self, user: &str, group: &str) -> Result<bool> {
        let (Some(uid), Some(gid)) = (self.user_id(user)?, self.group_id(group)?) else {
            return Ok(false);
        };
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO user_groups (user_id, group_id) VALUES (?1, ?2)",
            params![uid, gid],
        )?;
        Ok(inserted > 0)
    }

    pub fn leave_group(&self, user: &str, group: &str) -> Result<bool> {
        let (Some(uid), Some(gid)) = (self.user_id(user)?, self.group_id(group)?) else {
            return Ok(false);
        };
        let removed = self.conn.execute(
            "DELETE FROM user_groups WHERE user_id = ?1 AND group_id = ?2",
            params![uid, gid],
        )?;
        Ok(removed > 0)
    }

    pub fn list_groups(&self, user: &str) -> Result<Option<Vec<String>>> {
        let Some(uid) = self.user_id(user)? else {
            return Ok(None);
        };
        let mut stmt = self.conn.prepare(
            "SELECT g.group_name FROM groups g
             JOIN user_groups ug ON ug.group_id = g.group_id
             WHERE ug.user_id = ?1 ORDER BY g.group_name",
        )?;
        let names = stmt
            .query_map(params![uid], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(Some(names))
    }

    pub fn list_group_users(&self, group: &str) -> Result<Option<Vec<String>>> {
        let Some(gid) = self.group_id(group)? else {
            return Ok(None);
        };
        let mut stmt = self.conn.prepare(
            "SELECT u.user_name FROM users u
             JOIN user_groups ug ON ug.user_id = u.user_id
             WHERE ug.group_id = ?1 ORDER BY u.user_name",
        )?;
        let names = stmt
            .query_map(params![gid], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(Some(names))
    }

    // ------------------------------------------------------------------
    // events

    pub fn create_personal_event(&self, user: &str, event: &NewEvent) -> Result<Option<i64>> {
        let Some(uid) = self.user_id(user)? else {
            return Ok(None);
        };
        self.conn.execute(
            "INSERT INTO events
               (owner_id, title, location, start_ts, end_ts, repeat_rule, notes, color, is_group)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                uid,
                event.title,
                event.location,
                event.start.format(TS_FORMAT).to_string(),
                event.end.format(TS_FORMAT).to_string(),
                event.repeat_rule,
                event.notes,
                event.color,
            ],
        )?;
        Ok(Some(self.conn.last_insert_rowid()))
    }

    pub fn create_group_event(&self, group: &str, event: &NewEvent) -> Result<Option<i64>> {
        let Some(gid) = self.group_id(group)? else {
            return Ok(None);
        };
        self.conn.execute(
            "INSERT INTO events
               (title, location, start_ts, end_ts, repeat_rule, notes, color, is_group, group_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
            params![
                event.title,
                event.location,
                event.start.format(TS_FORMAT).to_string(),
                event.end.format(TS_FORMAT).to_string(),
                event.repeat_rule,
                event.notes,
                event.color,
                gid,
            ],
        )?;
        Ok(Some(self.conn.last_insert_rowid()))
    }

    /// Events visible to a user in a window: their own plus events of
    /// groups they belong to right now.
    pub fn events_for_user(
        &self,
        user: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Option<Vec<EventRow>>> {
        let Some(uid) = self.user_id(user)? else {
            return Ok(None);
        };
        let mut stmt = self.conn.prepare(
            "SELECT event_id, title, location, start_ts, end_ts, repeat_rule, notes, color
             FROM events
             WHERE ((is_group = 0 AND owner_id = ?1)
                 OR (is_group = 1 AND group_id IN
                       (SELECT group_id FROM user_groups WHERE user_id = ?1)))
               AND start_ts <= ?3 AND end_ts >= ?2
             ORDER BY start_ts",
        )?;
        let rows = stmt
            .query_map(
                params![
                    uid,
                    from.format(TS_FORMAT).to_string(),
                    to.format(TS_FORMAT).to_string(),
                ],
                event_from_row,
            )?
            .collect::<rusqlite::Result<Vec<EventRow>>>()?;
        Ok(Some(rows))
    }

    pub fn events_for_group(
        &self,
        group: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Option<Vec<EventRow>>> {
        let Some(gid) = self.group_id(group)? else {
            return Ok(None);
        };
        let mut stmt = self.conn.prepare(
            "SELECT event_id, title, location, start_ts, end_ts, repeat_rule, notes, color
             FROM events
             WHERE is_group = 1 AND group_id = ?1
               AND start_ts <= ?3 AND end_ts >= ?2
             ORDER BY start_ts",
        )?;
        let rows = stmt
            .query_map(
                params![
                    gid,
                    from.format(TS_FORMAT).to_string(),
                    to.format(TS_FORMAT).to_string(),
                ],
                event_from_row,
            )?
            .collect::<rusqlite::Result<Vec<EventRow>>>()?;
        Ok(Some(rows))
    }

    /// Busy intervals of every current member of a group, for the group
    /// suggestion query. Membership is evaluated at query time.
    pub fn events_for_group_members(
        &self,
        group: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Option<Vec<EventRow>>> {
        let Some(gid) = self.group_id(group)? else {
            return Ok(None);
        };
        let mut stmt = self.conn.prepare(
            "SELECT event_id, title, location, start_ts, end_ts, repeat_rule, notes, color
             FROM events
             WHERE ((is_group = 1 AND group_id = ?1)
                 OR (is_group = 0 AND owner_id IN
                       (SELECT user_id FROM user_groups WHERE group_id = ?1)))
               AND start_ts <= ?3 AND end_ts >= ?2
             ORDER BY start_ts",
        )?;
        let rows = stmt
            .query_map(
                params![
                    gid,
                    from.format(TS_FORMAT).to_string(),
                    to.format(TS_FORMAT).to_string(),
                ],
                event_from_row,
            )?
            .collect::<rusqlite::Result<Vec<EventRow>>>()?;
        Ok(Some(rows))
    }

    // ------------------------------------------------------------------
    // friendships

    pub fn friend_request(&self, from_user: &str, to_user: &str) -> Result<bool> {
        if from_user == to_user {
            return Ok(false);
        }
        let (Some(a), Some(b)) = (self.user_id(from_user)?, self.user_id(to_user)?) else {
            return Ok(false);
        };
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM friendships
                 WHERE (user_a = ?1 AND user_b = ?2) OR (user_a = ?2 AND user_b = ?1)",
                params![a, b],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(false);
        }
        self.conn.execute(
            "INSERT INTO friendships (user_a, user_b, accepted) VALUES (?1, ?2, 0)",
            params![a, b],
        )?;
        Ok(true)
    }

    /// `user` accepts the pending request sent by `from_user`.
    pub fn accept_friend(&self, user: &str, from_user: &str) -> Result<bool> {
        let (Some(uid), Some(rid)) = (self.user_id(user)?, self.user_id(from_user)?) else {
            return Ok(false);
        };
        let changed = self.conn.execute(
            "UPDATE friendships SET accepted = 1
             WHERE user_a = ?1 AND user_b = ?2 AND accepted = 0",
            params![rid, uid],
        )?;
        Ok(changed > 0)
    }

    /// `user` declines the pending request sent by `from_user`.
    pub fn reject_friend(&self, user: &str, from_user: &str) -> Result<bool> {
        let (Some(uid), Some(rid)) = (self.user_id(user)?, self.user_id(from_user)?) else {
            return Ok(false);
        };
        let removed = self.conn.execute(
            "DELETE FROM friendships WHERE user_a = ?1 AND user_b = ?2 AND accepted = 0",
            params![rid, uid],
        )?;
        Ok(removed > 0)
    }

    pub fn delete_friend(&self, user: &str, other: &str) -> Result<bool> {
        let (Some(a), Some(b)) = (self.user_id(user)?, self.user_id(other)?) else {
            return Ok(false);
        };
        let removed = self.conn.execute(
            "DELETE FROM friendships
             WHERE (user_a = ?1 AND user_b = ?2) OR (user_a = ?2 AND user_b = ?1)",
            params![a, b],
        )?;
        Ok(removed > 0)
    }

    pub fn friends(&self, user: &str) -> Result<Option<Vec<String>>> {
        let Some(uid) = self.user_id(user)? else {
            return Ok(None);
        };
        let mut stmt = self.conn.prepare(
            "SELECT u.user_name FROM friendships f
             JOIN users u ON u.user_id =
                 CASE WHEN f.user_a = ?1 THEN f.user_b ELSE f.user_a END
             WHERE (f.user_a = ?1 OR f.user_b = ?1) AND f.accepted = 1
             ORDER BY u.user_name",
        )?;
        let names = stmt
            .query_map(params![uid], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(Some(names))
    }

    /// Incoming pending requests for `user`.
    pub fn friend_requests(&self, user: &str) -> Result<Option<Vec<String>>> {
        let Some(uid) = self.user_id(user)? else {
            return Ok(None);
        };
        let mut stmt = self.conn.prepare(
            "SELECT u.user_name FROM friendships f
             JOIN users u ON u.user_id = f.user_a
             WHERE f.user_b = ?1 AND f.accepted = 0
             ORDER BY u.user_name",
        )?;
        let names = stmt
            .query_map(params![uid], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(Some(names))
    }
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        event_id: row.get(0)?,
        title: row.get(1)?,
        location: row.get(2)?,
        start: parse_ts_column(row, 3)?,
        end: parse_ts_column(row, 4)?,
        repeat_rule: row.get(5)?,
        notes: row.get(6)?,
        color: row.get(7)?,
    })
}

fn parse_ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let text: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&text, TS_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
