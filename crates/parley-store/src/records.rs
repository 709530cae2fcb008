//! Generic row operations over the public tables.
//!
//! Reads honour equality filters, ordering, windowing and embeds; writes
//! return the affected rows so the caller can publish change events.

use std::collections::HashMap;

use parley_shared::{Direction, Embed, Filter, ProfileId, Query, Table};
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::tables::{now_ts, table_def, TableDef};

/// WHERE clause under construction, with positional parameters.
#[derive(Default)]
struct Predicate {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl Predicate {
    fn push_eq(&mut self, def: &TableDef, column: &str, value: &Value) -> Result<()> {
        let column = def.column(column)?;
        if value.is_null() {
            self.clauses.push(format!("\"{}\" IS NULL", column.name));
        } else {
            self.params.push(column.to_sql(value)?);
            self.clauses
                .push(format!("\"{}\" = ?{}", column.name, self.params.len()));
        }
        Ok(())
    }

    fn push_raw(&mut self, clause: impl FnOnce(usize) -> String, param: SqlValue) {
        self.params.push(param);
        let idx = self.params.len();
        self.clauses.push(clause(idx));
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

impl Database {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Run a [`Query`] as seen by `viewer`.
    ///
    /// `chats` rows are only visible to their participants; without a viewer
    /// the table reads as empty.
    pub fn select_rows(&self, query: &Query, viewer: Option<ProfileId>) -> Result<Vec<Value>> {
        let def = table_def(query.table);
        let mut predicate = Predicate::default();
        for filter in &query.filters {
            predicate.push_eq(def, &filter.column, &filter.value)?;
        }

        if query.table == Table::Chats {
            let Some(viewer) = viewer else {
                return Ok(Vec::new());
            };
            predicate.push_raw(
                |i| format!("\"id\" IN (SELECT chat_id FROM chat_participants WHERE profile_id = ?{i})"),
                SqlValue::Text(viewer.to_string()),
            );
        }

        let mut sql = format!(
            "SELECT {} FROM {}{}",
            def.select_list(),
            def.name,
            predicate.where_sql()
        );

        match &query.order {
            Some(order) => {
                let column = def.column(&order.column)?;
                let dir = match order.direction {
                    Direction::Ascending => "ASC",
                    Direction::Descending => "DESC",
                };
                sql.push_str(&format!(" ORDER BY \"{}\" {dir}, rowid {dir}", column.name));
            }
            None => sql.push_str(" ORDER BY rowid ASC"),
        }

        let mut params = predicate.params;
        if let Some(range) = query.range {
            params.push(SqlValue::Integer(range.limit as i64));
            params.push(SqlValue::Integer(range.offset as i64));
            sql.push_str(&format!(
                " LIMIT ?{} OFFSET ?{}",
                params.len() - 1,
                params.len()
            ));
        }

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| def.read_row(row))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }

        for embed in &query.embeds {
            match (embed, query.table) {
                (Embed::Participants, Table::Chats) => self.embed_participants(&mut out)?,
                (Embed::Sender, Table::Messages) => self.embed_senders(&mut out)?,
                (embed, table) => {
                    return Err(StoreError::Invalid(format!(
                        "{embed:?} cannot be embedded in {table}"
                    )))
                }
            }
        }

        Ok(out)
    }

    /// Fetch the single row identified by `key`.
    fn row_by_key(&self, table: Table, key: &[(&'static str, Value)]) -> Result<Value> {
        // Writers see every row; visibility only applies to client reads.
        let def = table_def(table);
        let mut predicate = Predicate::default();
        for (column, value) in key {
            predicate.push_eq(def, column, value)?;
        }
        let sql = format!(
            "SELECT {} FROM {}{}",
            def.select_list(),
            def.name,
            predicate.where_sql()
        );
        self.conn()
            .query_row(&sql, params_from_iter(predicate.params.iter()), |row| {
                def.read_row(row)
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Attach `chat_participants` (with a profile snapshot) to chat rows in a
    /// single joined read.
    fn embed_participants(&self, chats: &mut [Value]) -> Result<()> {
        let ids: Vec<String> = chats
            .iter()
            .filter_map(|c| c.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let placeholders = placeholders(ids.len());
        let sql = format!(
            "SELECT cp.chat_id, cp.profile_id, p.username, p.avatar_url, p.is_online
             FROM chat_participants cp
             JOIN profiles p ON p.id = cp.profile_id
             WHERE cp.chat_id IN ({placeholders})
             ORDER BY cp.joined_at ASC, cp.rowid ASC"
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            let chat_id: String = row.get(0)?;
            let profile_id: String = row.get(1)?;
            let username: String = row.get(2)?;
            let avatar_url: Option<String> = row.get(3)?;
            let is_online: i64 = row.get(4)?;
            Ok((
                chat_id,
                serde_json::json!({
                    "profile_id": profile_id,
                    "profiles": {
                        "username": username,
                        "avatar_url": avatar_url,
                        "is_online": is_online != 0,
                    }
                }),
            ))
        })?;

        let mut by_chat: HashMap<String, Vec<Value>> = HashMap::new();
        for row in rows {
            let (chat_id, participant) = row?;
            by_chat.entry(chat_id).or_default().push(participant);
        }

        for chat in chats.iter_mut() {
            let participants = chat
                .get("id")
                .and_then(Value::as_str)
                .and_then(|id| by_chat.remove(id))
                .unwrap_or_default();
            if let Some(obj) = chat.as_object_mut() {
                obj.insert("chat_participants".into(), Value::Array(participants));
            }
        }
        Ok(())
    }

    /// Attach the full `sender` profile to message rows.
    fn embed_senders(&self, messages: &mut [Value]) -> Result<()> {
        let mut ids: Vec<String> = messages
            .iter()
            .filter_map(|m| m.get("sender_id").and_then(Value::as_str).map(str::to_string))
            .collect();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Ok(());
        }

        let def = table_def(Table::Profiles);
        let sql = format!(
            "SELECT {} FROM profiles WHERE id IN ({})",
            def.select_list(),
            placeholders(ids.len())
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| def.read_row(row))?;

        let mut profiles: HashMap<String, Value> = HashMap::new();
        for row in rows {
            let profile = row?;
            if let Some(id) = profile.get("id").and_then(Value::as_str) {
                profiles.insert(id.to_string(), profile.clone());
            }
        }

        for message in messages.iter_mut() {
            let sender = message
                .get("sender_id")
                .and_then(Value::as_str)
                .and_then(|id| profiles.get(id).cloned())
                .unwrap_or(Value::Null);
            if let Some(obj) = message.as_object_mut() {
                obj.insert("sender".into(), sender);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert one row and return it as stored.
    pub fn insert_row(&self, table: Table, row: &Value) -> Result<Value> {
        let def = table_def(table);
        let filled = def.fill_insert(row)?;

        let columns: Vec<String> = filled.iter().map(|(c, _)| format!("\"{c}\"")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            def.name,
            columns.join(", "),
            placeholders(filled.len())
        );
        self.conn()
            .execute(&sql, params_from_iter(filled.iter().map(|(_, v)| v)))?;

        let stored: Value = Value::Object(
            filled
                .iter()
                .map(|(c, v)| (c.to_string(), sql_to_json(v)))
                .collect(),
        );
        let key = def.key_of(&stored)?;
        self.row_by_key(table, &key)
    }

    /// Apply `patch` to every row matching `filters`. Returns `(old, new)`
    /// pairs. `updated_at` is bumped unless the patch sets it.
    pub fn update_rows(
        &self,
        table: Table,
        filters: &[Filter],
        patch: &Value,
    ) -> Result<Vec<(Value, Value)>> {
        let def = table_def(table);
        let patch = patch
            .as_object()
            .ok_or_else(|| StoreError::Invalid("patch must be an object".into()))?;
        if patch.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = Query::from(table);
        query.filters = filters.to_vec();
        let old_rows = self.select_unrestricted(&query)?;
        if old_rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (name, value) in patch {
            let column = def.column(name)?;
            if def.key.contains(&column.name) {
                return Err(StoreError::Invalid(format!("cannot update key column {name}")));
            }
            params.push(column.to_sql(value)?);
            assignments.push(format!("\"{}\" = ?{}", column.name, params.len()));
        }
        if def.has_column("updated_at") && !patch.contains_key("updated_at") {
            params.push(SqlValue::Text(now_ts()));
            assignments.push(format!("\"updated_at\" = ?{}", params.len()));
        }

        let mut changed = Vec::with_capacity(old_rows.len());
        for old in old_rows {
            let key = def.key_of(&old)?;
            let mut row_params = params.clone();
            let mut clauses = Vec::new();
            for (column, value) in &key {
                row_params.push(def.column(column)?.to_sql(value)?);
                clauses.push(format!("\"{}\" = ?{}", column, row_params.len()));
            }
            let sql = format!(
                "UPDATE {} SET {} WHERE {}",
                def.name,
                assignments.join(", "),
                clauses.join(" AND ")
            );
            self.conn().execute(&sql, params_from_iter(row_params.iter()))?;
            let new = self.row_by_key(table, &key)?;
            changed.push((old, new));
        }
        Ok(changed)
    }

    /// Delete every row matching `filters` and return the deleted rows.
    pub fn delete_rows(&self, table: Table, filters: &[Filter]) -> Result<Vec<Value>> {
        if filters.is_empty() {
            return Err(StoreError::Invalid("refusing to delete without a filter".into()));
        }
        let def = table_def(table);

        let mut query = Query::from(table);
        query.filters = filters.to_vec();
        let rows = self.select_unrestricted(&query)?;

        let mut predicate = Predicate::default();
        for filter in filters {
            predicate.push_eq(def, &filter.column, &filter.value)?;
        }
        let sql = format!("DELETE FROM {}{}", def.name, predicate.where_sql());
        self.conn()
            .execute(&sql, params_from_iter(predicate.params.iter()))?;
        Ok(rows)
    }

    /// Move a chat's `updated_at` forward to `at` (never backwards).
    /// Returns `(old, new)` when the row changed.
    pub fn touch_chat(&self, chat_id: &str, at: &str) -> Result<Option<(Value, Value)>> {
        let key = vec![("id", Value::String(chat_id.to_string()))];
        let old = match self.row_by_key(Table::Chats, &key) {
            Ok(row) => row,
            Err(StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        if old.get("updated_at").and_then(Value::as_str) >= Some(at) {
            return Ok(None);
        }
        self.conn().execute(
            "UPDATE chats SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![at, chat_id],
        )?;
        let new = self.row_by_key(Table::Chats, &key)?;
        Ok(Some((old, new)))
    }

    fn select_unrestricted(&self, query: &Query) -> Result<Vec<Value>> {
        let def = table_def(query.table);
        let mut predicate = Predicate::default();
        for filter in &query.filters {
            predicate.push_eq(def, &filter.column, &filter.value)?;
        }
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY rowid ASC",
            def.select_list(),
            def.name,
            predicate.where_sql()
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(predicate.params.iter()), |row| {
            def.read_row(row)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

fn sql_to_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(*i),
        SqlValue::Real(f) => Value::from(*f),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Blob(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn profile(db: &Database, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_row(Table::Profiles, &json!({ "id": id, "username": username }))
            .unwrap();
        id
    }

    fn chat_with(db: &Database, members: &[&str]) -> String {
        let row = db
            .insert_row(
                Table::Chats,
                &json!({ "type": "direct", "created_by": members[0] }),
            )
            .unwrap();
        let chat_id = row["id"].as_str().unwrap().to_string();
        for member in members {
            db.insert_row(
                Table::ChatParticipants,
                &json!({ "chat_id": chat_id, "profile_id": member }),
            )
            .unwrap();
        }
        chat_id
    }

    #[test]
    fn insert_returns_server_filled_row() {
        let db = Database::open_in_memory().unwrap();
        let alice = profile(&db, "alice");

        let row = db
            .select_rows(&Query::from(Table::Profiles).eq("id", alice.clone()), None)
            .unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row[0]["username"], "alice");
        assert_eq!(row[0]["is_online"], false);
        assert_eq!(row[0]["status_message"], "");
    }

    #[test]
    fn duplicate_username_violates_unique_constraint() {
        let db = Database::open_in_memory().unwrap();
        profile(&db, "alice");
        let err = db
            .insert_row(
                Table::Profiles,
                &json!({ "id": Uuid::new_v4().to_string(), "username": "alice" }),
            )
            .unwrap_err();
        assert!(matches!(
            parley_shared::BackendError::from(err),
            parley_shared::BackendError::Duplicate(_)
        ));
    }

    #[test]
    fn chats_are_only_visible_to_participants() {
        let db = Database::open_in_memory().unwrap();
        let alice = profile(&db, "alice");
        let bob = profile(&db, "bob");
        let carol = profile(&db, "carol");
        chat_with(&db, &[&alice, &bob]);

        let q = Query::from(Table::Chats).embed(Embed::Participants);
        let as_alice = db
            .select_rows(&q, Some(ProfileId::parse(&alice).unwrap()))
            .unwrap();
        let as_carol = db
            .select_rows(&q, Some(ProfileId::parse(&carol).unwrap()))
            .unwrap();
        let anonymous = db.select_rows(&q, None).unwrap();

        assert_eq!(as_alice.len(), 1);
        assert_eq!(as_alice[0]["chat_participants"].as_array().unwrap().len(), 2);
        assert_eq!(
            as_alice[0]["chat_participants"][1]["profiles"]["username"],
            "bob"
        );
        assert!(as_carol.is_empty());
        assert!(anonymous.is_empty());
    }

    #[test]
    fn messages_are_windowed_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let alice = profile(&db, "alice");
        let bob = profile(&db, "bob");
        let chat = chat_with(&db, &[&alice, &bob]);

        for i in 0..5 {
            db.insert_row(
                Table::Messages,
                &json!({
                    "chat_id": chat,
                    "sender_id": alice,
                    "content": format!("m{i}"),
                    "created_at": format!("2024-01-01T00:00:0{i}Z"),
                }),
            )
            .unwrap();
        }

        let page = db
            .select_rows(
                &Query::from(Table::Messages)
                    .eq("chat_id", chat.clone())
                    .order("created_at", Direction::Descending)
                    .range(1, 2)
                    .embed(Embed::Sender),
                None,
            )
            .unwrap();

        let contents: Vec<_> = page.iter().map(|m| m["content"].clone()).collect();
        assert_eq!(contents, vec![json!("m3"), json!("m2")]);
        assert_eq!(page[0]["sender"]["username"], "alice");
    }

    #[test]
    fn update_bumps_updated_at_and_returns_both_versions() {
        let db = Database::open_in_memory().unwrap();
        let alice = profile(&db, "alice");

        let changed = db
            .update_rows(
                Table::Profiles,
                &[Filter::eq("id", alice.clone())],
                &json!({ "is_online": true, "updated_at": "2030-01-01T00:00:00Z" }),
            )
            .unwrap();
        assert_eq!(changed.len(), 1);
        let (old, new) = &changed[0];
        assert_eq!(old["is_online"], false);
        assert_eq!(new["is_online"], true);
        assert_eq!(new["updated_at"], "2030-01-01T00:00:00.000000Z");
    }

    #[test]
    fn touch_chat_only_moves_forward() {
        let db = Database::open_in_memory().unwrap();
        let alice = profile(&db, "alice");
        let bob = profile(&db, "bob");
        let chat = chat_with(&db, &[&alice, &bob]);

        assert!(db
            .touch_chat(&chat, "2999-01-01T00:00:00.000000Z")
            .unwrap()
            .is_some());
        assert!(db
            .touch_chat(&chat, "2000-01-01T00:00:00.000000Z")
            .unwrap()
            .is_none());
    }

    #[test]
    fn delete_requires_a_filter() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.delete_rows(Table::Messages, &[]).is_err());
    }
}
