//! Column catalog for the public tables.
//!
//! Every query and row that reaches SQLite is checked against this catalog,
//! so identifiers coming from callers are never spliced into SQL unchecked.

use chrono::{DateTime, SecondsFormat, Utc};
use parley_shared::Table;
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Text,
    Uuid,
    Bool,
    Timestamp,
}

/// What to store when an insert omits the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fill {
    /// The caller must supply a value.
    Required,
    Null,
    NewId,
    Now,
    Text(&'static str),
    Bool(bool),
}

#[derive(Debug)]
pub(crate) struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub fill: Fill,
}

const fn col(name: &'static str, kind: ColumnKind, fill: Fill) -> Column {
    Column { name, kind, fill }
}

#[derive(Debug)]
pub(crate) struct TableDef {
    pub name: &'static str,
    pub columns: &'static [Column],
    /// Columns that identify one row.
    pub key: &'static [&'static str],
}

use ColumnKind as K;

static PROFILES: TableDef = TableDef {
    name: "profiles",
    columns: &[
        col("id", K::Uuid, Fill::Required),
        col("username", K::Text, Fill::Required),
        col("display_name", K::Text, Fill::Null),
        col("avatar_url", K::Text, Fill::Null),
        col("status_message", K::Text, Fill::Text("")),
        col("is_online", K::Bool, Fill::Bool(false)),
        col("last_seen", K::Timestamp, Fill::Now),
        col("created_at", K::Timestamp, Fill::Now),
        col("updated_at", K::Timestamp, Fill::Now),
    ],
    key: &["id"],
};

static CHATS: TableDef = TableDef {
    name: "chats",
    columns: &[
        col("id", K::Uuid, Fill::NewId),
        col("type", K::Text, Fill::Required),
        col("name", K::Text, Fill::Null),
        col("created_by", K::Uuid, Fill::Required),
        col("created_at", K::Timestamp, Fill::Now),
        col("updated_at", K::Timestamp, Fill::Now),
    ],
    key: &["id"],
};

static CHAT_PARTICIPANTS: TableDef = TableDef {
    name: "chat_participants",
    columns: &[
        col("chat_id", K::Uuid, Fill::Required),
        col("profile_id", K::Uuid, Fill::Required),
        col("joined_at", K::Timestamp, Fill::Now),
    ],
    key: &["chat_id", "profile_id"],
};

static MESSAGES: TableDef = TableDef {
    name: "messages",
    columns: &[
        col("id", K::Uuid, Fill::NewId),
        col("chat_id", K::Uuid, Fill::Required),
        col("sender_id", K::Uuid, Fill::Required),
        col("content", K::Text, Fill::Required),
        col("type", K::Text, Fill::Text("text")),
        col("created_at", K::Timestamp, Fill::Now),
        col("updated_at", K::Timestamp, Fill::Now),
        col("is_encrypted", K::Bool, Fill::Bool(false)),
    ],
    key: &["id"],
};

pub(crate) fn table_def(table: Table) -> &'static TableDef {
    match table {
        Table::Profiles => &PROFILES,
        Table::Chats => &CHATS,
        Table::ChatParticipants => &CHAT_PARTICIPANTS,
        Table::Messages => &MESSAGES,
    }
}

/// Canonical on-disk timestamp format.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_ts() -> String {
    format_ts(Utc::now())
}

impl TableDef {
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| StoreError::Invalid(format!("unknown column {}.{}", self.name, name)))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Quoted, comma-separated column list in catalog order.
    pub fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Read one result row (selected with [`TableDef::select_list`]) into a
    /// JSON object.
    pub fn read_row(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
        let mut obj = Map::with_capacity(self.columns.len());
        for (idx, column) in self.columns.iter().enumerate() {
            let value = match column.kind {
                ColumnKind::Bool => {
                    let raw: Option<i64> = row.get(idx)?;
                    raw.map(|v| Value::Bool(v != 0)).unwrap_or(Value::Null)
                }
                _ => {
                    let raw: Option<String> = row.get(idx)?;
                    raw.map(Value::String).unwrap_or(Value::Null)
                }
            };
            obj.insert(column.name.to_string(), value);
        }
        Ok(Value::Object(obj))
    }

    /// Key filters `(column, value)` identifying `row`.
    pub fn key_of(&self, row: &Value) -> Result<Vec<(&'static str, Value)>> {
        self.key
            .iter()
            .map(|k| {
                row.get(*k)
                    .filter(|v| !v.is_null())
                    .cloned()
                    .map(|v| (*k, v))
                    .ok_or_else(|| StoreError::Invalid(format!("row has no {}.{}", self.name, k)))
            })
            .collect()
    }

    /// Complete an insert payload: reject unknown columns and apply fills.
    pub fn fill_insert(&self, row: &Value) -> Result<Vec<(&'static str, SqlValue)>> {
        let obj = row
            .as_object()
            .ok_or_else(|| StoreError::Invalid(format!("{} row must be an object", self.name)))?;

        if let Some(unknown) = obj.keys().find(|k| !self.has_column(k)) {
            return Err(StoreError::Invalid(format!(
                "unknown column {}.{}",
                self.name, unknown
            )));
        }

        let now = now_ts();
        let mut out = Vec::with_capacity(self.columns.len());
        for column in self.columns {
            let value = match obj.get(column.name) {
                Some(v) if !(v.is_null() && column.fill != Fill::Null) => column.to_sql(v)?,
                _ => match column.fill {
                    Fill::Required => {
                        return Err(StoreError::Invalid(format!(
                            "missing required column {}.{}",
                            self.name, column.name
                        )))
                    }
                    Fill::Null => SqlValue::Null,
                    Fill::NewId => SqlValue::Text(Uuid::new_v4().to_string()),
                    Fill::Now => SqlValue::Text(now.clone()),
                    Fill::Text(t) => SqlValue::Text(t.to_string()),
                    Fill::Bool(b) => SqlValue::Integer(b as i64),
                },
            };
            out.push((column.name, value));
        }
        Ok(out)
    }
}

impl Column {
    /// Convert a JSON value into the SQLite representation for this column.
    pub fn to_sql(&self, value: &Value) -> Result<SqlValue> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let invalid = || StoreError::Invalid(format!("bad value for {}: {}", self.name, value));

        match self.kind {
            ColumnKind::Text => value
                .as_str()
                .map(|s| SqlValue::Text(s.to_string()))
                .ok_or_else(invalid),
            ColumnKind::Uuid => {
                let s = value.as_str().ok_or_else(invalid)?;
                Ok(SqlValue::Text(Uuid::parse_str(s)?.to_string()))
            }
            ColumnKind::Timestamp => {
                let s = value.as_str().ok_or_else(invalid)?;
                let ts = DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc);
                Ok(SqlValue::Text(format_ts(ts)))
            }
            ColumnKind::Bool => match value {
                Value::Bool(b) => Ok(SqlValue::Integer(*b as i64)),
                Value::Number(n) if n.as_i64() == Some(0) || n.as_i64() == Some(1) => {
                    Ok(SqlValue::Integer(n.as_i64().unwrap_or_default()))
                }
                _ => Err(invalid()),
            },
        }
    }
}
