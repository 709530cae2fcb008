//! Decoding of backend rows into domain models.

use parley_shared::ChangeEvent;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

pub(crate) fn decode_row<T: DeserializeOwned>(row: Value) -> Result<T> {
    Ok(serde_json::from_value(row)?)
}

pub(crate) fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter().map(decode_row).collect()
}

/// Decode the row a change event is about.
pub(crate) fn decode_event<T: DeserializeOwned>(event: &ChangeEvent) -> Option<T> {
    serde_json::from_value(event.record()?.clone()).ok()
}

/// The `id` column of the row a change event is about.
pub(crate) fn event_id<T>(event: &ChangeEvent) -> Option<T>
where
    T: From<uuid::Uuid>,
{
    let id = event.record()?.get("id")?.as_str()?;
    uuid::Uuid::parse_str(id).ok().map(T::from)
}
