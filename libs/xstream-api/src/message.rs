use serde::Serialize;

use crate::entry::{Entry, EntryId, Fields};

/// Client-side projection of a stream entry, handed to the row-producing layer.
///
/// `payload` is the entry's field/value content flattened into one JSON object
/// string; `fields` keeps the raw pairs for hosts that want them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    #[serde(rename = "_stream")]
    pub stream: String,
    #[serde(rename = "_key")]
    pub id: EntryId,
    #[serde(rename = "_timestamp")]
    pub timestamp: u64,
    #[serde(rename = "_sequence_number")]
    pub sequence: u64,
    pub payload: String,
    #[serde(skip)]
    pub fields: Fields,
}

impl Message {
    pub fn from_entry(stream: &str, entry: Entry) -> Self {
        Self {
            stream: stream.to_string(),
            id: entry.id,
            timestamp: entry.id.ms,
            sequence: entry.id.seq,
            payload: entry.fields.to_payload(),
            fields: entry.fields,
        }
    }
}
