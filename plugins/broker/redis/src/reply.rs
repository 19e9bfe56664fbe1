//! Decoding of Redis stream command replies.
//!
//! Accepts both RESP2 (nested arrays) and RESP3 (maps) shapes.

use redis::Value;

use xstream_api::broker::PendingRecord;
use xstream_api::entry::{Entry, EntryId, Fields, StreamEntries};
use xstream_api::error::BrokerError;

fn unexpected(what: &str, value: &Value) -> BrokerError {
    BrokerError::protocol(format!("unexpected {what} reply: {value:?}"))
}

pub(crate) fn bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::BulkString(b) => Some(b),
        Value::SimpleString(s) => Some(s.as_bytes()),
        Value::VerbatimString { text, .. } => Some(text.as_bytes()),
        _ => None,
    }
}

fn string(value: &Value, what: &str) -> Result<String, BrokerError> {
    bytes(value)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok_or_else(|| unexpected(what, value))
}

pub(crate) fn int(value: &Value, what: &str) -> Result<u64, BrokerError> {
    match value {
        Value::Int(i) => u64::try_from(*i).map_err(|_| unexpected(what, value)),
        other => string(other, what)?
            .parse::<u64>()
            .map_err(|_| unexpected(what, value)),
    }
}

pub(crate) fn entry_id(value: &Value) -> Result<EntryId, BrokerError> {
    EntryId::parse(&string(value, "entry id")?)
}

/// `[field, value, field, value, ...]` or a RESP3 map.
fn fields(value: &Value) -> Result<Fields, BrokerError> {
    let mut out = Fields::new();
    match value {
        Value::Array(items) => {
            if items.len() % 2 != 0 {
                return Err(unexpected("field list", value));
            }
            for pair in items.chunks_exact(2) {
                let name = bytes(&pair[0]).ok_or_else(|| unexpected("field name", &pair[0]))?;
                let val = bytes(&pair[1]).ok_or_else(|| unexpected("field value", &pair[1]))?;
                out.push(name.to_vec(), val.to_vec());
            }
        }
        Value::Map(pairs) => {
            for (k, v) in pairs {
                let name = bytes(k).ok_or_else(|| unexpected("field name", k))?;
                let val = bytes(v).ok_or_else(|| unexpected("field value", v))?;
                out.push(name.to_vec(), val.to_vec());
            }
        }
        other => return Err(unexpected("field list", other)),
    }
    Ok(out)
}

/// `[[id, [fields]], ...]`. Entries whose fields are nil (deleted from the
/// stream while still pending) are skipped.
pub(crate) fn entries(value: &Value) -> Result<Vec<Entry>, BrokerError> {
    let items = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => return Err(unexpected("entry list", other)),
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Array(parts) if parts.len() == 2 => {
                if matches!(parts[1], Value::Nil) {
                    continue;
                }
                out.push(Entry {
                    id: entry_id(&parts[0])?,
                    fields: fields(&parts[1])?,
                });
            }
            Value::Nil => continue,
            other => return Err(unexpected("entry", other)),
        }
    }
    Ok(out)
}

/// XREADGROUP reply: nil on timeout, else `[[stream, [entries]], ...]`
/// (RESP2) or `{stream: [entries]}` (RESP3).
pub(crate) fn read_group(value: &Value) -> Result<Vec<StreamEntries>, BrokerError> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Array(parts) if parts.len() == 2 => Ok(StreamEntries {
                    stream: string(&parts[0], "stream name")?,
                    entries: entries(&parts[1])?,
                }),
                other => Err(unexpected("stream reply", other)),
            })
            .collect(),
        Value::Map(pairs) => pairs
            .iter()
            .map(|(k, v)| {
                Ok(StreamEntries {
                    stream: string(k, "stream name")?,
                    entries: entries(v)?,
                })
            })
            .collect(),
        other => Err(unexpected("XREADGROUP", other)),
    }
}

/// Extended XPENDING reply: `[[id, consumer, idle_ms, deliveries], ...]`.
pub(crate) fn pending(stream: &str, value: &Value) -> Result<Vec<PendingRecord>, BrokerError> {
    let items = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => return Err(unexpected("XPENDING", other)),
    };

    items
        .iter()
        .map(|item| match item {
            Value::Array(parts) if parts.len() == 4 => Ok(PendingRecord {
                stream: stream.to_string(),
                id: entry_id(&parts[0])?,
                consumer: string(&parts[1], "consumer")?,
                idle_ms: int(&parts[2], "idle time")?,
                delivery_count: int(&parts[3], "delivery count")?,
            }),
            other => Err(unexpected("pending entry", other)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    fn entry(id: &str, kv: &[&str]) -> Value {
        Value::Array(vec![bulk(id), Value::Array(kv.iter().map(|s| bulk(s)).collect())])
    }

    #[test]
    fn read_group_resp2() {
        let reply = Value::Array(vec![
            Value::Array(vec![
                bulk("a"),
                Value::Array(vec![entry("1-0", &["k", "v"]), entry("2-0", &["k", "w"])]),
            ]),
            Value::Array(vec![bulk("b"), Value::Array(vec![entry("1-5", &["x", "y"])])]),
        ]);
        let streams = read_group(&reply).unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].stream, "a");
        assert_eq!(streams[0].entries[1].id, EntryId::new(2, 0));
        assert_eq!(streams[1].entries[0].fields.get("x"), Some(&b"y"[..]));
    }

    #[test]
    fn read_group_resp3_map() {
        let reply = Value::Map(vec![(bulk("a"), Value::Array(vec![entry("3-1", &["k", "v"])]))]);
        let streams = read_group(&reply).unwrap();
        assert_eq!(streams[0].entries[0].id, EntryId::new(3, 1));
    }

    #[test]
    fn read_group_timeout_is_empty() {
        assert!(read_group(&Value::Nil).unwrap().is_empty());
    }

    #[test]
    fn claim_reply_skips_deleted_entries() {
        let reply = Value::Array(vec![
            entry("1-0", &["k", "v"]),
            Value::Array(vec![bulk("2-0"), Value::Nil]),
        ]);
        let got = entries(&reply).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, EntryId::new(1, 0));
    }

    #[test]
    fn pending_reply() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("5-0"),
            bulk("worker-1"),
            Value::Int(12000),
            Value::Int(3),
        ])]);
        let records = pending("s", &reply).unwrap();
        assert_eq!(records[0].consumer, "worker-1");
        assert_eq!(records[0].idle_ms, 12000);
        assert_eq!(records[0].delivery_count, 3);
    }

    #[test]
    fn malformed_replies_are_protocol_errors() {
        let err = read_group(&Value::Int(1)).unwrap_err();
        assert_eq!(err.kind(), xstream_api::error::ErrorKind::Protocol);

        let odd = Value::Array(vec![entry("1-0", &["k"])]);
        assert!(entries(&odd).is_err());

        assert!(pending("s", &Value::Array(vec![Value::Array(vec![bulk("1-0")])])).is_err());
    }
}
