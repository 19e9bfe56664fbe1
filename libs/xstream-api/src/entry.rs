use std::fmt;
use std::str::FromStr;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::BrokerError;

/// Stream entry id assigned by the broker: `(timestamp_ms, sequence)`.
///
/// Ordering follows the broker: by milliseconds, then by sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    /// Milliseconds timestamp.
    pub ms: u64,
    /// Sequence number within the millisecond.
    pub seq: u64,
}

impl EntryId {
    /// The smallest possible id (`0-0`).
    pub const MIN: EntryId = EntryId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Parse `ms-seq`, or a bare `ms` (sequence 0).
    pub fn parse(s: &str) -> Result<Self, BrokerError> {
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        let ms = ms
            .parse()
            .map_err(|e| BrokerError::protocol(format!("invalid entry id '{s}': {e}")))?;
        let seq = seq
            .parse()
            .map_err(|e| BrokerError::protocol(format!("invalid entry id '{s}': {e}")))?;
        Ok(Self { ms, seq })
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for EntryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Ordered field/value pairs of one entry.
///
/// Kept as a list: field order is significant and names may repeat.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fields(Vec<(Vec<u8>, Vec<u8>)>);

impl Fields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Value of the first field called `name`.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|(k, _)| k == name.as_bytes())
            .map(|(_, v)| v.as_slice())
    }

    pub fn into_inner(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.0
    }

    /// Flatten into a JSON object string, field order preserved.
    ///
    /// Names and values are decoded as UTF-8 (invalid sequences replaced).
    pub fn to_payload(&self) -> String {
        // Serializing string keys and values into a String cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(&String::from_utf8_lossy(k), &String::from_utf8_lossy(v))?;
        }
        map.end()
    }
}

impl<K: Into<Vec<u8>>, V: Into<Vec<u8>>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One entry of a stream as returned by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub fields: Fields,
}

/// Entries of one stream in a read-group reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntries {
    pub stream: String,
    pub entries: Vec<Entry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_and_bare_ids() {
        assert_eq!(EntryId::parse("1526919030474-55").unwrap(), EntryId::new(1526919030474, 55));
        assert_eq!(EntryId::parse("17").unwrap(), EntryId::new(17, 0));
        assert!(EntryId::parse("abc-1").is_err());
        assert!(EntryId::parse("1-").is_err());
    }

    #[test]
    fn ids_order_by_ms_then_seq() {
        let mut ids = vec![EntryId::new(2, 0), EntryId::new(1, 5), EntryId::new(1, 2)];
        ids.sort();
        assert_eq!(ids, vec![EntryId::new(1, 2), EntryId::new(1, 5), EntryId::new(2, 0)]);
        assert_eq!(EntryId::new(10, 3).to_string(), "10-3");
    }

    #[test]
    fn payload_keeps_field_order() {
        let fields: Fields = [("zeta", "1"), ("alpha", "2")].into_iter().collect();
        assert_eq!(fields.to_payload(), r#"{"zeta":"1","alpha":"2"}"#);
        assert_eq!(fields.get("alpha"), Some(&b"2"[..]));
        assert_eq!(fields.get("missing"), None);
    }

    #[test]
    fn payload_escapes_and_replaces_invalid_utf8() {
        let mut fields = Fields::new();
        fields.push("q", "say \"hi\"");
        fields.push(b"raw".to_vec(), vec![0xff, b'a']);
        assert_eq!(fields.to_payload(), "{\"q\":\"say \\\"hi\\\"\",\"raw\":\"\u{fffd}a\"}");
    }
}
