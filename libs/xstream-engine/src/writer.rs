use std::io;

use xstream_api::broker::StreamBroker;
use xstream_api::entry::{EntryId, Fields};

use crate::error::EngineError;

/// Field name of single-field entries (no delimiter configured).
pub const DEFAULT_FIELD_NAME: &str = "data";

/// Write-side tuning, taken from the table settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    /// Rows packed into one entry, at least 1.
    pub rows_per_message: usize,
    /// Chunk byte size that seals it early, 0 for no byte limit.
    pub max_message_bytes: usize,
    /// Splits a chunk into alternating field/value tokens.
    pub delimiter: Option<u8>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            rows_per_message: 1,
            max_message_bytes: 0,
            delimiter: None,
        }
    }
}

/// Rows being assembled into one entry.
#[derive(Debug, Default)]
struct OutgoingChunk {
    buf: Vec<u8>,
    rows: usize,
}

/// Producer side of the bridge: frames rows into entries and appends them.
///
/// Row bytes arrive through `io::Write`; `count_row` closes a row and seals
/// the chunk once a threshold is reached. `flush_chunk` seals whatever is left.
pub struct StreamWriter {
    broker: Box<dyn StreamBroker>,
    stream: String,
    options: WriterOptions,
    chunk: Option<OutgoingChunk>,
    appended: u64,
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("stream", &self.stream)
            .field("options", &self.options)
            .field("chunk", &self.chunk)
            .field("appended", &self.appended)
            .finish()
    }
}

impl StreamWriter {
    pub fn new(broker: Box<dyn StreamBroker>, stream: impl Into<String>, options: WriterOptions) -> Self {
        Self {
            broker,
            stream: stream.into(),
            options,
            chunk: None,
            appended: 0,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Entries appended so far.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Rows counted into the active chunk.
    pub fn pending_rows(&self) -> usize {
        self.chunk.as_ref().map_or(0, |c| c.rows)
    }

    /// Close the row whose bytes were just written.
    ///
    /// Returns the id of the appended entry when this row sealed the chunk.
    pub fn count_row(&mut self) -> Result<Option<EntryId>, EngineError> {
        let chunk = self.chunk.get_or_insert_with(OutgoingChunk::default);
        chunk.rows += 1;

        let rows_reached = chunk.rows >= self.options.rows_per_message.max(1);
        let bytes_reached =
            self.options.max_message_bytes > 0 && chunk.buf.len() >= self.options.max_message_bytes;
        if rows_reached || bytes_reached {
            self.flush_chunk()
        } else {
            Ok(None)
        }
    }

    /// Write one complete row and count it. Rows inside one chunk are
    /// separated by `\n`.
    pub fn write_row(&mut self, row: &[u8]) -> Result<Option<EntryId>, EngineError> {
        let chunk = self.chunk.get_or_insert_with(OutgoingChunk::default);
        if chunk.rows > 0 {
            chunk.buf.push(b'\n');
        }
        chunk.buf.extend_from_slice(row);
        self.count_row()
    }

    /// Seal the active chunk and append it. No-op without counted rows.
    ///
    /// A chunk that cannot be encoded is dropped with the error. On a broker
    /// failure the chunk stays in place, so the host may retry the flush or
    /// give up with `discard_chunk`.
    pub fn flush_chunk(&mut self) -> Result<Option<EntryId>, EngineError> {
        let Some(chunk) = self.chunk.as_ref().filter(|c| c.rows > 0) else {
            return Ok(None);
        };

        let fields = match encode_chunk(&chunk.buf, self.options.delimiter) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(stream = %self.stream, rows = chunk.rows, "dropping chunk: {e}");
                self.chunk = None;
                return Err(e);
            }
        };
        let id = self
            .broker
            .append(&self.stream, &fields)
            .map_err(|e| e.with_context(format!("append to stream '{}'", self.stream)))?;

        tracing::debug!(
            stream = %self.stream,
            entry = %id,
            rows = chunk.rows,
            bytes = chunk.buf.len(),
            fields = fields.len(),
            "appended entry"
        );
        self.chunk = None;
        self.appended += 1;
        Ok(Some(id))
    }

    /// Drop the active chunk without appending it. Returns the rows dropped.
    pub fn discard_chunk(&mut self) -> usize {
        self.chunk.take().map_or(0, |c| c.rows)
    }
}

impl io::Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.chunk
            .get_or_insert_with(OutgoingChunk::default)
            .buf
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_chunk().map(|_| ()).map_err(io::Error::other)
    }
}

/// Turn raw chunk bytes into entry fields.
///
/// Without a delimiter the bytes become one `data` field unchanged. With a
/// delimiter every non-empty line is split on it and the tokens are paired
/// up as field, value, field, value...
pub fn encode_chunk(raw: &[u8], delimiter: Option<u8>) -> Result<Fields, EngineError> {
    let Some(delim) = delimiter else {
        let mut fields = Fields::new();
        fields.push(DEFAULT_FIELD_NAME, raw.to_vec());
        return Ok(fields);
    };

    let tokens: Vec<&[u8]> = raw
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .flat_map(|line| line.split(move |&b| b == delim))
        .collect();

    if tokens.len() % 2 != 0 {
        return Err(EngineError::Payload(format!(
            "odd number of tokens ({}) for field/value pairs with delimiter '{}'",
            tokens.len(),
            delim as char
        )));
    }

    Ok(tokens
        .chunks_exact(2)
        .map(|pair| (pair[0].to_vec(), pair[1].to_vec()))
        .collect())
}
