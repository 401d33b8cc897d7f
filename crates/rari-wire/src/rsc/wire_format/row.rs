use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::Value as JsonValue;
use tracing::trace;

use crate::error::{RenderError, RscError};

/// Row id of the root payload. Every stream starts with it.
pub const ROOT_ROW_ID: u32 = 0;

const SLOT_REF_PREFIX: &str = "$@";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowTag {
    Model,
    Error,
}

impl RowTag {
    pub fn tag_char(&self) -> Option<char> {
        match self {
            Self::Model => None,
            Self::Error => Some('E'),
        }
    }

    pub fn format_row(&self, row_id: u32, data: &str) -> String {
        match self.tag_char() {
            Some(tag) => format!("{}:{}{}\n", row_id, tag, data),
            None => format!("{}:{}\n", row_id, data),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowPayload {
    Model(JsonValue),
    Error(RenderError),
}

/// One newline-terminated unit of the wire stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: u32,
    pub payload: RowPayload,
}

impl Row {
    pub fn model(id: u32, value: JsonValue) -> Self {
        Self { id, payload: RowPayload::Model(value) }
    }

    pub fn error(id: u32, error: RenderError) -> Self {
        Self { id, payload: RowPayload::Error(error) }
    }

    pub fn parse_line(line: &str) -> Result<Self, RscError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (id_str, data) = line.split_once(':').ok_or_else(|| {
            RscError::decoding(format!("Invalid row format: missing colon in '{}'", truncate(line)))
        })?;

        let id = id_str
            .parse::<u32>()
            .map_err(|e| RscError::decoding(format!("Invalid row ID '{}': {}", id_str, e)))?;

        if let Some(error_json) = data.strip_prefix('E') {
            let error: RenderError = serde_json::from_str(error_json).map_err(|e| {
                RscError::decoding(format!("Invalid error payload in row {}: {}", id, e))
            })?;
            return Ok(Self::error(id, error));
        }

        let value: JsonValue = serde_json::from_str(data)
            .map_err(|e| RscError::decoding(format!("Invalid JSON in row {}: {}", id, e)))?;

        Ok(Self::model(id, value))
    }

    pub fn to_line(&self) -> Result<String, RscError> {
        let (tag, data) = match &self.payload {
            RowPayload::Model(value) => (RowTag::Model, serde_json::to_string(value)),
            RowPayload::Error(error) => (RowTag::Error, serde_json::to_string(error)),
        };
        let data = data.map_err(|e| {
            RscError::encoding(format!("Failed to serialize row {}: {}", self.id, e))
        })?;
        Ok(tag.format_row(self.id, &data))
    }
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(64) {
        Some((index, _)) => &line[..index],
        None => line,
    }
}

pub fn format_slot_ref(row_id: u32) -> String {
    format!("{SLOT_REF_PREFIX}{row_id}")
}

pub fn parse_slot_ref(value: &str) -> Option<u32> {
    value.strip_prefix(SLOT_REF_PREFIX)?.parse().ok()
}

/// Parses a complete payload held in memory.
pub fn parse_rows(payload: &str) -> Result<Vec<Row>, RscError> {
    payload.lines().filter(|line| !line.trim().is_empty()).map(Row::parse_line).collect()
}

/// Splits a chunked byte stream into rows. Chunk boundaries may fall
/// anywhere, including inside a multi-byte character.
pub struct RowReader<S> {
    stream: S,
    buffer: BytesMut,
    max_row_bytes: usize,
    finished: bool,
    rows_read: usize,
}

impl<S> RowReader<S>
where
    S: Stream<Item = Result<Bytes, RscError>> + Unpin,
{
    pub fn new(stream: S, max_row_bytes: usize) -> Self {
        Self { stream, buffer: BytesMut::new(), max_row_bytes, finished: false, rows_read: 0 }
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Returns the next row, or `None` once the stream has ended cleanly.
    /// Cancel-safe: bytes already pulled from the stream stay buffered.
    pub async fn next_row(&mut self) -> Result<Option<Row>, RscError> {
        loop {
            if let Some(line) = self.take_line()? {
                if line.is_empty() {
                    continue;
                }
                let row = Row::parse_line(&line)?;
                self.rows_read += 1;
                trace!("Read row {} ({} bytes)", row.id, line.len());
                return Ok(Some(row));
            }

            if self.finished {
                return Ok(None);
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    self.buffer.extend_from_slice(&chunk);
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Err(e);
                }
                None => {
                    self.finished = true;
                }
            }
        }
    }

    fn take_line(&mut self) -> Result<Option<String>, RscError> {
        let line_end = self.buffer.iter().position(|&b| b == b'\n');

        let line = match line_end {
            Some(pos) => {
                if pos > self.max_row_bytes {
                    return Err(self.oversized());
                }
                let line = self.buffer.split_to(pos);
                self.buffer.advance(1);
                line
            }
            None if self.buffer.len() > self.max_row_bytes => return Err(self.oversized()),
            None if self.finished && !self.buffer.is_empty() => self.buffer.split(),
            None => return Ok(None),
        };

        let text = std::str::from_utf8(&line)?;
        Ok(Some(text.trim_end_matches('\r').to_string()))
    }

    fn oversized(&self) -> RscError {
        RscError::decoding(format!(
            "Row exceeds the maximum size of {} bytes",
            self.max_row_bytes
        ))
    }
}
