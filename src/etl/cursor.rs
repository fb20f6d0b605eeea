//! Continuation cursors and the store that tracks the current position

use chrono::{DateTime, Utc};
use eyre::Result;
use serde_json::{Map, Value};

/// Opaque position marker for the next page to fetch.
///
/// Each variant carries the identity of the table or shard it was issued
/// for, so a cursor can never be presented to a different source.
#[derive(Clone, Debug, PartialEq)]
pub enum Cursor {
    /// Position in a table scan; `start_key` is the key of the last item
    /// seen, or `None` for the first page.
    Offset {
        table: String,
        start_key: Option<Map<String, Value>>,
    },
    /// Shard iterator token, replaced after every fetch.
    Shard {
        stream: String,
        shard_id: String,
        iterator: String,
    },
}

impl Cursor {
    /// Cursor for the first page of a table scan
    pub fn table_start(table: impl Into<String>) -> Self {
        Self::Offset {
            table: table.into(),
            start_key: None,
        }
    }

    /// Returns true if both cursors address the same table or shard
    pub fn same_scope(&self, other: &Cursor) -> bool {
        match (self, other) {
            (Self::Offset { table: a, .. }, Self::Offset { table: b, .. }) => a == b,
            (
                Self::Shard {
                    stream: a,
                    shard_id: sa,
                    ..
                },
                Self::Shard {
                    stream: b,
                    shard_id: sb,
                    ..
                },
            ) => a == b && sa == sb,
            _ => false,
        }
    }

    /// An offset cursor with an absent or empty key marks the end of a scan.
    fn is_terminal(&self) -> bool {
        match self {
            Self::Offset { start_key, .. } => start_key.as_ref().is_none_or(|key| key.is_empty()),
            Self::Shard { .. } => false,
        }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offset {
                table,
                start_key: None,
            } => write!(f, "{} (start)", table),
            Self::Offset {
                table,
                start_key: Some(key),
            } => write!(f, "{} after {}", table, Value::Object(key.clone())),
            Self::Shard {
                stream,
                shard_id,
                iterator,
            } => {
                let short: String = iterator.chars().take(16).collect();
                write!(f, "{}/{} iterator {}…", stream, shard_id, short)
            }
        }
    }
}

/// Where a run starts reading.
///
/// Resolved once into the backend's native cursor before the first fetch.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum StartPosition {
    /// The logical beginning of the data set
    #[default]
    Beginning,
    /// The first record written at or after this instant
    AtTimestamp(DateTime<Utc>),
}

/// Holds the single continuation cursor for a run.
///
/// The cursor only moves through [`CursorStore::advance`], which the
/// extraction loop calls after a page has been fully processed.
#[derive(Debug)]
pub struct CursorStore {
    current: Cursor,
    exhausted: bool,
}

impl CursorStore {
    /// Seed the store with a starting cursor
    pub fn new(start: Cursor) -> Self {
        Self {
            current: start,
            exhausted: false,
        }
    }

    /// The position of the next fetch
    pub fn current(&self) -> &Cursor {
        &self.current
    }

    /// Move to the cursor returned with the last page.
    ///
    /// `None` (or an offset cursor without a key) marks the store as
    /// exhausted and keeps the last confirmed position.
    ///
    /// # Errors
    /// Returns an error if `next` addresses a different table or shard.
    pub fn advance(&mut self, next: Option<Cursor>) -> Result<()> {
        match next {
            None => self.exhausted = true,
            Some(next) => {
                if !self.current.same_scope(&next) {
                    eyre::bail!(
                        "Refusing to move cursor from {} to foreign position {}",
                        self.current,
                        next
                    );
                }
                if next.is_terminal() {
                    self.exhausted = true;
                } else {
                    self.current = next;
                }
            }
        }
        Ok(())
    }

    /// Returns true once the backend reported that no further data is reachable
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
