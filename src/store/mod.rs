//! # Store Module
//!
//! The [`Store`] trait is the seam between this layer and the backing data
//! store's native client. Two implementations are provided:
//!
//! * [`PgStore`], backed by a `sqlx` PostgreSQL pool, receiving row changes
//!   through `LISTEN/NOTIFY` (see [`PgStore::install_change_feed`]);
//! * [`MemoryStore`], a process-local store used as a test double and for
//!   local tooling.
//!
//! Stores are handed over explicitly (see [`StoreRef`]), there is no global
//! client.

mod memory;
pub use memory::*;

mod postgres;
pub use postgres::*;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{query, types::Record};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("record `{id}` not found in `{collection}`")]
    NotFound { collection: String, id: String },
    #[error("record `{id}` already exists in `{collection}`")]
    Conflict { collection: String, id: String },
    #[error("expected {expected} row(s) from `{collection}`, got {got}")]
    UnexpectedRows {
        collection: String,
        expected: usize,
        got: usize,
    },
    #[error("database error :: {0}")]
    Native(#[from] sqlx::Error),
    #[error("malformed change payload :: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("query error :: {0}")]
    Query(#[from] query::Error),
    #[error("change feed of `{collection}` lost its connection")]
    FeedLost { collection: String },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NativeEventType {
    Insert,
    Update,
    Delete,
}

/// A row change as emitted by the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeChange {
    #[serde(rename = "eventType")]
    pub event_type: NativeEventType,
    #[serde(default)]
    pub table: Option<String>,
    /// Row after the change, absent for deletions
    #[serde(default)]
    pub new: Option<Record>,
    /// Row before the change, absent for insertions
    #[serde(default)]
    pub old: Option<Record>,
    /// Set when `new` was reduced to its id to fit the notification payload
    #[serde(default)]
    pub truncated: bool,
}

impl NativeChange {
    pub fn insert(table: &str, new: Record) -> Self {
        Self {
            event_type: NativeEventType::Insert,
            table: Some(table.to_owned()),
            new: Some(new),
            old: None,
            truncated: false,
        }
    }

    pub fn update(table: &str, new: Record, old: Record) -> Self {
        Self {
            event_type: NativeEventType::Update,
            table: Some(table.to_owned()),
            new: Some(new),
            old: Some(old),
            truncated: false,
        }
    }

    pub fn delete(table: &str, old: Record) -> Self {
        Self {
            event_type: NativeEventType::Delete,
            table: Some(table.to_owned()),
            new: None,
            old: Some(old),
            truncated: false,
        }
    }
}

/// Stream of native row changes of a single collection.
pub type NativeChangeStream = BoxStream<'static, Result<NativeChange, Error>>;

/// Native client of the backing store.
///
/// Operations report what the store did (matched rows, affected counts);
/// interpreting empty results as errors is left to the caller.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Runs a translated read.
    async fn select(&self, query: &query::NativeQuery) -> Result<Vec<Record>, Error>;

    /// Returns every row of `collection` whose primary key equals `id`.
    async fn select_by_id(&self, collection: &str, id: &str) -> Result<Vec<Record>, Error>;

    /// Inserts `rows` in a single batch, returning the stored rows including
    /// server-assigned fields. Either every row is inserted or none is.
    async fn insert(&self, collection: &str, rows: Vec<Record>) -> Result<Vec<Record>, Error>;

    /// Applies `patch` to the row identified by `id`, returning the updated rows.
    async fn update(&self, collection: &str, id: &str, patch: Record)
    -> Result<Vec<Record>, Error>;

    /// Deletes the row identified by `id`, returning the number of deleted rows.
    async fn delete(&self, collection: &str, id: &str) -> Result<u64, Error>;

    /// Opens the native change stream of `collection`.
    ///
    /// Only changes committed after this call returns are delivered.
    async fn changes(&self, collection: &str) -> Result<NativeChangeStream, Error>;
}

pub type StoreRef = Arc<dyn Store>;

/// Replaces the stub row of a truncated change with the row currently
/// stored under its id.
///
/// Changes that are not truncated, deletions, and rows gone by the time they
/// are read back are returned as they are.
pub async fn complete_truncated(
    store: &dyn Store,
    collection: &str,
    mut change: NativeChange,
) -> Result<NativeChange, Error> {
    if !change.truncated || change.event_type == NativeEventType::Delete {
        return Ok(change);
    }

    let Some(id) = change.new.as_ref().and_then(Record::id) else {
        return Ok(change);
    };

    let mut rows = store.select_by_id(collection, &id).await?;
    if rows.len() == 1 {
        change.new = rows.pop();
        change.truncated = false;
    } else {
        debug!("truncated row `{id}` of `{collection}` could not be read back");
    }
    Ok(change)
}
