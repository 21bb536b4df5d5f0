//! In-memory store.
//!
//! Rows live in per-collection vectors guarded by a single async lock, row
//! changes are fanned out to subscribers through a broadcast channel per
//! collection. Reads evaluate [`NativeQuery`] directly, mimicking the
//! PostgreSQL backend: nulls sort after every other value in ascending
//! order and before them in descending order.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::StreamExt;
use log::{trace, warn};
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

use super::{Error, NativeChange, NativeChangeStream, Store};
use crate::{
    params,
    query::NativeQuery,
    types::{FIELD_CREATED_DATE, FIELD_ID, FIELD_UPDATED_DATE, Record},
};

struct Collection {
    rows: Vec<Record>,
    changes: broadcast::Sender<NativeChange>,
}

impl Collection {
    fn new(buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(buffer);
        Self {
            rows: Vec::new(),
            changes,
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| r.id().as_deref() == Some(id))
    }

    fn emit(&self, change: NativeChange) {
        // sending fails only when nobody is listening
        let _ = self.changes.send(change);
    }
}

pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    buffer: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_buffer(params::configurables().change_buffer)
    }

    /// Creates a store whose change channels retain up to `buffer` undelivered events
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Publishes a raw native change on `collection` without touching stored rows.
    ///
    /// Useful to replay or duplicate events when exercising change consumers.
    pub async fn inject(&self, collection: &str, change: NativeChange) {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_owned())
            .or_insert_with(|| Collection::new(self.buffer))
            .emit(change);
    }

    /// Number of rows currently stored in `collection`
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.rows.len())
            .unwrap_or_default()
    }
}

fn now() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

/// Rank used to order values of different JSON types
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}

/// Ascending order of two (possibly missing) field values, missing and null
/// values being the greatest.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);

    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (a, b) => type_rank(a).cmp(&type_rank(b)),
    }
}

fn evaluate(rows: &[Record], query: &NativeQuery) -> Vec<Record> {
    let mut matching: Vec<Record> = rows
        .iter()
        .filter(|r| {
            query
                .predicates
                .iter()
                .all(|p| r.get(p.field.name()).is_some_and(|v| p.value.matches(v)))
        })
        .cloned()
        .collect();

    let field = query.order.field.name();
    matching.sort_by(|a, b| {
        let ord = compare_values(a.get(field), b.get(field));
        if query.order.descending {
            ord.reverse()
        } else {
            ord
        }
    });

    if let Some(limit) = query.limit {
        matching.truncate(limit as usize);
    }

    matching
}

#[async_trait]
impl Store for MemoryStore {
    async fn select(&self, query: &NativeQuery) -> Result<Vec<Record>, Error> {
        let collections = self.collections.read().await;
        let rows = collections
            .get(&query.collection)
            .map(|c| evaluate(&c.rows, query))
            .unwrap_or_default();

        trace!("selected {} row(s) from `{}`", rows.len(), query.collection);
        Ok(rows)
    }

    async fn select_by_id(&self, collection: &str, id: &str) -> Result<Vec<Record>, Error> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|c| {
                c.rows
                    .iter()
                    .filter(|r| r.id().as_deref() == Some(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, rows: Vec<Record>) -> Result<Vec<Record>, Error> {
        let mut collections = self.collections.write().await;
        let target = collections
            .entry(collection.to_owned())
            .or_insert_with(|| Collection::new(self.buffer));

        // Validate the whole batch before touching stored rows, a rejected
        // batch leaves the collection untouched
        let mut batch_ids = HashSet::new();
        let mut prepared = Vec::with_capacity(rows.len());
        for mut row in rows {
            let id = match row.id() {
                Some(id) => id,
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    row.insert(FIELD_ID, id.clone());
                    id
                }
            };

            if target.position(&id).is_some() || !batch_ids.insert(id.clone()) {
                return Err(Error::Conflict {
                    collection: collection.to_owned(),
                    id,
                });
            }

            let ts = now();
            row.insert(FIELD_CREATED_DATE, ts.clone());
            row.insert(FIELD_UPDATED_DATE, ts);
            prepared.push(row);
        }

        for row in &prepared {
            target.rows.push(row.clone());
            target.emit(NativeChange::insert(collection, row.clone()));
        }

        trace!("inserted {} row(s) into `{}`", prepared.len(), collection);
        Ok(prepared)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        mut patch: Record,
    ) -> Result<Vec<Record>, Error> {
        let mut collections = self.collections.write().await;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(Vec::new());
        };
        let Some(pos) = target.position(id) else {
            return Ok(Vec::new());
        };

        // primary keys are not patchable
        patch.remove(FIELD_ID);
        if patch.is_empty() {
            return Ok(vec![target.rows[pos].clone()]);
        }

        let old = target.rows[pos].clone();
        let row = &mut target.rows[pos];
        row.merge(patch);
        row.insert(FIELD_UPDATED_DATE, now());
        let new = row.clone();

        target.emit(NativeChange::update(collection, new.clone(), old));
        Ok(vec![new])
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<u64, Error> {
        let mut collections = self.collections.write().await;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let Some(pos) = target.position(id) else {
            return Ok(0);
        };

        let old = target.rows.remove(pos);
        target.emit(NativeChange::delete(collection, old));
        Ok(1)
    }

    async fn changes(&self, collection: &str) -> Result<NativeChangeStream, Error> {
        let mut collections = self.collections.write().await;
        let rx = collections
            .entry(collection.to_owned())
            .or_insert_with(|| Collection::new(self.buffer))
            .changes
            .subscribe();

        let collection = collection.to_owned();
        let stream = futures::stream::unfold(rx, move |mut rx| {
            let collection = collection.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(change) => return Some((Ok(change), rx)),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("change stream of `{collection}` lagged, {n} event(s) dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
