//! # CRUD Executor
//!
//! [`Repository`] issues reads and writes against the injected store for a
//! given physical collection. Store errors are returned as they are: there is
//! no retry, backoff or translation at this level.

pub mod facades;

use log::{debug, trace};
use serde_json::Value;

use crate::{
    auth::AuthResolver,
    feed,
    query::NativeQuery,
    store::{self, StoreRef},
    types::{ChangeEvent, FIELD_CREATED_BY, Record},
};

#[derive(Clone)]
pub struct Repository {
    store: StoreRef,
    auth: AuthResolver,
}

impl Repository {
    pub fn new(store: StoreRef, auth: AuthResolver) -> Self {
        Self { store, auth }
    }

    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    pub fn auth(&self) -> &AuthResolver {
        &self.auth
    }

    /// Runs `query`, an empty match is an empty vec.
    pub async fn list(&self, query: &NativeQuery) -> Result<Vec<Record>, store::Error> {
        self.store.select(query).await
    }

    /// Fetches exactly one row, anything else is reported as not found.
    pub async fn get_by_id(&self, collection: &str, id: &str) -> Result<Record, store::Error> {
        let mut rows = self.store.select_by_id(collection, id).await?;
        if rows.len() != 1 {
            debug!(
                "`{}` lookup of `{}` matched {} row(s)",
                collection,
                id,
                rows.len()
            );
            return Err(not_found(collection, id));
        }
        Ok(rows.remove(0))
    }

    /// Inserts `data` stamped with the current owner.
    pub async fn create(&self, collection: &str, data: Record) -> Result<Record, store::Error> {
        let owner = self.auth.owner_stamp().await;
        let mut rows = self
            .store
            .insert(collection, vec![stamp(data, owner.as_deref())])
            .await?;

        if rows.len() != 1 {
            return Err(store::Error::UnexpectedRows {
                collection: collection.to_owned(),
                expected: 1,
                got: rows.len(),
            });
        }

        let record = rows.remove(0);
        trace!("created {:?} in `{}`", record.id(), collection);
        Ok(record)
    }

    /// Inserts every element of `data` in one batch, all stamped with the
    /// same owner. The batch is all-or-nothing.
    pub async fn bulk_create(
        &self,
        collection: &str,
        data: Vec<Record>,
    ) -> Result<Vec<Record>, store::Error> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let owner = self.auth.owner_stamp().await;
        let rows: Vec<Record> = data
            .into_iter()
            .map(|r| stamp(r, owner.as_deref()))
            .collect();

        let count = rows.len();
        let created = self.store.insert(collection, rows).await?;
        if created.len() != count {
            return Err(store::Error::UnexpectedRows {
                collection: collection.to_owned(),
                expected: count,
                got: created.len(),
            });
        }

        trace!("created {} row(s) in `{}`", count, collection);
        Ok(created)
    }

    /// Applies a partial patch, returning the full updated record.
    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Record,
    ) -> Result<Record, store::Error> {
        let mut rows = self.store.update(collection, id, patch).await?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            0 => Err(not_found(collection, id)),
            got => Err(store::Error::UnexpectedRows {
                collection: collection.to_owned(),
                expected: 1,
                got,
            }),
        }
    }

    /// Hard delete, deleting a missing id is an error.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<(), store::Error> {
        if self.store.delete(collection, id).await? == 0 {
            return Err(not_found(collection, id));
        }
        trace!("deleted `{}` from `{}`", id, collection);
        Ok(())
    }

    pub async fn subscribe<F>(
        &self,
        collection: &str,
        listener: F,
    ) -> Result<feed::Subscription, store::Error>
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        feed::subscribe(&self.store, collection, listener).await
    }
}

fn not_found(collection: &str, id: &str) -> store::Error {
    store::Error::NotFound {
        collection: collection.to_owned(),
        id: id.to_owned(),
    }
}

/// Sets the owner field, overriding any value provided by the caller.
fn stamp(mut data: Record, owner: Option<&str>) -> Record {
    data.insert(FIELD_CREATED_BY, owner.map_or(Value::Null, Value::from));
    data
}
