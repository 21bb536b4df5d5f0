use std::marker::PhantomData;
use std::ops::Deref;

use log::{info, trace, warn};
use serde_json::{Map, Value};

use super::FacadeError;
use crate::{
    feed, params,
    query::{self, FilterSpec, QuerySpec, SortSpec},
    registry::Entity,
    repo,
    types::{ChangeEvent, Record},
};

/// Sorting and limiting options of `list`/`filter`.
///
/// Without a sort spec [`params::DEFAULT_SORT`] is used, without a limit the
/// configured default (50 unless overridden) applies. A limit of `0` lifts
/// the cap.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub sort: Option<String>,
    pub limit: Option<u32>,
}

impl ListOptions {
    pub fn sorted(sort: impl Into<String>) -> Self {
        Self {
            sort: Some(sort.into()),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn into_query_spec(self) -> Result<QuerySpec, query::Error> {
        let sort: SortSpec = self
            .sort
            .as_deref()
            .unwrap_or(params::DEFAULT_SORT)
            .parse()?;
        let limit = self
            .limit
            .unwrap_or(params::configurables().default_limit);

        Ok(QuerySpec::new(sort).with_limit(Some(limit)))
    }
}

/// Uniform CRUD and subscription operations bound to one physical collection.
#[derive(Clone)]
pub struct FacadeCollection {
    collection: &'static str,
    repo: repo::Repository,
}

impl FacadeCollection {
    pub fn new(collection: &'static str, repo: repo::Repository) -> Self {
        Self { collection, repo }
    }

    pub fn collection(&self) -> &'static str {
        self.collection
    }

    pub async fn list(&self, opts: ListOptions) -> Result<Vec<Record>, FacadeError> {
        self.filter(FilterSpec::new(), opts).await
    }

    pub async fn filter(
        &self,
        filters: FilterSpec,
        opts: ListOptions,
    ) -> Result<Vec<Record>, FacadeError> {
        let spec = opts.into_query_spec()?.with_filters(filters);
        let query = query::build_query(self.collection, spec);
        Ok(self.repo.list(&query).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Record, FacadeError> {
        Ok(self.repo.get_by_id(self.collection, id).await?)
    }

    pub async fn create(&self, data: Record) -> Result<Record, FacadeError> {
        let record = self.repo.create(self.collection, data).await?;
        info!("created record {:?} in `{}`", record.id(), self.collection);
        Ok(record)
    }

    pub async fn bulk_create(&self, data: Vec<Record>) -> Result<Vec<Record>, FacadeError> {
        let records = self.repo.bulk_create(self.collection, data).await?;
        info!("created {} record(s) in `{}`", records.len(), self.collection);
        Ok(records)
    }

    pub async fn update(&self, id: &str, patch: Record) -> Result<Record, FacadeError> {
        trace!("updating `{}` in `{}`", id, self.collection);
        Ok(self.repo.update(self.collection, id, patch).await?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), FacadeError> {
        warn!("deleting `{}` from `{}`", id, self.collection);
        Ok(self.repo.delete(self.collection, id).await?)
    }

    /// Delivers every subsequent change of the collection to `listener`
    /// until the returned subscription is closed.
    pub async fn subscribe<F>(&self, listener: F) -> Result<feed::Subscription, FacadeError>
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        Ok(self.repo.subscribe(self.collection, listener).await?)
    }

    /// Schema introspection is not supported, always an empty object.
    pub fn schema(&self) -> Value {
        Value::Object(Map::new())
    }
}

/// Facade of entity `E`, its collection is fixed at compile time.
pub struct FacadeEntity<E: Entity> {
    inner: FacadeCollection,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> FacadeEntity<E> {
    pub fn new(repo: repo::Repository) -> Self {
        Self {
            inner: FacadeCollection::new(E::COLLECTION, repo),
            _entity: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        E::NAME
    }
}

impl<E: Entity> Clone for FacadeEntity<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Deref for FacadeEntity<E> {
    type Target = FacadeCollection;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_defaults() {
        let spec = ListOptions::default().into_query_spec().unwrap();
        assert_eq!(spec.sort.to_string(), params::DEFAULT_SORT);
        assert_eq!(spec.limit, Some(params::configurables().default_limit));

        let spec = ListOptions::sorted("title")
            .with_limit(0)
            .into_query_spec()
            .unwrap();
        assert!(!spec.sort.descending);
        assert_eq!(spec.limit, Some(0));

        assert!(ListOptions::sorted("bad field").into_query_spec().is_err());
    }
}
