//! Query translation.
//!
//! A [`QuerySpec`] (sort, equality filters, limit) is translated into a
//! store-agnostic [`NativeQuery`] by [`build_query`]; store backends then
//! either evaluate it directly (in-memory) or render it through the
//! [`ClausesCompiler`] (PostgreSQL).

mod filter;
pub use filter::*;

mod builder;
pub use builder::*;

use log::trace;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad field `{field}`, expected a plain identifier")]
    BadField { field: String },
    #[error("filter value for `{field}` is not a scalar")]
    NonScalarValue { field: String },
}

/// Caller-side description of a read.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub sort: SortSpec,
    pub filters: FilterSpec,
    /// Maximum number of rows, `Some(0)` is treated as no limit
    pub limit: Option<u32>,
}

impl QuerySpec {
    pub fn new(sort: SortSpec) -> Self {
        Self {
            sort,
            filters: FilterSpec::new(),
            limit: None,
        }
    }

    pub fn with_filters(mut self, filters: FilterSpec) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: Field,
    pub value: Value,
}

/// Store-agnostic read: all rows of `collection` matching every predicate,
/// ordered by `order`, capped to `limit` rows if set.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeQuery {
    pub collection: String,
    pub predicates: Vec<Predicate>,
    pub order: SortSpec,
    pub limit: Option<u32>,
}

pub fn build_query(collection: &str, spec: QuerySpec) -> NativeQuery {
    let QuerySpec {
        sort,
        filters,
        limit,
    } = spec;

    let predicates: Vec<Predicate> = filters
        .into_iter()
        .map(|(field, value)| Predicate { field, value })
        .collect();

    // a zero limit is falsy and lifts the cap entirely
    let limit = limit.filter(|l| *l > 0);

    trace!(
        "query on `{}`: {} predicate(s), order `{}`, limit {:?}",
        collection,
        predicates.len(),
        sort,
        limit
    );

    NativeQuery {
        collection: collection.to_owned(),
        predicates,
        order: sort,
        limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_is_unbounded() {
        let spec = QuerySpec::new("-created_date".parse().unwrap()).with_limit(Some(0));
        let q = build_query("tasks", spec);
        assert_eq!(q.limit, None);

        let spec = QuerySpec::new("-created_date".parse().unwrap()).with_limit(Some(5));
        let q = build_query("tasks", spec);
        assert_eq!(q.limit, Some(5));

        let spec = QuerySpec::new("-created_date".parse().unwrap());
        assert_eq!(build_query("tasks", spec).limit, None);
    }

    #[test]
    fn predicates_from_filters() {
        let filters = FilterSpec::new()
            .equals("status", Some("open"))
            .unwrap()
            .equals::<i64>("priority", None)
            .unwrap();
        let spec = QuerySpec::new("title".parse().unwrap()).with_filters(filters);
        let q = build_query("tasks", spec);

        assert_eq!(q.collection, "tasks");
        assert_eq!(q.predicates.len(), 1);
        assert_eq!(q.predicates[0].field.name(), "status");
        assert_eq!(q.predicates[0].value, Value::from("open"));
        assert!(!q.order.descending);
    }
}
