//! PostgreSQL store.
//!
//! Rows are exchanged as JSONB: reads project each row with `to_jsonb`,
//! writes expand a JSONB parameter with `jsonb_populate_record(set)` so that
//! values are coerced to the column types by the database itself. Only the
//! columns present in the written data are listed in the statement, the
//! others keep their defaults (e.g. `id`, `created_date`).
//!
//! Primary keys are compared in their textual form (`"id"::text = $n`),
//! which covers both `uuid` and integer keys.
//!
//! `updated_date` is only maintained on tables prepared with
//! [`PgStore::install_change_feed`], which also installs a `BEFORE UPDATE`
//! trigger stamping it. Elsewhere updates leave it untouched.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, trace, warn};
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions, PgRow};
use sqlx::{Row, types::Json};

use super::{Error, NativeChange, NativeChangeStream, Store, complete_truncated};
use crate::{
    params,
    query::{self, Field, NativeQuery, RECORD_COLUMN, TABLE_ALIAS, quote_ident},
    types::{FIELD_ID, Record},
};

/// Notify function shared by every change feed trigger
const CHANGE_FEED_FUNCTION: &str = include_str!("../../migrations/0001_change_feed.sql");
/// Trigger name, unique per table
const CHANGE_FEED_TRIGGER: &str = "hearth_change_feed";
/// `updated_date` stamping trigger name
const TOUCH_TRIGGER: &str = "hearth_touch_updated_date";

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let max_connections = params::configurables().max_connections;
        info!(
            "connecting to {} (max {} connections)",
            params::redacted_url(url),
            max_connections
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Installs the row change trigger and the `updated_date` trigger on
    /// `collection`.
    ///
    /// Safe to run repeatedly: the trigger functions are replaced and the
    /// triggers recreated.
    pub async fn install_change_feed(&self, collection: &str) -> Result<(), Error> {
        let prefix = &params::configurables().change_channel_prefix;

        sqlx::raw_sql(CHANGE_FEED_FUNCTION)
            .execute(&self.pool)
            .await?;
        sqlx::raw_sql(&change_feed_trigger_ddl(collection, prefix))
            .execute(&self.pool)
            .await?;
        sqlx::raw_sql(&touch_trigger_ddl(collection))
            .execute(&self.pool)
            .await?;

        info!(
            "change feed installed on `{}` (channel `{}`)",
            collection,
            params::configurables().change_channel(collection)
        );
        Ok(())
    }
}

fn quote_literal(v: &str) -> String {
    format!("'{}'", v.replace('\'', "''"))
}

fn change_feed_trigger_ddl(collection: &str, prefix: &str) -> String {
    let table = quote_ident(collection);
    format!(
        "DROP TRIGGER IF EXISTS {CHANGE_FEED_TRIGGER} ON {table}; \
         CREATE TRIGGER {CHANGE_FEED_TRIGGER} AFTER INSERT OR UPDATE OR DELETE ON {table} \
         FOR EACH ROW EXECUTE FUNCTION hearth_notify_change({})",
        quote_literal(prefix)
    )
}

fn touch_trigger_ddl(collection: &str) -> String {
    let table = quote_ident(collection);
    format!(
        "DROP TRIGGER IF EXISTS {TOUCH_TRIGGER} ON {table}; \
         CREATE TRIGGER {TOUCH_TRIGGER} BEFORE UPDATE ON {table} \
         FOR EACH ROW EXECUTE FUNCTION hearth_touch_updated_date()"
    )
}

/// Validated, sorted union of the fields found in `rows`
fn columns_of<'a>(rows: impl Iterator<Item = &'a Record>) -> Result<Vec<Field>, query::Error> {
    let names: BTreeSet<&String> = rows.flat_map(Record::fields).collect();
    names.into_iter().map(|n| Field::try_new(n.as_str())).collect()
}

fn column_list(columns: &[Field], qualifier: Option<&str>) -> String {
    columns
        .iter()
        .map(|c| match qualifier {
            Some(q) => format!("{q}.{}", quote_ident(c.name())),
            None => quote_ident(c.name()),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_by_id_sql(collection: &str) -> String {
    format!(
        "SELECT to_jsonb({TABLE_ALIAS}) AS {RECORD_COLUMN} FROM {} AS {TABLE_ALIAS} \
         WHERE {TABLE_ALIAS}.{}::text = $1",
        quote_ident(collection),
        quote_ident(FIELD_ID)
    )
}

fn insert_sql(collection: &str, columns: &[Field]) -> String {
    let table = quote_ident(collection);
    let columns = column_list(columns, None);
    format!(
        "INSERT INTO {table} AS {TABLE_ALIAS} ({columns}) \
         SELECT {columns} FROM jsonb_populate_recordset(NULL::{table}, $1) \
         RETURNING to_jsonb({TABLE_ALIAS}) AS {RECORD_COLUMN}"
    )
}

fn insert_defaults_sql(collection: &str) -> String {
    format!(
        "INSERT INTO {} AS {TABLE_ALIAS} DEFAULT VALUES \
         RETURNING to_jsonb({TABLE_ALIAS}) AS {RECORD_COLUMN}",
        quote_ident(collection)
    )
}

fn update_sql(collection: &str, columns: &[Field]) -> String {
    let table = quote_ident(collection);
    let assignments = columns
        .iter()
        .map(|c| {
            let c = quote_ident(c.name());
            format!("{c} = p.{c}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {table} AS {TABLE_ALIAS} SET {assignments} \
         FROM jsonb_populate_record(NULL::{table}, $1) AS p \
         WHERE {TABLE_ALIAS}.{}::text = $2 \
         RETURNING to_jsonb({TABLE_ALIAS}) AS {RECORD_COLUMN}",
        quote_ident(FIELD_ID)
    )
}

fn delete_sql(collection: &str) -> String {
    format!(
        "DELETE FROM {} AS {TABLE_ALIAS} WHERE {TABLE_ALIAS}.{}::text = $1",
        quote_ident(collection),
        quote_ident(FIELD_ID)
    )
}

fn cast_record(row: PgRow) -> Result<Record, Error> {
    let Json(record) = row.try_get::<Json<Record>, _>(RECORD_COLUMN)?;
    Ok(record)
}

#[async_trait]
impl Store for PgStore {
    async fn select(&self, query: &NativeQuery) -> Result<Vec<Record>, Error> {
        let compiled = query::compile_select(query);
        debug!("{}", compiled.sql);

        let mut q = sqlx::query(&compiled.sql);
        for v in &compiled.values {
            q = q.bind(Json(v.to_json()));
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(cast_record).collect()
    }

    async fn select_by_id(&self, collection: &str, id: &str) -> Result<Vec<Record>, Error> {
        let rows = sqlx::query(&select_by_id_sql(collection))
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(cast_record).collect()
    }

    async fn insert(&self, collection: &str, rows: Vec<Record>) -> Result<Vec<Record>, Error> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let columns = columns_of(rows.iter())?;

        if columns.is_empty() {
            // nothing to populate, every row is made of defaults
            let sql = insert_defaults_sql(collection);
            let mut tx = self.pool.begin().await?;
            let mut inserted = Vec::with_capacity(rows.len());
            for _ in 0..rows.len() {
                let row = sqlx::query(&sql).fetch_one(&mut *tx).await?;
                inserted.push(cast_record(row)?);
            }
            tx.commit().await?;
            return Ok(inserted);
        }

        let sql = insert_sql(collection, &columns);
        debug!("{sql}");

        let count = rows.len();
        let payload = serde_json::Value::Array(rows.into_iter().map(Into::into).collect());

        // a single statement: the whole batch commits or fails together
        let inserted = sqlx::query(&sql)
            .bind(Json(payload))
            .fetch_all(&self.pool)
            .await?;

        trace!("inserted {count} row(s) into `{collection}`");
        inserted.into_iter().map(cast_record).collect()
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        mut patch: Record,
    ) -> Result<Vec<Record>, Error> {
        // primary keys are not patchable
        patch.remove(FIELD_ID);
        if patch.is_empty() {
            return self.select_by_id(collection, id).await;
        }

        let columns = columns_of(std::iter::once(&patch))?;
        let sql = update_sql(collection, &columns);
        debug!("{sql}");

        let rows = sqlx::query(&sql)
            .bind(Json(serde_json::Value::from(patch)))
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(cast_record).collect()
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<u64, Error> {
        let res = sqlx::query(&delete_sql(collection))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn changes(&self, collection: &str) -> Result<NativeChangeStream, Error> {
        let channel = params::configurables().change_channel(collection);

        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&channel).await?;
        debug!("listening on channel `{channel}`");

        // `try_recv` rather than `recv`: a lost connection must end the feed
        // instead of being silently re-established
        let store = self.clone();
        let collection = collection.to_owned();
        let stream = futures::stream::unfold(Some(listener), move |listener| {
            let store = store.clone();
            let collection = collection.clone();
            async move {
                let mut listener = listener?;
                let item = match listener.try_recv().await {
                    Ok(Some(notification)) => {
                        match serde_json::from_str::<NativeChange>(notification.payload()) {
                            Ok(change) => complete_truncated(&store, &collection, change).await,
                            Err(e) => Err(e.into()),
                        }
                    }
                    Ok(None) => {
                        warn!("change feed connection of `{collection}` lost");
                        return Some((Err(Error::FeedLost { collection }), None));
                    }
                    Err(e) => return Some((Err(e.into()), None)),
                };
                Some((item, Some(listener)))
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<Field> {
        names.iter().map(|n| Field::try_new(*n).unwrap()).collect()
    }

    #[test]
    fn insert_statement() {
        assert_eq!(
            insert_sql("tasks", &fields(&["created_by", "title"])),
            "INSERT INTO \"tasks\" AS t (\"created_by\", \"title\") \
             SELECT \"created_by\", \"title\" FROM jsonb_populate_recordset(NULL::\"tasks\", $1) \
             RETURNING to_jsonb(t) AS record"
        );
    }

    #[test]
    fn update_statement() {
        assert_eq!(
            update_sql("tasks", &fields(&["done"])),
            "UPDATE \"tasks\" AS t SET \"done\" = p.\"done\" \
             FROM jsonb_populate_record(NULL::\"tasks\", $1) AS p \
             WHERE t.\"id\"::text = $2 \
             RETURNING to_jsonb(t) AS record"
        );
    }

    #[test]
    fn by_id_statements() {
        assert_eq!(
            select_by_id_sql("pets"),
            "SELECT to_jsonb(t) AS record FROM \"pets\" AS t WHERE t.\"id\"::text = $1"
        );
        assert_eq!(
            delete_sql("pets"),
            "DELETE FROM \"pets\" AS t WHERE t.\"id\"::text = $1"
        );
    }

    #[test]
    fn batch_columns_are_unioned() {
        let a = Record::new().with("title", "a");
        let b = Record::new().with("notes", "b").with("title", "b");
        let cols = columns_of([a, b].iter()).unwrap();
        assert_eq!(cols, fields(&["notes", "title"]));

        let bad = Record::new().with("title; --", "x");
        assert!(columns_of(std::iter::once(&bad)).is_err());
    }

    #[test]
    fn trigger_ddl() {
        let ddl = change_feed_trigger_ddl("tasks", "hearth");
        assert!(ddl.starts_with("DROP TRIGGER IF EXISTS hearth_change_feed ON \"tasks\";"));
        assert!(ddl.ends_with("EXECUTE FUNCTION hearth_notify_change('hearth')"));
        assert_eq!(quote_literal("o'brien"), "'o''brien'");

        let ddl = touch_trigger_ddl("bills");
        assert!(ddl.starts_with("DROP TRIGGER IF EXISTS hearth_touch_updated_date ON \"bills\";"));
        assert!(ddl.contains("BEFORE UPDATE ON \"bills\""));
        assert!(ddl.ends_with("EXECUTE FUNCTION hearth_touch_updated_date()"));
    }

    #[test]
    fn change_feed_sql_marks_truncation() {
        assert!(CHANGE_FEED_FUNCTION.contains("'truncated', true"));
        assert!(CHANGE_FEED_FUNCTION.contains("CREATE OR REPLACE FUNCTION hearth_touch_updated_date()"));
    }
}
