use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use hearthsync::{
    auth::{self, Identity, IdentityPatch, IdentityProvider, SessionProvider},
    query::FilterSpec,
    repo::facades::{FacadeError, FacadeRegistry, ListOptions},
    store::MemoryStore,
    types::Record,
};

/// Identity provider whose backend is unreachable.
struct UnreachableProvider;

#[async_trait]
impl IdentityProvider for UnreachableProvider {
    async fn session(&self) -> Result<Option<Identity>, auth::Error> {
        Err(auth::Error::Unavailable("connection refused".into()))
    }

    async fn update_attributes(
        &self,
        _identity: Identity,
        _patch: IdentityPatch,
    ) -> Result<Identity, auth::Error> {
        Err(auth::Error::Unavailable("connection refused".into()))
    }

    async fn sign_out(&self) -> Result<(), auth::Error> {
        Err(auth::Error::Unavailable("connection refused".into()))
    }
}

fn record(v: Value) -> Record {
    Record::try_from(v).expect("json object")
}

fn anonymous() -> FacadeRegistry {
    FacadeRegistry::new(
        Arc::new(MemoryStore::with_buffer(16)),
        Arc::new(SessionProvider::new()),
    )
}

#[tokio::test]
async fn task_scenario() {
    let facades = anonymous();

    let created = facades
        .task
        .create(record(json!({"id": "t1", "title": "Buy milk"})))
        .await
        .unwrap();
    assert_eq!(created.id().as_deref(), Some("t1"));
    assert_eq!(created.get("title"), Some(&json!("Buy milk")));
    assert_eq!(created.get("created_by"), Some(&Value::Null));

    let found = facades
        .task
        .filter(
            FilterSpec::new().equals("title", Some("Buy milk")).unwrap(),
            ListOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id().as_deref(), Some("t1"));

    facades.task.delete("t1").await.unwrap();
    let err = facades.task.get("t1").await.unwrap_err();
    assert!(err.is_not_found());

    // deletion is not idempotent
    assert!(facades.task.delete("t1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn created_records_round_trip() {
    let facades = anonymous();
    let data = record(json!({
        "description": "Groceries",
        "amount": 42.5,
        "items": [{"name": "bread", "qty": 2}],
    }));

    let created = facades.expense.create(data.clone()).await.unwrap();
    let id = created.id().expect("server assigned id");
    let fetched = facades.expense.get(&id).await.unwrap();

    for (k, v) in data.as_map() {
        assert_eq!(fetched.get(k), Some(v), "field {k}");
    }
    assert!(fetched.get("created_by").is_some());
    assert!(fetched.get("created_date").is_some());
}

#[tokio::test]
async fn ownership_is_stamped_from_session() {
    let session = Arc::new(SessionProvider::signed_in(
        Identity::new("u1", "mom@home.test").with_display_name("Mom"),
    ));
    let facades = FacadeRegistry::new(Arc::new(MemoryStore::with_buffer(16)), session);

    let r = facades
        .chore
        .create(record(json!({"title": "Dishes", "created_by": "someone@else"})))
        .await
        .unwrap();
    assert_eq!(r.get("created_by"), Some(&json!("mom@home.test")));

    let rs = facades
        .chore
        .bulk_create(vec![
            record(json!({"title": "Laundry"})),
            record(json!({"title": "Vacuum"})),
        ])
        .await
        .unwrap();
    assert_eq!(rs.len(), 2);
    assert!(rs
        .iter()
        .all(|r| r.get("created_by") == Some(&json!("mom@home.test"))));
}

#[tokio::test]
async fn failing_identity_lookup_degrades_to_anonymous() {
    let facades = FacadeRegistry::new(
        Arc::new(MemoryStore::with_buffer(16)),
        Arc::new(UnreachableProvider),
    );

    let r = facades
        .medication
        .create(record(json!({"name": "Ibuprofen"})))
        .await
        .unwrap();
    assert_eq!(r.get("created_by"), Some(&Value::Null));

    assert!(!facades.is_authenticated().await);
    assert!(matches!(
        facades.me().await,
        Err(FacadeError::AuthError(auth::Error::Unavailable(_)))
    ));
}

#[tokio::test]
async fn sort_filter_and_limit() {
    let facades = anonymous();
    let rows: Vec<Record> = (0..10)
        .map(|i| {
            record(json!({
                "name": format!("item-{i}"),
                "quantity": (i * 7) % 10,
                "location": if i % 2 == 0 { "pantry" } else { "garage" },
            }))
        })
        .collect();
    facades.inventory_item.bulk_create(rows).await.unwrap();

    let sorted = facades
        .inventory_item
        .list(ListOptions::sorted("-quantity"))
        .await
        .unwrap();
    assert_eq!(sorted.len(), 10);
    for pair in sorted.windows(2) {
        let a = pair[0].get("quantity").and_then(Value::as_i64).unwrap();
        let b = pair[1].get("quantity").and_then(Value::as_i64).unwrap();
        assert!(a >= b);
    }

    let pantry = facades
        .inventory_item
        .filter(
            FilterSpec::new()
                .equals("location", Some("pantry"))
                .unwrap()
                .equals::<&str>("name", None)
                .unwrap(),
            ListOptions::sorted("quantity"),
        )
        .await
        .unwrap();
    assert_eq!(pantry.len(), 5);
    assert!(pantry
        .iter()
        .all(|r| r.get("location") == Some(&json!("pantry"))));

    let capped = facades
        .inventory_item
        .list(ListOptions::sorted("name").with_limit(3))
        .await
        .unwrap();
    assert_eq!(capped.len(), 3);

    let unlimited = facades
        .inventory_item
        .list(ListOptions::sorted("name").with_limit(0))
        .await
        .unwrap();
    assert_eq!(unlimited.len(), 10);
}

#[tokio::test]
async fn default_limit_applies() {
    let facades = anonymous();
    let rows: Vec<Record> = (0..60).map(|i| record(json!({"n": i}))).collect();
    facades.note.bulk_create(rows).await.unwrap();

    let page = facades.note.list(ListOptions::default()).await.unwrap();
    assert_eq!(page.len(), 50);
}

#[tokio::test]
async fn partial_update_returns_full_record() {
    let facades = anonymous();
    let created = facades
        .bill
        .create(record(json!({"payee": "Power Co", "amount": 80, "paid": false})))
        .await
        .unwrap();
    let id = created.id().unwrap();

    let updated = facades
        .bill
        .update(&id, record(json!({"paid": true})))
        .await
        .unwrap();
    assert_eq!(updated.get("paid"), Some(&json!(true)));
    assert_eq!(updated.get("payee"), Some(&json!("Power Co")));
    assert_eq!(updated.id(), Some(id));

    let err = facades
        .bill
        .update("missing", record(json!({"paid": true})))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn lookup_by_logical_name() {
    let facades = anonymous();

    let pets = facades.by_name("Pet").unwrap();
    assert_eq!(pets.collection(), "pets");
    pets.create(record(json!({"name": "Rex"}))).await.unwrap();
    assert_eq!(facades.pet.list(ListOptions::default()).await.unwrap().len(), 1);
    assert_eq!(facades.pet.name(), "Pet");

    assert!(matches!(
        facades.by_name("Dragon"),
        Err(FacadeError::ConfigError(_))
    ));
    assert_eq!(pets.schema(), json!({}));
}

#[tokio::test]
async fn bad_sort_field_is_a_query_error() {
    let facades = anonymous();
    let err = facades
        .task
        .list(ListOptions::sorted("title desc"))
        .await
        .unwrap_err();
    assert!(matches!(err, FacadeError::QueryError(_)));
}

#[tokio::test]
async fn identity_operations() {
    let facades = anonymous();
    assert!(matches!(
        facades.update_me(IdentityPatch::default()).await,
        Err(FacadeError::AuthError(auth::Error::Unauthenticated))
    ));

    let session = Arc::new(SessionProvider::new());
    let facades = FacadeRegistry::new(Arc::new(MemoryStore::with_buffer(16)), session.clone());
    session.sign_in(Identity::new("u2", "dad@home.test")).await;

    let me = facades
        .update_me(IdentityPatch {
            role: Some("admin".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(me.role, "admin");

    facades.sign_out().await.unwrap();
    assert_eq!(facades.me().await.unwrap(), None);
}
