//! # Change Feed
//!
//! Turns the store's native row-change stream into uniform [`ChangeEvent`]s
//! and hands them to a caller-supplied listener.
//!
//! The feed is incremental only: events committed before [`subscribe`]
//! returns are never replayed, callers needing the current state must read
//! it separately. Events are not deduplicated.
//!
//! A [`Subscription`] goes through `Idle -> Subscribing -> Active -> Closed`.
//! It is closed by [`Subscription::unsubscribe`], by dropping the handle, or
//! when the native stream fails or ends; closed subscriptions are never
//! reconnected.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::StreamExt;
use log::{debug, error, trace, warn};
use tokio::task::JoinHandle;

use crate::{
    store::{self, NativeChange, NativeEventType, StoreRef},
    types::{ChangeEvent, ChangeKind},
};

/// Maps a native change to a [`ChangeEvent`].
///
/// The id comes from the new row, falling back to the old row (deletions).
/// Returns [`None`] when neither row carries an id.
///
/// A change still marked as truncated carries a stub row holding only the id,
/// its event is emitted without a record.
pub fn normalize(change: NativeChange) -> Option<ChangeEvent> {
    let kind = match change.event_type {
        NativeEventType::Insert => ChangeKind::Create,
        NativeEventType::Update => ChangeKind::Update,
        NativeEventType::Delete => ChangeKind::Delete,
    };

    let id = change
        .new
        .as_ref()
        .and_then(|r| r.id())
        .or_else(|| change.old.as_ref().and_then(|r| r.id()))?;

    let record = match kind {
        ChangeKind::Delete => None,
        ChangeKind::Create | ChangeKind::Update if change.truncated => None,
        ChangeKind::Create | ChangeKind::Update => change.new,
    };

    Some(ChangeEvent { kind, record, id })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriptionState {
    Idle = 0,
    Subscribing = 1,
    Active = 2,
    Closed = 3,
}

impl From<u8> for SubscriptionState {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Subscribing,
            2 => Self::Active,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug, Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(SubscriptionState::Idle as u8)))
    }

    fn get(&self) -> SubscriptionState {
        self.0.load(Ordering::Acquire).into()
    }

    fn set(&self, state: SubscriptionState) -> SubscriptionState {
        self.0.swap(state as u8, Ordering::AcqRel).into()
    }
}

/// Handle of an active change feed.
///
/// The underlying stream (and, for PostgreSQL, its dedicated connection) is
/// released by [`Subscription::unsubscribe`] or when the handle is dropped.
#[derive(Debug)]
pub struct Subscription {
    collection: String,
    state: SharedState,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn state(&self) -> SubscriptionState {
        self.state.get()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    /// Stops event delivery. Calling it more than once has no effect.
    pub fn unsubscribe(&self) {
        if self.state.set(SubscriptionState::Closed) != SubscriptionState::Closed {
            debug!("unsubscribed from `{}`", self.collection);
        }
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Subscribes `listener` to the row changes of `collection`.
///
/// Must be called from within a tokio runtime, events are delivered from a
/// spawned task, one at a time, in the order the store emits them.
pub async fn subscribe<F>(
    store: &StoreRef,
    collection: &str,
    mut listener: F,
) -> Result<Subscription, store::Error>
where
    F: FnMut(ChangeEvent) + Send + 'static,
{
    let state = SharedState::new();
    state.set(SubscriptionState::Subscribing);
    trace!("subscribing to `{collection}`");

    let mut stream = match store.changes(collection).await {
        Ok(stream) => stream,
        Err(e) => {
            state.set(SubscriptionState::Closed);
            return Err(e);
        }
    };

    state.set(SubscriptionState::Active);
    debug!("subscribed to `{collection}`");

    let task_state = state.clone();
    let task_collection = collection.to_owned();
    let task = tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            // abort only lands at the next yield point, queued events must not
            // reach the listener once unsubscribed
            if task_state.get() == SubscriptionState::Closed {
                break;
            }

            match item {
                Ok(change) => match normalize(change) {
                    Some(event) => listener(event),
                    None => warn!("dropping change on `{task_collection}` without id"),
                },
                Err(e) => {
                    error!("change feed of `{task_collection}` failed, closing :: {e}");
                    break;
                }
            }
        }

        if task_state.set(SubscriptionState::Closed) != SubscriptionState::Closed {
            debug!("change feed of `{task_collection}` closed");
        }
    });

    Ok(Subscription {
        collection: collection.to_owned(),
        state,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Record;
    use serde_json::json;

    fn record(v: serde_json::Value) -> Record {
        Record::try_from(v).unwrap()
    }

    #[test]
    fn kinds_are_mapped() {
        let ev = normalize(NativeChange::insert("tasks", record(json!({"id": "t1"})))).unwrap();
        assert_eq!(ev.kind, ChangeKind::Create);
        assert_eq!(ev.id, "t1");
        assert!(ev.record.is_some());

        let ev = normalize(NativeChange::update(
            "tasks",
            record(json!({"id": "t1", "done": true})),
            record(json!({"id": "t1", "done": false})),
        ))
        .unwrap();
        assert_eq!(ev.kind, ChangeKind::Update);
        assert_eq!(ev.record.unwrap().get("done"), Some(&json!(true)));
    }

    #[test]
    fn deletes_take_old_id() {
        let ev = normalize(NativeChange::delete("tasks", record(json!({"id": 9})))).unwrap();
        assert_eq!(ev.kind, ChangeKind::Delete);
        assert_eq!(ev.record, None);
        assert_eq!(ev.id, "9");
    }

    #[test]
    fn missing_id_is_dropped() {
        assert_eq!(
            normalize(NativeChange::insert("tasks", record(json!({"title": "x"})))),
            None
        );
    }

    #[test]
    fn truncated_rows_carry_no_record() {
        let mut change = NativeChange::update(
            "documents",
            record(json!({"id": "d1"})),
            record(json!({"id": "d1"})),
        );
        change.truncated = true;

        let ev = normalize(change).unwrap();
        assert_eq!(ev.kind, ChangeKind::Update);
        assert_eq!(ev.id, "d1");
        assert_eq!(ev.record, None);
    }

    #[test]
    fn duplicates_are_not_collapsed() {
        let change = NativeChange::insert("tasks", record(json!({"id": "t1", "title": "x"})));
        let a = normalize(change.clone()).unwrap();
        let b = normalize(change).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn state_roundtrip() {
        let s = SharedState::new();
        assert_eq!(s.get(), SubscriptionState::Idle);
        assert_eq!(s.set(SubscriptionState::Active), SubscriptionState::Idle);
        assert_eq!(s.get(), SubscriptionState::Active);
    }
}
