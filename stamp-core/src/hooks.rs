//! Extension points: filter chains and action lists.
//!
//! Callbacks run synchronously in registration order. A filter threads each
//! callback's output into the next one; an action ignores return values.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Record, RecordId, RecordQuery, TermId};

type FilterFn<T> = Arc<dyn Fn(T) -> T + Send + Sync>;
type ActionFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered list of value transformers.
pub struct FilterChain<T> {
    callbacks: Vec<FilterFn<T>>,
}

impl<T> FilterChain<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn add<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// Run `value` through every callback in registration order.
    pub fn apply(&self, value: T) -> T {
        self.callbacks.iter().fold(value, |acc, f| f(acc))
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl<T> Default for FilterChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Manual Clone: the callbacks are shared, T need not be Clone.
impl<T> Clone for FilterChain<T> {
    fn clone(&self) -> Self {
        Self {
            callbacks: self.callbacks.clone(),
        }
    }
}

impl<T> fmt::Debug for FilterChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Ordered list of observers.
pub struct ActionList<E> {
    callbacks: Vec<ActionFn<E>>,
}

impl<E> ActionList<E> {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn add<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    pub fn dispatch(&self, event: &E) {
        for callback in &self.callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl<E> Default for ActionList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for ActionList<E> {
    fn clone(&self) -> Self {
        Self {
            callbacks: self.callbacks.clone(),
        }
    }
}

impl<E> fmt::Debug for ActionList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionList")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// A completed write against the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordEvent {
    Inserted(RecordId),
    Updated(RecordId),
    Trashed(RecordId),
    Untrashed(RecordId),
    Deleted(RecordId),
    MetaChanged { record_id: RecordId, key: String },
    TermsChanged { record_id: RecordId, terms: Vec<TermId> },
}

impl RecordEvent {
    pub fn record_id(&self) -> RecordId {
        match self {
            RecordEvent::Inserted(id)
            | RecordEvent::Updated(id)
            | RecordEvent::Trashed(id)
            | RecordEvent::Untrashed(id)
            | RecordEvent::Deleted(id) => *id,
            RecordEvent::MetaChanged { record_id, .. }
            | RecordEvent::TermsChanged { record_id, .. } => *record_id,
        }
    }
}

/// Every extension point the record store consults.
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    /// Applied to query parameters before the cache key is composed.
    pub query_params: FilterChain<RecordQuery>,
    /// Applied to materialised query results on every call, hit or miss.
    pub query_results: FilterChain<Vec<Record>>,
    /// Fired after each write completes.
    pub record_changed: ActionList<RecordEvent>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_filter_chain_threads_in_order() {
        let mut chain = FilterChain::new();
        chain.add(|s: String| s + "a").add(|s: String| s + "b");
        assert_eq!(chain.apply(String::new()), "ab");
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_empty_filter_chain_is_identity() {
        let chain: FilterChain<i32> = FilterChain::default();
        assert!(chain.is_empty());
        assert_eq!(chain.apply(7), 7);
    }

    #[test]
    fn test_action_list_dispatches_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut actions = ActionList::new();
        let first = Arc::clone(&seen);
        let second = Arc::clone(&seen);
        actions
            .add(move |e: &RecordEvent| first.lock().unwrap().push(("first", e.record_id())))
            .add(move |e: &RecordEvent| second.lock().unwrap().push(("second", e.record_id())));

        let id = RecordId::now_v7();
        actions.dispatch(&RecordEvent::Deleted(id));

        assert_eq!(*seen.lock().unwrap(), vec![("first", id), ("second", id)]);
    }

    #[test]
    fn test_cloned_hooks_share_callbacks() {
        let mut hooks = Hooks::new();
        hooks.query_params.add(|q: RecordQuery| q.number(5));
        let cloned = hooks.clone();
        assert_eq!(cloned.query_params.apply(RecordQuery::new()).number, Some(5));
    }
}
