//! Set reconciliation between remote and local key sets.

use futures::stream::{self, StreamExt};
use service_core::error::AppError;
use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;

/// Successful callbacks per group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    concurrency: usize,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

impl Reconciler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Call `insert` once for every key in `remote − local`, then `delete`
    /// once for every key in `local − remote`.
    ///
    /// Every callback in a group runs to completion regardless of the others
    /// failing; the outcome counts the ones that returned `Ok`.
    pub async fn reconcile<K, I, IF, D, DF>(
        &self,
        remote: impl IntoIterator<Item = K>,
        local: impl IntoIterator<Item = K>,
        insert: I,
        delete: D,
    ) -> ReconcileOutcome
    where
        K: Eq + Hash + Clone,
        I: Fn(K) -> IF,
        IF: Future<Output = Result<(), AppError>>,
        D: Fn(K) -> DF,
        DF: Future<Output = Result<(), AppError>>,
    {
        let remote: HashSet<K> = remote.into_iter().collect();
        let local: HashSet<K> = local.into_iter().collect();

        if remote.is_empty() && local.is_empty() {
            return ReconcileOutcome::default();
        }

        let to_insert: Vec<K> = remote.difference(&local).cloned().collect();
        let to_delete: Vec<K> = local.difference(&remote).cloned().collect();

        let inserted = self.settle(to_insert, insert).await;
        let deleted = self.settle(to_delete, delete).await;

        ReconcileOutcome { inserted, deleted }
    }

    async fn settle<K, F, Fut>(&self, keys: Vec<K>, f: F) -> usize
    where
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<(), AppError>>,
    {
        if keys.is_empty() {
            return 0;
        }

        stream::iter(keys)
            .map(f)
            .buffer_unordered(self.concurrency)
            .filter(|result| futures::future::ready(result.is_ok()))
            .count()
            .await
    }
}
