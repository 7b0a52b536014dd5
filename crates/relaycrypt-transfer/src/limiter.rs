//! Bounded-parallelism runner with fail-fast-but-drain semantics.

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use relaycrypt_core::config::FailurePolicy;

/// Runs one worker per item, at most `limit` at a time.
///
/// Items launch lazily in sequence order; whenever one settles the next
/// unstarted item takes its place. After the first failure nothing new is
/// launched, but work already in flight is allowed to finish before the
/// first error is returned.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyLimiter {
    limit: usize,
}

impl ConcurrencyLimiter {
    /// A limit of 0 is treated as 1.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Results come back in item order. Zero items succeed immediately.
    pub async fn run<T, R, E, F, Fut>(
        &self,
        items: impl IntoIterator<Item = T>,
        mut worker: F,
    ) -> Result<Vec<R>, E>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let mut pending = items.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut results: Vec<Option<R>> = Vec::new();
        let mut first_err: Option<E> = None;

        loop {
            while first_err.is_none() && in_flight.len() < self.limit {
                let Some((index, item)) = pending.next() else {
                    break;
                };
                let fut = worker(item);
                in_flight.push(async move { (index, fut.await) });
            }

            match in_flight.next().await {
                Some((index, Ok(value))) => {
                    if results.len() <= index {
                        results.resize_with(index + 1, || None);
                    }
                    results[index] = Some(value);
                }
                Some((_, Err(err))) => {
                    first_err.get_or_insert(err);
                }
                None => break,
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(results.into_iter().flatten().collect()),
        }
    }

    /// Like [`run`](Self::run) but never stops early: every item runs and
    /// every outcome is returned, in item order.
    pub async fn run_settled<T, R, E, F, Fut>(
        &self,
        items: impl IntoIterator<Item = T>,
        mut worker: F,
    ) -> Vec<Result<R, E>>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let mut pending = items.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut outcomes: Vec<Option<Result<R, E>>> = Vec::new();

        loop {
            while in_flight.len() < self.limit {
                let Some((index, item)) = pending.next() else {
                    break;
                };
                let fut = worker(item);
                in_flight.push(async move { (index, fut.await) });
            }

            let Some((index, outcome)) = in_flight.next().await else {
                break;
            };
            if outcomes.len() <= index {
                outcomes.resize_with(index + 1, || None);
            }
            outcomes[index] = Some(outcome);
        }

        outcomes.into_iter().flatten().collect()
    }

    /// [`run`](Self::run) under `AbortBatch`, [`run_settled`](Self::run_settled)
    /// under `ContinueSiblings`. Either way the result is the first error in
    /// item order, or every value.
    pub async fn run_with_policy<T, R, E, F, Fut>(
        &self,
        policy: FailurePolicy,
        items: impl IntoIterator<Item = T>,
        worker: F,
    ) -> Result<Vec<R>, E>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        match policy {
            FailurePolicy::AbortBatch => self.run(items, worker).await,
            FailurePolicy::ContinueSiblings => {
                self.run_settled(items, worker).await.into_iter().collect()
            }
        }
    }
}
