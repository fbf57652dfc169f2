use core::future::Future;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{error, instrument, trace};

use crate::call::{Call, Status};
use crate::pool::CallPool;
use crate::types::{Options, SharedError};

struct Inner<K, V, E> {
    calls: Mutex<HashMap<K, Arc<Call<V, E>>>>,
    pool: CallPool<V, E>,
}

/// Group represents a class of work and creates a space in which units of work
/// can be executed with duplicate suppression.
///
/// Cloning a group is cheap and the clones share the same in-flight calls.
pub struct Group<K, V, E = SharedError>(Arc<Inner<K, V, E>>);

impl<K, V, E> Clone for Group<K, V, E> {
    fn clone(&self) -> Self {
        Group(self.0.clone())
    }
}

impl<K, V, E> fmt::Debug for Group<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("in_flight", &self.in_flight())
            .field("pooled", &self.pooled())
            .finish()
    }
}

impl<K, V, E> Default for Group<K, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A caller attached to a call. Detaches on drop and hands the call back to
/// the pool when it was the last one holding it.
struct Attachment<'a, K, V, E> {
    inner: &'a Inner<K, V, E>,
    call: Arc<Call<V, E>>,
}

impl<K, V, E> Drop for Attachment<'_, K, V, E> {
    fn drop(&mut self) {
        if self.call.detach() {
            self.inner.pool.release(self.call.clone());
        }
    }
}

/// The leader's side of a call. Dropping it before `land` (panic in the
/// work, cancelled future) marks the call as abandoned so joiners retry.
struct Flight<'a, 'q, K, V, E, Q>
where
    K: Borrow<Q> + Hash + Eq,
    Q: ?Sized + Hash + Eq,
{
    key: &'q Q,
    attachment: Attachment<'a, K, V, E>,
    landed: bool,
}

impl<K, V, E, Q> Flight<'_, '_, K, V, E, Q>
where
    K: Borrow<Q> + Hash + Eq,
    Q: ?Sized + Hash + Eq,
{
    /// Publishes the result and closes the shared window. Returns whether any
    /// joiner attached before the result was published.
    fn land(mut self, result: Result<V, E>) -> bool {
        let call = &self.attachment.call;
        let shared = call.refs() > 1;
        call.complete(Status::Done(result));
        trace!("Work done");
        self.landed = true;
        self.close();
        shared
    }

    fn close(&self) {
        let removed = self.attachment.inner.calls.lock().remove(self.key);
        debug_assert!(removed.is_some_and(|call| Arc::ptr_eq(&call, &self.attachment.call)));
        trace!("Entry removed");
    }
}

impl<K, V, E, Q> Drop for Flight<'_, '_, K, V, E, Q>
where
    K: Borrow<Q> + Hash + Eq,
    Q: ?Sized + Hash + Eq,
{
    fn drop(&mut self) {
        if !self.landed {
            error!("Leader dropped before work completed");
            // unregister first so woken joiners cannot find this call again
            self.close();
            self.attachment.call.complete(Status::LeaderDrop);
        }
    }
}

enum Role<'a, 'q, K, V, E, Q>
where
    K: Borrow<Q> + Hash + Eq,
    Q: ?Sized + Hash + Eq,
{
    Leader(Flight<'a, 'q, K, V, E, Q>),
    Joiner(Attachment<'a, K, V, E>),
}

impl<K: Hash + Eq, V, E> Inner<K, V, E> {
    /// Joins the in-flight call for `key`, or registers a new one that the
    /// caller is then responsible for.
    fn enter<'q, Q>(&self, key: &'q Q) -> Role<'_, 'q, K, V, E, Q>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + ToOwned<Owned = K>,
    {
        let mut calls = self.calls.lock();
        if let Some(call) = calls.get(key) {
            call.attach();
            let call = call.clone();
            drop(calls);
            return Role::Joiner(Attachment { inner: self, call });
        }

        let call = self.pool.acquire();
        call.attach();
        calls.insert(key.to_owned(), call.clone());
        drop(calls);
        trace!("entry inited");
        Role::Leader(Flight {
            key,
            attachment: Attachment { inner: self, call },
            landed: false,
        })
    }
}

impl<K, V, E> Group<K, V, E> {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Group(Arc::new(Inner {
            calls: Mutex::new(HashMap::new()),
            pool: CallPool::new(options.recycle_calls, options.warm_calls),
        }))
    }

    /// Number of keys whose work is currently running.
    pub fn in_flight(&self) -> usize {
        self.0.calls.lock().len()
    }

    /// Number of retired call records waiting to be reused.
    pub fn pooled(&self) -> usize {
        self.0.pool.len()
    }
}

impl<K, V, E> Group<K, V, E>
where
    K: Hash + Eq,
    V: Clone,
    E: Clone,
{
    /// work executes and returns the results of the given function, making
    /// sure that only one execution is in-flight for a given key at a
    /// time. If a duplicate comes in, the duplicate caller waits for the
    /// original to complete and receives the same results.
    /// The returned bool indicates whether the result was given to multiple callers.
    ///
    /// Once the work returns the key is released, so a later call for the
    /// same key runs its own work even if earlier joiners are still reading.
    #[instrument(level = "trace", skip_all)]
    pub fn work<Q, F>(&self, key: &Q, work: F) -> (Result<V, E>, bool)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + ToOwned<Owned = K>,
        F: FnOnce() -> Result<V, E>,
    {
        loop {
            match self.0.enter(key) {
                Role::Joiner(attachment) => {
                    trace!("Not return, waiting...");
                    if let Some(result) = attachment.call.wait() {
                        trace!("Value returned");
                        return (result, true);
                    }
                    trace!("Leader dropped, retrying");
                }
                Role::Leader(flight) => {
                    trace!("working...");
                    let result = work();
                    let shared = flight.land(result.clone());
                    return (result, shared);
                }
            }
        }
    }

    /// async_work is like work but awaits the given future instead of calling
    /// a function. Joiners never poll their own future unless the leader is
    /// dropped before finishing, in which case one of them takes over.
    #[instrument(level = "trace", skip_all)]
    pub async fn async_work<Q, Fut>(&self, key: &Q, fut: Fut) -> (Result<V, E>, bool)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + ToOwned<Owned = K>,
        Fut: Future<Output = Result<V, E>>,
    {
        loop {
            match self.0.enter(key) {
                Role::Joiner(attachment) => {
                    trace!("Not return, waiting...");
                    if let Some(result) = attachment.call.wait_async().await {
                        trace!("Value returned");
                        return (result, true);
                    }
                    trace!("Leader dropped, retrying");
                }
                Role::Leader(flight) => {
                    trace!("working...");
                    let result = fut.await;
                    let shared = flight.land(result.clone());
                    return (result, shared);
                }
            }
        }
    }
}

fn share<E: Into<anyhow::Error>>(err: E) -> SharedError {
    Arc::new(err.into())
}

impl<K, V> Group<K, V, SharedError>
where
    K: Hash + Eq,
    V: Clone,
{
    /// try_work is like work for functions returning any error convertible
    /// into `anyhow::Error`. The error is wrapped once, by the leader, so
    /// every caller receives the same `Arc`.
    pub fn try_work<Q, F, E>(&self, key: &Q, work: F) -> (Result<V, SharedError>, bool)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + ToOwned<Owned = K>,
        F: FnOnce() -> Result<V, E>,
        E: Into<anyhow::Error>,
    {
        self.work(key, || work().map_err(share))
    }

    pub async fn try_async_work<Q, Fut, E>(
        &self,
        key: &Q,
        fut: Fut,
    ) -> (Result<V, SharedError>, bool)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq + ToOwned<Owned = K>,
        Fut: Future<Output = Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        self.async_work(key, async move { fut.await.map_err(share) })
            .await
    }
}
