//! Single-flight coordination: one backend read per key, shared by every
//! caller that asks for it while the read is outstanding.
//!
//! # Design
//!
//! Each in-flight load is a [shared future] stored in a [`DashMap`] under its
//! key. The first caller for a key (the *leader*) creates it; callers that
//! arrive before it completes (*followers*) clone and await the same future,
//! so they observe the identical `Result`, success or error.
//!
//! ```text
//!   leader ──start──▶ ┌──────────────┐ ──▶ loader (backend read)
//!                     │ key → Shared │
//!   follower ──join─▶ └──────────────┘
//!                            │ completes
//!                            ▼
//!              token retired, outcome cloned to all
//! ```
//!
//! - The token is removed from inside the flight as soon as the loader
//!   resolves, before any waiter observes the result. A later call for the
//!   same key therefore starts a new flight rather than reusing an old outcome.
//! - The flight body runs as its own tokio task, so it finishes and retires
//!   its token even when every caller, the leader included, stops waiting.
//!   The task is aborted only once the group itself is dropped.
//! - Followers wait under their own deadline. Giving up only drops their
//!   clone of the shared future; the read keeps going for everyone else.
//! - A panicking loader is converted into an error so waiters are not poisoned.
//!
//! [shared future]: futures::future::Shared

use crate::error::{Error, Result};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Flight<V> = Shared<BoxFuture<'static, Result<V>>>;

/// Spawned flight body. Aborts the task when dropped.
struct FlightTask<V>(JoinHandle<Result<V>>);

impl<V: Send + 'static> FlightTask<V> {
    fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = Result<V>> + Send + 'static,
    {
        FlightTask(tokio::spawn(fut))
    }
}

impl<V> Future for FlightTask<V> {
    type Output = Result<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.0).poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(e)) => {
                Poll::Ready(Err(Error::Other(format!("load task failed: {}", e))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<V> Drop for FlightTask<V> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// How a caller took part in a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightRole {
    /// Started the flight and its backend read.
    Leader,

    /// Joined a flight that was already running.
    Follower,
}

struct InFlight<V> {
    id: u64,
    fut: Flight<V>,
}

/// Per-key load coordinator.
///
/// # Example
///
/// ```
/// use keyed_cache::singleflight::{FlightRole, SingleFlightGroup};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let group: SingleFlightGroup<String, u32> = SingleFlightGroup::new();
///
/// let (res, role) = group
///     .run("answer".to_string(), None, || async { Ok(42) })
///     .await;
///
/// assert_eq!(res, Ok(42));
/// assert_eq!(role, FlightRole::Leader);
/// assert_eq!(group.in_flight(), 0);
/// # }
/// ```
pub struct SingleFlightGroup<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    flights: Arc<DashMap<K, InFlight<V>>>,
    next_id: AtomicU64,
}

impl<K, V> SingleFlightGroup<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty group.
    pub fn new() -> Self {
        SingleFlightGroup {
            flights: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of loads currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Whether a load for `key` is currently in flight.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights.contains_key(key)
    }

    /// Run `loader` for `key`, or join the load already running for it.
    ///
    /// `loader` is only invoked when this caller becomes the leader; its
    /// future is spawned and runs to completion even if this caller is
    /// dropped. The `deadline` bounds how long a follower waits; the leader's
    /// own read is expected to honor the request deadline itself.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns whatever the flight's loader returned, or `Error::Timeout`
    /// when a follower's deadline elapses first.
    pub async fn run<F, Fut>(
        &self,
        key: K,
        deadline: Option<Instant>,
        loader: F,
    ) -> (Result<V>, FlightRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (role, fut) = self.join_or_start(key, loader);

        let res = match (role, deadline) {
            (FlightRole::Follower, Some(deadline)) => {
                match tokio::time::timeout_at(deadline, fut).await {
                    Ok(res) => res,
                    Err(_) => Err(Error::Timeout(
                        "gave up waiting on in-flight load".to_string(),
                    )),
                }
            }
            _ => fut.await,
        };

        (res, role)
    }

    fn join_or_start<F, Fut>(&self, key: K, loader: F) -> (FlightRole, Flight<V>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        match self.flights.entry(key) {
            Entry::Occupied(entry) => (FlightRole::Follower, entry.get().fut.clone()),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let flights = Arc::downgrade(&self.flights);
                let key = entry.key().clone();
                let load = loader();

                let fut = FlightTask::spawn(async move {
                    let res = match AssertUnwindSafe(load).catch_unwind().await {
                        Ok(res) => res,
                        Err(panic) => Err(Error::Other(format!(
                            "loader panicked: {}",
                            panic_message(panic.as_ref())
                        ))),
                    };

                    // retire before anyone observes the outcome
                    if let Some(flights) = flights.upgrade() {
                        flights.remove_if(&key, |_, flight| flight.id == id);
                    }

                    res
                })
                .boxed()
                .shared();

                entry.insert(InFlight {
                    id,
                    fut: fut.clone(),
                });
                (FlightRole::Leader, fut)
            }
        }
    }
}

impl<K, V> Default for SingleFlightGroup<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
