//! Request-scoped context threaded through every cache and storage call.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Per-request flags consulted by the cache and by repository adapters.
///
/// - **barebones**: return models without resolving related entities. Every
///   hydration step uses a barebones context for the relations it fetches,
///   which stops recursive hydration cycles.
/// - **deadline**: storage calls and waits on another caller's in-flight
///   load give up with `Error::Timeout` once it has passed.
///
/// # Example
///
/// ```
/// use keyed_cache::RequestContext;
/// use std::time::Duration;
///
/// let ctx = RequestContext::new().with_timeout(Duration::from_secs(5));
/// let inner = ctx.barebones();
///
/// assert!(!ctx.is_barebones());
/// assert!(inner.is_barebones());
/// assert_eq!(inner.deadline(), ctx.deadline());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    barebones: bool,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context with hydration enabled and no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this context with barebones set.
    pub fn barebones(&self) -> Self {
        RequestContext {
            barebones: true,
            deadline: self.deadline,
        }
    }

    /// Whether only barebones models were requested.
    pub fn is_barebones(&self) -> bool {
        self.barebones
    }

    /// Set the deadline to `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set an absolute deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// The request deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline has already passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Drive `fut` to completion, bounded by the request deadline.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if the deadline elapses first, otherwise the
    /// future's own result.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout("request deadline elapsed".to_string())),
            },
            None => fut.await,
        }
    }
}
