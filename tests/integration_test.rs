//! Integration tests for keyed-cache
//!
//! These tests verify end-to-end cache behavior across all components:
//! multi-key indexing, single-flight loads, invalidation cascades and the
//! handling of failed or empty backend reads.

use keyed_cache::model::{Account, User, UserKey, UserKeyKind};
use keyed_cache::{
    CacheConfig, CacheEntity, Error, KeyedCache, ListenerScope, RequestContext, Result,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn alice() -> User {
    User::new("u1", "a1").with_email("a@example.org")
}

/// Loader that sleeps 50ms, counts its invocations and returns `user`.
fn counted_loader(
    calls: &Arc<AtomicUsize>,
    user: User,
) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<User>> {
    let calls = Arc::clone(calls);
    move || {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(user)
        })
    }
}

/// Test 1: Store then load through every key
///
/// A stored entity is reachable under each of its natural keys without
/// invoking the loader.
#[tokio::test]
async fn test_store_then_load_via_every_key() {
    init_logging();
    let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
    let ctx = RequestContext::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let user = alice().with_external_id("oidc|alice");
    cache.store(&user, || async { Ok(()) }).await.unwrap();

    for key in user.cache_keys() {
        let got = cache
            .load(&ctx, &key, counted_loader(&calls, User::new("x", "y")))
            .await
            .unwrap();
        assert_eq!(got, user, "lookup via {} returned the wrong entity", key);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Test 2: The concrete single-flight scenario
///
/// Two concurrent loads of Email "a@example.org" with a 50ms loader invoke it
/// once and see identical values. Invalidating by ID "u1" then removes the
/// Email entry too, so the next Email load runs a fresh loader exactly once.
#[tokio::test]
async fn test_concurrent_email_loads_then_invalidate_by_id() {
    init_logging();
    let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
    let ctx = RequestContext::new();
    let email = UserKey::Email("a@example.org".to_string());

    let calls = Arc::new(AtomicUsize::new(0));
    let (first, second) = tokio::join!(
        cache.load(&ctx, &email, counted_loader(&calls, alice())),
        cache.load(&ctx, &email, counted_loader(&calls, alice())),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert_eq!(cache.stats().coalesced, 1);
    assert!(cache.contains(&UserKey::Id("u1".to_string())));

    let outcome = cache.invalidate(&UserKey::Id("u1".to_string()));
    assert_eq!(outcome.removed.map(|u| u.id), Some("u1".to_string()));
    assert!(!cache.contains(&email));

    let reloads = Arc::new(AtomicUsize::new(0));
    let reloaded = cache
        .load(&ctx, &email, counted_loader(&reloads, alice()))
        .await
        .unwrap();
    assert_eq!(reloaded.id, "u1");
    assert_eq!(reloads.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test 3: Many concurrent callers, one backend read
#[tokio::test]
async fn test_many_tasks_share_one_read() {
    init_logging();
    let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let cache = cache.clone();
        let loader = counted_loader(&calls, alice());
        handles.push(tokio::spawn(async move {
            cache
                .load(&RequestContext::new(), &UserKey::Id("u1".to_string()), loader)
                .await
        }));
    }

    for handle in handles {
        let user = handle.await.expect("Task failed").expect("Load failed");
        assert_eq!(user.email.as_deref(), Some("a@example.org"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.in_flight(), 0);
}

/// Test 4: Listeners observe the removed value before invalidate returns
#[tokio::test]
async fn test_cascade_listener_runs_before_return() {
    init_logging();
    let users: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
    let accounts: KeyedCache<Account> = KeyedCache::new(CacheConfig::default()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let dependants = accounts.clone();
    let captured = Arc::clone(&seen);
    users.register_invalidation_listener(
        ListenerScope::Key(UserKeyKind::Email),
        "drop-account",
        move |user: &User| {
            captured.lock().push(user.account_id.clone());
            dependants.invalidate_id(&user.account_id);
            Ok(())
        },
    );

    accounts
        .store(&Account::local("a1", "alice", "example.org"), || async {
            Ok(())
        })
        .await
        .unwrap();
    users.store(&alice(), || async { Ok(()) }).await.unwrap();

    let outcome = users.invalidate(&UserKey::Email("a@example.org".to_string()));

    assert!(outcome.is_clean());
    assert_eq!(*seen.lock(), vec!["a1".to_string()]);
    assert!(accounts.is_empty());
}

/// Test 5: A failing listener does not stop removal or other listeners
#[tokio::test]
async fn test_listener_failure_is_isolated() {
    init_logging();
    let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
    let healthy = Arc::new(AtomicUsize::new(0));

    cache.register_invalidation_listener(ListenerScope::Any, "broken", |_: &User| {
        Err(Error::StorageError("dependent cache unavailable".to_string()))
    });
    let counter = Arc::clone(&healthy);
    cache.register_invalidation_listener(ListenerScope::Any, "healthy", move |_: &User| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    cache.store(&alice(), || async { Ok(()) }).await.unwrap();
    let outcome = cache.invalidate(&UserKey::Id("u1".to_string()));

    assert_eq!(outcome.errors.len(), 1);
    assert!(matches!(outcome.errors[0], Error::ListenerError(_)));
    assert!(outcome.removed.is_some());
    assert!(cache.is_empty());
    // once for the store, once for the invalidation
    assert_eq!(healthy.load(Ordering::SeqCst), 2);
}

/// Test 6: A failed write leaves the cache untouched
#[tokio::test]
async fn test_failed_write_leaves_no_trace() {
    init_logging();
    let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
    let ctx = RequestContext::new();
    let original = alice();
    cache.store(&original, || async { Ok(()) }).await.unwrap();

    let changed = User {
        email: Some("b@example.org".to_string()),
        ..alice()
    };
    let res = cache
        .store(&changed, || async {
            Err(Error::StorageError("unique violation".to_string()))
        })
        .await;

    assert!(matches!(res, Err(Error::StorageError(_))));
    assert!(!cache.contains(&UserKey::Email("b@example.org".to_string())));
    let cached = cache
        .load(&ctx, &UserKey::Email("a@example.org".to_string()), || async {
            Err(Error::NotFound)
        })
        .await
        .unwrap();
    assert_eq!(cached, original);
}

/// Test 7: Negative results are not sticky
#[tokio::test]
async fn test_not_found_then_insert_is_visible() {
    init_logging();
    let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
    let ctx = RequestContext::new();
    let key = UserKey::Email("a@example.org".to_string());

    let missing = cache.load(&ctx, &key, || async { Err(Error::NotFound) }).await;
    assert!(missing.unwrap_err().is_not_found());

    let calls = Arc::new(AtomicUsize::new(0));
    let found = cache
        .load(&ctx, &key, counted_loader(&calls, alice()))
        .await
        .unwrap();
    assert_eq!(found.id, "u1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test 8: Followers give up at their own deadline; the load carries on
#[tokio::test]
async fn test_follower_deadline() {
    init_logging();
    let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
    let key = UserKey::Id("u1".to_string());
    let calls = Arc::new(AtomicUsize::new(0));

    let patient = RequestContext::new();
    let hurried = RequestContext::new().with_timeout(Duration::from_millis(10));

    let (leader, follower) = tokio::join!(
        cache.load(&patient, &key, counted_loader(&calls, alice())),
        cache.load(&hurried, &key, counted_loader(&calls, alice())),
    );

    assert_eq!(leader.unwrap().id, "u1");
    assert!(matches!(follower, Err(Error::Timeout(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.contains(&key));
}

/// Test 9: Loader errors are shared by the flight and carry context
#[tokio::test]
async fn test_shared_error_with_context() {
    init_logging();
    let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
    let ctx = RequestContext::new();
    let key = UserKey::Email("a@example.org".to_string());

    let failing = || async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Err::<User, _>(Error::StorageError("connection refused".to_string()))
    };
    let (a, b) = tokio::join!(
        cache.load(&ctx, &key, failing),
        cache.load(&ctx, &key, failing),
    );

    let expected = Error::StorageError("user[Email:a@example.org]: connection refused".to_string());
    assert_eq!(a.unwrap_err(), expected);
    assert_eq!(b.unwrap_err(), expected);
    assert!(cache.is_empty());
}
