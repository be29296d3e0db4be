//! Single-slot, TTL-bounded cache entry with an optional expiry callback.
//!
//! Mirrors the reference client cache: `set` replaces the value and
//! (re)schedules an expiry timer; `get` returns `None` once the entry has
//! expired even if the timer callback has not yet run; `cancel` tears down
//! a pending timer without otherwise touching validity.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// A boxed, cloneable async callback invoked when a cache entry expires.
pub type ExpiryCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Inner<T> {
    value: Option<T>,
    expiry_time: Instant,
}

/// A cache holding at most one value of type `T`, with a time-to-live.
///
/// `T` must be `Clone + Send + 'static` so that `get()` can return an
/// owned copy without holding the internal lock across the call, and so
/// the expiry timer task can be spawned independently of the caller.
pub struct CacheEntry<T> {
    inner: Arc<Mutex<Inner<T>>>,
    on_expired: Option<ExpiryCallback>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<T> CacheEntry<T>
where
    T: Clone + Send + 'static,
{
    /// Build an entry with no expiry callback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value: None,
                expiry_time: Instant::now(),
            })),
            on_expired: None,
            timer: Mutex::new(None),
        }
    }

    /// Build an entry that invokes `on_expired` (best-effort, fire-and-forget)
    /// when its value expires.
    #[must_use]
    pub fn with_expiry_callback(on_expired: ExpiryCallback) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value: None,
                expiry_time: Instant::now(),
            })),
            on_expired: Some(on_expired),
            timer: Mutex::new(None),
        }
    }

    /// `true` if the entry holds a value whose TTL has not yet elapsed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.value.is_some() && Instant::now() < inner.expiry_time
    }

    /// Return the cached value if still valid, else `None`.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if Instant::now() < inner.expiry_time {
            inner.value.clone()
        } else {
            None
        }
    }

    /// Store `value`, cancelling any pending expiry timer and scheduling a
    /// new one if `ttl > 0` and an expiry callback was configured.
    pub fn set(&self, value: T, ttl: Duration) {
        self.cancel_expiry_task();

        let expiry_time = Instant::now() + ttl;
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.value = Some(value);
            inner.expiry_time = expiry_time;
        }

        if ttl > Duration::ZERO {
            if let Some(on_expired) = self.on_expired.clone() {
                let inner = Arc::clone(&self.inner);
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(ttl).await;
                    {
                        let mut guard = inner.lock().unwrap_or_else(|e| e.into_inner());
                        guard.value = None;
                    }
                    tokio::spawn(on_expired());
                });
                *self.timer.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
            }
        }
    }

    /// Cancel any pending expiry timer. Does not clear the stored value or
    /// otherwise affect its time-based validity.
    pub fn cancel_expiry_task(&self) {
        if let Some(handle) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

impl<T> Default for CacheEntry<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for CacheEntry<T> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.timer.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
