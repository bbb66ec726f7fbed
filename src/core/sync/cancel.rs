/*!
 * Cancellation Tokens
 *
 * Cooperative cancellation for lock waits, observable from both blocking
 * threads (callback registration) and async tasks (`cancelled().await`).
 *
 * # Linking
 *
 * `child_token()` returns a token that is cancelled when either it or its
 * parent is cancelled. This is how a long-lived source (e.g. a shutdown
 * token) is combined with a per-call source. The child unregisters from the
 * parent when its last clone drops, so parents never accumulate dead
 * children.
 */

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

type Callback = Arc<dyn Fn() + Send + Sync>;

struct Callbacks {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
    callbacks: Mutex<Callbacks>,
    /// Parent token and our registration id in it
    parent: Option<(Arc<TokenInner>, u64)>,
}

impl TokenInner {
    fn new(parent: Option<(Arc<TokenInner>, u64)>) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
            callbacks: Mutex::new(Callbacks {
                next_id: 0,
                entries: Vec::new(),
            }),
            parent,
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        self.notify.notify_waiters();

        // Run outside the lock: callbacks may cancel children
        let entries = std::mem::take(&mut self.callbacks.lock().entries);
        for (_, callback) in entries {
            callback();
        }
    }

    /// Returns `None` if already cancelled (callback has run inline)
    fn register(&self, callback: Callback) -> Option<u64> {
        let mut callbacks = self.callbacks.lock();
        if self.cancelled.load(Ordering::Acquire) {
            drop(callbacks);
            callback();
            return None;
        }

        let id = callbacks.next_id;
        callbacks.next_id += 1;
        callbacks.entries.push((id, callback));
        Some(id)
    }

    fn unregister(&self, id: u64) {
        self.callbacks.lock().entries.retain(|(entry, _)| *entry != id);
    }
}

impl Drop for TokenInner {
    fn drop(&mut self) {
        if let Some((parent, id)) = self.parent.take() {
            parent.unregister(id);
        }
    }
}

/// Cooperative cancellation signal
///
/// Clones share state: cancelling any clone cancels all of them.
///
/// # Example
///
/// ```ignore
/// let shutdown = CancellationToken::new();
/// let request = shutdown.child_token();
///
/// let guard = locks.acquire_async(key, Some(&request)).await?;
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Create a new, uncancelled token
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner::new(None)),
        }
    }

    /// Create a token cancelled together with this one
    pub fn child_token(&self) -> Self {
        let child = Arc::new_cyclic(|weak: &Weak<TokenInner>| {
            let weak = weak.clone();
            let link: Callback = Arc::new(move || {
                if let Some(child) = weak.upgrade() {
                    child.cancel();
                }
            });

            match self.inner.register(link) {
                Some(id) => TokenInner::new(Some((self.inner.clone(), id))),
                None => TokenInner::new(None),
            }
        });

        // Parent was already cancelled while the child was under construction
        if self.is_cancelled() {
            child.cancel();
        }

        Self { inner: child }
    }

    /// Trigger cancellation (idempotent)
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Run `callback` once when the token is cancelled
    ///
    /// Runs inline if the token is already cancelled. Dropping the returned
    /// registration unregisters the callback.
    pub fn on_cancel<F>(&self, callback: F) -> CancelRegistration
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.register(Arc::new(callback));
        CancelRegistration {
            token: self.inner.clone(),
            id,
        }
    }

    /// Complete once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Registration handle from [`CancellationToken::on_cancel`]
#[must_use = "dropping the registration unregisters the callback"]
pub struct CancelRegistration {
    token: Arc<TokenInner>,
    id: Option<u64>,
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.token.unregister(id);
        }
    }
}

/// Check an optional token
#[inline]
pub(crate) fn is_cancelled(token: Option<&CancellationToken>) -> bool {
    token.is_some_and(CancellationToken::is_cancelled)
}

/// Wait on an optional token; never completes for `None`
pub(crate) async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
