/*!
 * Lock Facade
 * Process-wide keyed lock behind module-level functions
 *
 * All functions share one `KeyedLock<String>` built from
 * `LockConfig::from_env()` on first use. Empty keys are rejected with
 * `InvalidArgument` before the engine is touched.
 */

use crate::core::errors::{LockError, LockResult};
use crate::core::guard::LockTimeout;
use crate::core::sync::{CancellationToken, KeyedGuard, KeyedLock, LockConfig};
use std::future::Future;
use std::sync::OnceLock;
use tracing::warn;

/// Global lock instance
static GLOBAL_LOCKS: OnceLock<KeyedLock<String>> = OnceLock::new();

/// Shared engine behind the facade
pub fn instance() -> &'static KeyedLock<String> {
    GLOBAL_LOCKS.get_or_init(|| {
        LockConfig::from_env()
            .and_then(KeyedLock::with_config)
            .unwrap_or_else(|e| {
                warn!(error = %e, "invalid lock configuration in environment, using defaults");
                KeyedLock::new()
            })
    })
}

#[inline]
fn checked_key(key: &str) -> LockResult<String> {
    if key.is_empty() {
        return Err(LockError::invalid("lock key must not be empty"));
    }
    Ok(key.to_owned())
}

/// Block until `key` is acquired
pub fn acquire(key: &str, cancel: Option<&CancellationToken>) -> LockResult<KeyedGuard<String>> {
    instance().acquire(checked_key(key)?, cancel)
}

/// Block until `key` is acquired or `timeout` expires
pub fn acquire_timeout(
    key: &str,
    timeout: impl Into<LockTimeout>,
    cancel: Option<&CancellationToken>,
) -> LockResult<KeyedGuard<String>> {
    instance().acquire_timeout(checked_key(key)?, timeout, cancel)
}

/// Suspend until `key` is acquired
pub async fn acquire_async(
    key: &str,
    cancel: Option<&CancellationToken>,
) -> LockResult<KeyedGuard<String>> {
    instance().acquire_async(checked_key(key)?, cancel).await
}

/// Suspend until `key` is acquired or `timeout` expires
pub async fn acquire_timeout_async(
    key: &str,
    timeout: impl Into<LockTimeout>,
    cancel: Option<&CancellationToken>,
) -> LockResult<KeyedGuard<String>> {
    instance()
        .acquire_timeout_async(checked_key(key)?, timeout, cancel)
        .await
}

/// Run `on_acquired` under `key` if it can be taken within `timeout`
pub fn try_acquire<F>(
    key: &str,
    timeout: impl Into<LockTimeout>,
    cancel: Option<&CancellationToken>,
    on_acquired: F,
) -> LockResult<bool>
where
    F: FnOnce(),
{
    instance().try_acquire(checked_key(key)?, timeout, cancel, on_acquired)
}

/// Async counterpart of [`try_acquire`]
pub async fn try_acquire_async<F, Fut>(
    key: &str,
    timeout: impl Into<LockTimeout>,
    cancel: Option<&CancellationToken>,
    on_acquired: F,
) -> LockResult<bool>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    instance()
        .try_acquire_async(checked_key(key)?, timeout, cancel, on_acquired)
        .await
}

/// Take `key` only if it is free right now
pub fn try_lock(key: &str) -> LockResult<Option<KeyedGuard<String>>> {
    Ok(instance().try_lock(checked_key(key)?))
}

/// Check whether `key` is currently held
#[inline]
pub fn is_in_use(key: &str) -> bool {
    !key.is_empty() && instance().is_in_use(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_empty_key_rejected() {
        assert!(matches!(acquire("", None), Err(LockError::InvalidArgument(_))));
        assert!(matches!(try_lock(""), Err(LockError::InvalidArgument(_))));
        assert!(!is_in_use(""));
    }

    #[test]
    #[serial]
    fn test_instance_is_shared() {
        let guard = acquire("facade-unit", None).unwrap();
        assert!(instance().is_in_use("facade-unit"));
        assert!(std::ptr::eq(instance(), instance()));
        drop(guard);
        assert!(!is_in_use("facade-unit"));
    }
}
