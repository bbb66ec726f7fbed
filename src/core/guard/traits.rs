/*!
 * Guard Traits
 *
 * Core abstraction for lock acquisition guards
 */

use super::GuardMetadata;

/// Core guard trait
///
/// All lock guards implement this to provide:
/// - Resource type identification
/// - Metadata access
/// - Explicit, consuming release
///
/// # Type Safety
///
/// `release` takes `self`, so releasing twice is a compile error rather
/// than a runtime check.
pub trait Guard: Send {
    /// Resource type name for logging/debugging
    fn resource_type(&self) -> &'static str;

    /// Get guard metadata
    fn metadata(&self) -> &GuardMetadata;

    /// Release the lock now instead of at end of scope
    fn release(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}
