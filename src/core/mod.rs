/*!
 * Core Module
 * Lock engines, guards and error handling
 */

pub mod errors;
pub mod guard;
pub mod sync;

// Re-export for convenience
pub use errors::*;
pub use guard::{Deadline, Guard, GuardMetadata, LockTimeout};
