//! Time abstraction injected into components that make time-based decisions.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
///
/// The admission script receives "now" as an argument produced by this
/// trait, so the validity window can be exercised deterministically.
///
/// # Examples
///
/// ```
/// use flashsale_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let _now = clock.now();
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
