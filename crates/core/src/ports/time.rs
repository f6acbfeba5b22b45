use std::time::Instant;

/// Clock abstraction for testability
pub trait Clock: Send + Sync {
    /// Current monotonic instant, used to derive transfer rates
    fn now(&self) -> Instant;
}

/// System clock implementation
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
