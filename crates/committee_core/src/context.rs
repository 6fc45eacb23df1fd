//! Per-operation deadline and cancellation token.
//!
//! # Responsibility
//! - Carry the caller's deadline and cancellation signal into every storage
//!   call made on its behalf.
//!
//! # Invariants
//! - A context that is done never reaches a backend write.
//! - Clones share one cancellation flag; cancelling any clone cancels all.
//! - `detached` contexts are independent of their origin's cancellation.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reason a context refused further work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// Caller cancelled the operation.
    Cancelled,
    /// Caller deadline passed.
    DeadlineExceeded,
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::DeadlineExceeded => write!(f, "operation deadline exceeded"),
        }
    }
}

impl Error for ContextError {}

/// Deadline + cancellation token threaded through service, repository and
/// store calls.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl OpContext {
    /// Context without deadline. Only explicit cancellation stops it.
    pub fn background() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fresh context for compensating writes that must still run after the
    /// originating context was cancelled.
    pub fn detached(timeout: Duration) -> Self {
        Self::with_timeout(timeout)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns an error once the context is cancelled or past its deadline.
    pub fn check(&self) -> Result<(), ContextError> {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ContextError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Sleeps for `duration`, cut short by the deadline.
    ///
    /// Returns an error when the context is done after waking.
    pub fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        self.check()?;
        let wait = match self.remaining() {
            Some(remaining) => duration.min(remaining),
            None => duration,
        };
        std::thread::sleep(wait);
        self.check()
    }
}
