//! Interruptible delays.
//!
//! One [`Waiter`] is shared per run between the engine and the signal
//! handler. The first interrupt skips the active delay; a second interrupt
//! within the interrupt window aborts the run. An interrupt while no delay
//! is active also aborts.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("aborted by operator")]
    Aborted,
    #[error("another wait is already in progress")]
    Busy,
}

/// How a delay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Skipped,
}

/// What an interrupt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Skipped,
    Aborted,
}

#[derive(Debug, Default)]
struct WaitState {
    /// Id and skip token of the active delay.
    active: Option<(u64, CancellationToken)>,
    next_id: u64,
    last_interrupt: Option<Instant>,
}

#[derive(Debug)]
pub struct Waiter {
    abort: CancellationToken,
    interrupt_window: Duration,
    state: Mutex<WaitState>,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl Waiter {
    pub fn new(interrupt_window: Duration) -> Self {
        Self {
            abort: CancellationToken::new(),
            interrupt_window,
            state: Mutex::new(WaitState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WaitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Fails with [`WaitError::Aborted`] once the run has been aborted.
    pub fn check(&self) -> Result<(), WaitError> {
        if self.is_aborted() {
            Err(WaitError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Handle an operator interrupt.
    pub fn interrupt(&self) -> Interrupt {
        let mut state = self.lock();
        let now = Instant::now();
        let repeated = state
            .last_interrupt
            .is_some_and(|at| now.duration_since(at) <= self.interrupt_window);
        state.last_interrupt = Some(now);

        match state.active.take() {
            Some((_, skip)) if !repeated => {
                info!("interrupt: skipping wait, interrupt again to abort");
                skip.cancel();
                Interrupt::Skipped
            }
            active => {
                info!("interrupt: aborting");
                if let Some((_, skip)) = active {
                    skip.cancel();
                }
                self.abort.cancel();
                Interrupt::Aborted
            }
        }
    }

    /// Sleep for `duration` unless skipped or aborted. Only one delay may be
    /// active at a time.
    pub async fn sleep(&self, duration: Duration) -> Result<WaitOutcome, WaitError> {
        self.check()?;
        let (id, skip) = {
            let mut state = self.lock();
            if state.active.is_some() {
                return Err(WaitError::Busy);
            }
            let id = state.next_id;
            state.next_id += 1;
            let skip = CancellationToken::new();
            state.active = Some((id, skip.clone()));
            (id, skip)
        };
        debug!(delay_ms = duration.as_millis() as u64, "waiting");

        let outcome = tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(WaitOutcome::Elapsed),
            _ = self.abort.cancelled() => Err(WaitError::Aborted),
            _ = skip.cancelled() => {
                if self.is_aborted() {
                    Err(WaitError::Aborted)
                } else {
                    Ok(WaitOutcome::Skipped)
                }
            }
        };

        let mut state = self.lock();
        if state.active.as_ref().is_some_and(|(active, _)| *active == id) {
            state.active = None;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    async fn until_active(waiter: &Waiter) {
        while waiter.lock().active.is_none() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn short_wait_elapses() {
        let waiter = Waiter::default();
        assert_eq!(
            waiter.sleep(Duration::from_millis(1)).await,
            Ok(WaitOutcome::Elapsed)
        );
        assert!(!waiter.is_aborted());
    }

    #[tokio::test]
    async fn first_interrupt_skips() {
        let waiter = Arc::new(Waiter::default());
        let sleeping = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.sleep(Duration::from_secs(600)).await })
        };
        until_active(&waiter).await;

        assert_eq!(waiter.interrupt(), Interrupt::Skipped);
        assert_eq!(sleeping.await.unwrap(), Ok(WaitOutcome::Skipped));
        assert!(!waiter.is_aborted());
    }

    #[tokio::test]
    async fn second_interrupt_aborts() {
        let waiter = Arc::new(Waiter::new(Duration::from_secs(60)));
        let first = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.sleep(Duration::from_secs(600)).await })
        };
        until_active(&waiter).await;
        assert_eq!(waiter.interrupt(), Interrupt::Skipped);
        assert_eq!(first.await.unwrap(), Ok(WaitOutcome::Skipped));

        let second = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.sleep(Duration::from_secs(600)).await })
        };
        until_active(&waiter).await;
        assert_eq!(waiter.interrupt(), Interrupt::Aborted);
        assert_eq!(second.await.unwrap(), Err(WaitError::Aborted));
        assert!(waiter.is_aborted());
        assert_eq!(
            waiter.sleep(Duration::from_millis(1)).await,
            Err(WaitError::Aborted)
        );
    }

    #[tokio::test]
    async fn interrupt_outside_a_wait_aborts() {
        let waiter = Waiter::default();
        assert_eq!(waiter.interrupt(), Interrupt::Aborted);
        assert!(waiter.check().is_err());
    }

    #[tokio::test]
    async fn concurrent_waits_are_rejected() {
        let waiter = Arc::new(Waiter::default());
        let sleeping = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.sleep(Duration::from_secs(600)).await })
        };
        until_active(&waiter).await;

        assert_eq!(
            waiter.sleep(Duration::from_millis(1)).await,
            Err(WaitError::Busy)
        );
        waiter.interrupt();
        assert_eq!(sleeping.await.unwrap(), Ok(WaitOutcome::Skipped));
    }
}
