//! Cancellable single-shot delay.
//!
//! A [`Delay`] is armed on construction and started by [`Delay::run`], which
//! consumes it, so a delay cannot be run twice. Cancellation goes through a
//! cloneable [`DelayCanceller`] obtained before the delay is run; the awaiting
//! side observes a [`DelayOutcome`] instead of an error.

use log::trace;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// How a delay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayOutcome {
    /// The full duration elapsed.
    Completed,
    /// [`DelayCanceller::cancel`] was called while the delay was running.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Armed,
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    wake: Notify,
}

impl Shared {
    fn state(&self) -> State {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, state: State) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

/// An armed, unstarted timer.
#[derive(Debug)]
pub struct Delay {
    duration: Duration,
    shared: Arc<Shared>,
}

/// Handle used to abort a running [`Delay`].
#[derive(Debug, Clone)]
pub struct DelayCanceller {
    shared: Arc<Shared>,
}

impl Delay {
    /// Creates an armed delay. Nothing happens until [`Delay::run`].
    pub fn new(duration: Duration) -> Self {
        Delay {
            duration,
            shared: Arc::new(Shared {
                state: Mutex::new(State::Armed),
                wake: Notify::new(),
            }),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns a handle that can cancel this delay once it runs.
    pub fn canceller(&self) -> DelayCanceller {
        DelayCanceller {
            shared: self.shared.clone(),
        }
    }

    /// Starts the timer and returns the future that resolves when it ends.
    ///
    /// The delay counts as running as soon as this returns, before the
    /// future is first polled, so a cancel issued in between is not lost.
    pub fn run(self) -> impl Future<Output = DelayOutcome> + Send + 'static {
        self.shared.set(State::Running);
        let Delay { duration, shared } = self;
        async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = shared.wake.notified() => {}
            }
            let mut state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                State::Cancelled => {
                    trace!("Delay of {:?} cancelled", duration);
                    DelayOutcome::Cancelled
                }
                _ => {
                    *state = State::Completed;
                    DelayOutcome::Completed
                }
            }
        }
    }
}

impl DelayCanceller {
    /// Aborts the delay if it is running and has not yet resolved.
    ///
    /// Calling this before the delay runs, after it resolved, or a second
    /// time does nothing.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == State::Running {
            *state = State::Cancelled;
            // notify_one stores a permit, so a waiter that has not polled yet still wakes
            self.shared.wake.notify_one();
        }
    }

    /// True once the delay has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.state() == State::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_delay_completes_after_duration() {
        let start = tokio::time::Instant::now();
        let outcome = Delay::new(Duration::from_millis(200)).run().await;
        assert_eq!(outcome, DelayOutcome::Completed);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_running() {
        let delay = Delay::new(Duration::from_secs(10));
        let canceller = delay.canceller();
        let waiter = tokio::spawn(delay.run());
        tokio::time::sleep(Duration::from_millis(5)).await;
        canceller.cancel();
        canceller.cancel();
        assert_eq!(waiter.await.unwrap(), DelayOutcome::Cancelled);
        assert!(canceller.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_run_is_noop() {
        let delay = Delay::new(Duration::from_millis(30));
        let canceller = delay.canceller();
        canceller.cancel();
        assert!(!canceller.is_cancelled());
        assert_eq!(delay.run().await, DelayOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_completion_is_noop() {
        let delay = Delay::new(Duration::from_millis(30));
        let canceller = delay.canceller();
        assert_eq!(delay.run().await, DelayOutcome::Completed);
        canceller.cancel();
        assert!(!canceller.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_run_and_first_poll() {
        let delay = Delay::new(Duration::from_secs(60));
        let canceller = delay.canceller();
        let fut = delay.run();
        canceller.cancel();
        assert_eq!(fut.await, DelayOutcome::Cancelled);
    }
}
