//! Repeating callback scheduler built on [`Delay`].
//!
//! Each [`Poller::start`] spawns one loop: invoke the callback, wait for it
//! to settle, then wait a fresh [`Delay`] of the interval. The callback is
//! never re-entered while a previous invocation is outstanding, not even
//! across a stop and restart.

use crate::consts;
use crate::delay::{Delay, DelayCanceller, DelayOutcome};
use crate::error::Result;
use log::{debug, error};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task;

/// State of one started loop. A restart creates a new one.
#[derive(Debug)]
struct Run {
    stop: AtomicBool,
    delay: Mutex<Option<DelayCanceller>>,
    task: Mutex<Option<task::Id>>,
    done: watch::Sender<bool>,
}

impl Run {
    fn new() -> Self {
        let (done, _) = watch::channel(false);
        Run {
            stop: AtomicBool::new(false),
            delay: Mutex::new(None),
            task: Mutex::new(None),
            done,
        }
    }

    fn halt(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let current = self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(canceller) = current.as_ref() {
            canceller.cancel();
        }
    }

    fn halted(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// True when called from this loop's own task.
    fn is_current_task(&self) -> bool {
        let own = *self.task.lock().unwrap_or_else(|e| e.into_inner());
        own.is_some() && own == task::try_id()
    }

    /// Resolves once the loop task has ended.
    async fn finished(&self) {
        let mut done = self.done.subscribe();
        let _ = done.wait_for(|done| *done).await;
    }
}

/// Marks a run as ended when its task finishes, panics or is dropped
/// without ever being polled.
struct Finish(Arc<Run>);

impl Drop for Finish {
    fn drop(&mut self) {
        self.0.stop.store(true, Ordering::SeqCst);
        self.0.done.send_replace(true);
    }
}

/// Clamps a requested interval to the bus-protecting minimum.
pub fn clamp_interval(interval: Duration) -> Duration {
    interval.max(consts::MIN_POLLING_INTERVAL)
}

/// Periodically invokes a callback until stopped.
///
/// Cloning a `Poller` yields another handle to the same loop, which lets a
/// callback stop its own poller.
#[derive(Debug, Clone)]
pub struct Poller {
    name: Arc<str>,
    current: Arc<Mutex<Option<Arc<Run>>>>,
}

impl Poller {
    /// Creates an idle poller. `name` is only used in log messages.
    pub fn new(name: impl Into<String>) -> Self {
        Poller {
            name: Arc::from(name.into()),
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while a loop is active and has not been told to stop.
    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|run| !run.halted())
    }

    /// Starts the loop. Does nothing if this poller is already running.
    ///
    /// If a stopped loop is still finishing its last callback, the new loop
    /// waits for it before the first invocation.
    ///
    /// A callback error is logged and ends this loop; callers that want the
    /// loop to survive failed bus operations must handle them inside the
    /// callback.
    pub fn start<F, Fut>(&self, interval: Duration, mut callback: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (run, previous) = {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            if current.as_ref().is_some_and(|run| !run.halted()) {
                debug!("Polling '{}' already running", self.name);
                return;
            }
            let run = Arc::new(Run::new());
            let previous = current.replace(run.clone());
            (run, previous)
        };

        let interval = clamp_interval(interval);
        let name = self.name.clone();
        debug!("Starting polling '{}' every {:?}", name, interval);

        let finish = Finish(run.clone());
        tokio::spawn(async move {
            let _finish = finish;
            *run.task.lock().unwrap_or_else(|e| e.into_inner()) = task::try_id();
            if let Some(previous) = previous {
                previous.finished().await;
            }
            loop {
                if run.halted() {
                    break;
                }
                if let Err(e) = callback().await {
                    error!("Polling '{}' stopped after callback error: {}", name, e);
                    break;
                }
                let delay = Delay::new(interval);
                let canceller = delay.canceller();
                let wait = delay.run();
                *run.delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(canceller);
                // checked after publishing the canceller so a concurrent stop either
                // sees the running delay or is seen here
                if run.halted() {
                    break;
                }
                if wait.await == DelayOutcome::Cancelled {
                    break;
                }
            }
            debug!("Polling '{}' ended", name);
        });
    }

    /// Stops the loop, cancels its pending delay and waits until a callback
    /// in flight has returned.
    ///
    /// Safe to call repeatedly and while idle. Called from inside the
    /// callback it returns at once; the loop ends when the callback does.
    pub async fn stop(&self) {
        let run = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(run) = run else {
            return;
        };
        if !run.halted() {
            debug!("Stopping polling '{}'", self.name);
        }
        run.halt();
        if run.is_current_task() {
            return;
        }
        run.finished().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_interval_is_clamped() {
        assert_eq!(
            clamp_interval(Duration::from_millis(1)),
            consts::MIN_POLLING_INTERVAL
        );
        assert_eq!(
            clamp_interval(Duration::from_secs(2)),
            Duration::from_secs(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_invokes_callback_repeatedly() {
        let count = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new("count");
        let c = count.clone();
        poller.start(Duration::from_millis(100), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        // iterations at t=0, 100, 200, 300
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
        poller.stop().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callbacks_never_overlap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new("slow");
        let (f, o, c) = (in_flight.clone(), overlaps.clone(), calls.clone());
        poller.start(Duration::from_millis(50), move || {
            let (f, o, c) = (f.clone(), o.clone(), c.clone());
            async move {
                if f.fetch_add(1, Ordering::SeqCst) > 0 {
                    o.fetch_add(1, Ordering::SeqCst);
                }
                c.fetch_add(1, Ordering::SeqCst);
                // callback slower than the interval
                tokio::time::sleep(Duration::from_millis(120)).await;
                f.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        poller.stop().await;
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        // each iteration takes 120ms of work plus a 50ms delay
        let n = calls.load(Ordering::SeqCst);
        assert!((11..=12).contains(&n), "unexpected iteration count {}", n);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_running_is_noop() {
        let count = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new("twice");
        for _ in 0..2 {
            let c = count.clone();
            poller.start(Duration::from_millis(100), move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_from_inside_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new("self-stop");
        let (c, handle) = (count.clone(), poller.clone());
        poller.start(Duration::from_millis(60), move || {
            let (c, handle) = (c.clone(), handle.clone());
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 2 {
                    handle.stop().await;
                    handle.stop().await;
                }
                Ok(())
            }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_error_ends_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new("failing");
        let c = count.clone();
        poller.start(Duration::from_millis(60), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(crate::Error::Bus("boom".to_string()))
            }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new("restart");
        let make = |c: Arc<AtomicUsize>| {
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        };
        poller.start(Duration::from_secs(10), make(count.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.stop().await;
        poller.start(Duration::from_secs(10), make(count.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(poller.is_running());
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_running_callback() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new("slow-restart");
        let make = |f: Arc<AtomicUsize>, m: Arc<AtomicUsize>| {
            move || {
                let (f, m) = (f.clone(), m.clone());
                async move {
                    let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                    m.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    f.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        };
        poller.start(
            Duration::from_millis(50),
            make(in_flight.clone(), max_in_flight.clone()),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(in_flight.load(Ordering::SeqCst), 1);
        poller.stop().await;
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);

        poller.start(
            Duration::from_millis(50),
            make(in_flight.clone(), max_in_flight.clone()),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(in_flight.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(500)).await;
        poller.stop().await;
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_from_inside_callback_waits_for_old_loop() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new("self-restart");
        let (f, m, c, handle) = (
            in_flight.clone(),
            max_in_flight.clone(),
            calls.clone(),
            poller.clone(),
        );
        poller.start(Duration::from_millis(50), move || {
            let (f, m, c, handle) = (f.clone(), m.clone(), c.clone(), handle.clone());
            async move {
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    handle.stop().await;
                    let (f, m, c) = (f.clone(), m.clone(), c.clone());
                    handle.start(Duration::from_millis(50), move || {
                        let (f, m, c) = (f.clone(), m.clone(), c.clone());
                        async move {
                            let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                            m.fetch_max(now, Ordering::SeqCst);
                            c.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            f.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        }
                    });
                    // keep the old callback busy while the new loop exists
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                f.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(poller.is_running());
        assert!(calls.load(Ordering::SeqCst) >= 2);
        poller.stop().await;
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }
}
