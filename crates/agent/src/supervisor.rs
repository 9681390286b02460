//! Periodic-loop supervisor.
//!
//! Owns the reconciliation loops: each is an independently scheduled
//! tokio task with its own interval, a shared shutdown signal, and a
//! recover-and-log boundary around every iteration. A tick that returns
//! an error is logged and the loop continues; a tick that panics is
//! caught the same way. One loop can never take down another.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

pub struct Supervisor {
    shutdown: Arc<Notify>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self { shutdown: Arc::new(Notify::new()), handles: Vec::new() }
    }

    /// The shared shutdown signal, for wiring into other components.
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Spawn a periodic loop. `tick` is invoked every `interval`; its
    /// failures and panics are contained to that iteration.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, interval: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            info!(worker = name, period_secs = interval.as_secs_f64(), "loop started");
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        info!(worker = name, "loop shutting down");
                        break;
                    }
                    _ = sleep(interval) => {
                        match AssertUnwindSafe(tick()).catch_unwind().await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => {
                                warn!(worker = name, %err, "iteration failed");
                            }
                            Err(panic) => {
                                error!(
                                    worker = name,
                                    cause = panic_message(panic.as_ref()),
                                    "iteration panicked"
                                );
                            }
                        }
                    }
                }
            }
        });
        self.handles.push(handle);
    }

    /// Signal every loop to stop after its current iteration.
    pub fn begin_shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Wait for every loop to exit.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn panicking_iteration_does_not_stop_the_loop() {
        let ticks = Arc::new(AtomicU64::new(0));
        let mut supervisor = Supervisor::new();
        {
            let ticks = ticks.clone();
            supervisor.spawn_periodic("panicky", Duration::from_millis(5), move || {
                let count = ticks.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count == 0 {
                        panic!("malformed exporter json");
                    }
                    Ok(())
                }
            });
        }

        tokio::time::sleep(Duration::from_millis(60)).await;
        supervisor.begin_shutdown();
        supervisor.join().await;

        assert!(
            ticks.load(Ordering::SeqCst) >= 3,
            "loop kept ticking after the panic"
        );
    }

    #[tokio::test]
    async fn erroring_iteration_continues() {
        let ticks = Arc::new(AtomicU64::new(0));
        let mut supervisor = Supervisor::new();
        {
            let ticks = ticks.clone();
            supervisor.spawn_periodic("flaky", Duration::from_millis(5), move || {
                ticks.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("transient io error")) }
            });
        }

        tokio::time::sleep(Duration::from_millis(40)).await;
        supervisor.begin_shutdown();
        supervisor.join().await;
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn one_loop_failure_does_not_stop_another() {
        let healthy_ticks = Arc::new(AtomicU64::new(0));
        let mut supervisor = Supervisor::new();
        supervisor.spawn_periodic("always-panics", Duration::from_millis(5), || async {
            panic!("boom")
        });
        {
            let ticks = healthy_ticks.clone();
            supervisor.spawn_periodic("healthy", Duration::from_millis(5), move || {
                ticks.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            });
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        supervisor.begin_shutdown();
        supervisor.join().await;
        assert!(healthy_ticks.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn shutdown_stops_all_loops() {
        let ticks = Arc::new(AtomicU64::new(0));
        let mut supervisor = Supervisor::new();
        {
            let ticks = ticks.clone();
            supervisor.spawn_periodic("stoppable", Duration::from_millis(5), move || {
                ticks.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            });
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        supervisor.begin_shutdown();
        supervisor.join().await;
        let after_shutdown = ticks.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_shutdown);
    }
}
