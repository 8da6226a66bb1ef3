//! Callback execution pool.
//!
//! User callbacks run on a dedicated multi-thread runtime whose workers are
//! named `gridlink-callback`, never on the delivery task. Submission is
//! synchronous and never blocks. Errors and panics are caught per unit.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use gridlink_telemetry::Metrics;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::error::{ClientError, ClientResult};
use crate::scope::LogScope;

/// Worker thread name for callback units.
pub const CALLBACK_THREAD_NAME: &str = "gridlink-callback";

pub struct CallbackPool {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    closed: AtomicBool,
    max_workers: usize,
    scope: LogScope,
}

/// Decrements the in-flight counter when a unit finishes or is dropped.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl CallbackPool {
    /// Start a pool running at most `max_workers` callbacks at once.
    pub fn new(max_workers: usize, scope: LogScope) -> ClientResult<Self> {
        let max_workers = max_workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(max_workers)
            .thread_name(CALLBACK_THREAD_NAME)
            .enable_all()
            .build()
            .map_err(|e| ClientError::CallbackPool(e.to_string()))?;

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            permits: Arc::new(Semaphore::new(max_workers)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
            max_workers,
            scope,
        })
    }

    /// Queue a callback. Returns immediately.
    ///
    /// After [`shutdown`](Self::shutdown) the unit is dropped with a warning.
    pub fn submit<F>(&self, label: &'static str, callback: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            warn!(callback = label, "Callback pool shut down, dropping callback");
            Metrics::callbacks_dropped(1);
            return;
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard(self.in_flight.clone());
        let permits = self.permits.clone();

        let unit = async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match AssertUnwindSafe(callback).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(callback = label, error = %e, "Callback failed");
                    Metrics::callback_failed(label, "error");
                }
                Err(panic) => {
                    error!(callback = label, panic = %panic_message(panic.as_ref()), "Callback panicked");
                    Metrics::callback_failed(label, "panic");
                }
            }
        };

        self.handle.spawn(self.scope.bind(unit));
    }

    /// Units submitted but not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the pool without waiting. Pending units are dropped.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending = self.pending();
        if pending > 0 {
            warn!(pending, "Callback pool shutting down, dropping pending callbacks");
            Metrics::callbacks_dropped(pending);
        } else {
            debug!("Callback pool shut down");
        }
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for CallbackPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CallbackPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackPool")
            .field("max_workers", &self.max_workers)
            .field("pending", &self.pending())
            .field("closed", &self.is_shut_down())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tracing::info_span;

    fn pool(max_workers: usize) -> CallbackPool {
        CallbackPool::new(max_workers, LogScope::new(None, || info_span!("test"))).unwrap()
    }

    #[tokio::test]
    async fn test_callback_runs_on_pool_thread() {
        let pool = pool(2);
        let (tx, mut rx) = mpsc::unbounded_channel();

        pool.submit("probe", async move {
            let name = std::thread::current().name().map(str::to_string);
            let _ = tx.send(name);
            Ok(())
        });

        let name = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(name.as_deref(), Some(CALLBACK_THREAD_NAME));
    }

    #[tokio::test]
    async fn test_errors_and_panics_do_not_stop_other_units() {
        let pool = pool(2);
        let (tx, mut rx) = mpsc::unbounded_channel();

        pool.submit("failing", async { Err(anyhow::anyhow!("boom")) });
        pool.submit("panicking", async {
            if std::hint::black_box(true) {
                panic!("callback panic");
            }
            Ok(())
        });
        let done = tx.clone();
        pool.submit("healthy", async move {
            let _ = done.send("healthy");
            Ok(())
        });

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some("healthy"));

        tokio::time::timeout(Duration::from_secs(2), async {
            while pool.pending() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = pool(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            let tx = tx.clone();
            pool.submit("bounded", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(());
                Ok(())
            });
        }

        for _ in 0..6 {
            tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_dropped() {
        let pool = pool(1);
        pool.shutdown();
        assert!(pool.is_shut_down());

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        pool.submit("late", async move {
            let _ = tx.send(());
            Ok(())
        });

        // Sender was dropped with the unit, so the channel closes unused
        assert_eq!(rx.recv().await, None);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drops_pending_units() {
        let pool = pool(1);
        pool.submit("slow", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        assert_eq!(pool.pending(), 1);

        pool.shutdown();
        pool.shutdown();
        assert!(pool.is_shut_down());
    }
}
