//! Periodic reconnection.
//!
//! Runs a caller-supplied function, sleeps a fixed interval, and repeats until
//! stopped. No backoff and no attempt limit: the task ends only through
//! [`Reconnector::stop`].

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Reconnection function run on every attempt.
pub type ReconnectFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Reconnector {
    interval: Duration,
    function: Option<ReconnectFn>,
    task: Option<JoinHandle<()>>,
}

impl Reconnector {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            function: None,
            task: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Replace the reconnection function. A running task keeps the old one.
    pub fn set_function(&mut self, function: ReconnectFn) {
        self.function = Some(function);
    }

    pub fn has_function(&self) -> bool {
        self.function.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start the task. No-op if already running or no function is set.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        let Some(function) = self.function.clone() else {
            return false;
        };

        debug!("Starting reconnector (interval {:?})", self.interval);
        let interval = self.interval;
        self.task = Some(tokio::spawn(async move {
            loop {
                function().await;
                tokio::time::sleep(interval).await;
            }
        }));
        true
    }

    /// Stop the task. No-op if not running.
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(task) if !task.is_finished() => {
                debug!("Stopping reconnector");
                task.abort();
                true
            }
            _ => false,
        }
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for Reconnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconnector")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> ReconnectFn {
        let counter = Arc::clone(counter);
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_start_without_function_is_noop() {
        let mut reconnector = Reconnector::new(Duration::from_millis(10));
        assert!(!reconnector.start());
        assert!(!reconnector.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_at_fixed_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut reconnector = Reconnector::new(Duration::from_millis(100));
        reconnector.set_function(counting(&counter));

        assert!(reconnector.start());
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        assert!(reconnector.stop());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut reconnector = Reconnector::new(Duration::from_secs(60));
        reconnector.set_function(counting(&counter));

        assert!(reconnector.start());
        assert!(!reconnector.start());
        assert!(reconnector.is_running());

        assert!(reconnector.stop());
        assert!(!reconnector.stop());
        assert!(!reconnector.is_running());
    }
}
