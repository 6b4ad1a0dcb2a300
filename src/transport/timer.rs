//! Single-slot cancellable delayed task

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Holds at most one pending task. Scheduling replaces (and cancels) the previous
/// one; cancelling only prevents a task that has not fired yet.
#[derive(Debug, Default)]
pub struct DeferredTask {
    pending: Option<Pending>,
}

#[derive(Debug)]
struct Pending {
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
    fires_at: Instant,
}

impl DeferredTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay` unless cancelled or replaced first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let cancel = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fires_at = Instant::now() + delay;

        let token = cancel.clone();
        let flag = Arc::clone(&fired);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(fires_at) => {}
            }
            flag.store(true, Ordering::Release);
            task.await;
        });

        self.pending = Some(Pending { cancel, fired, fires_at });
    }

    /// Cancel the pending task. Returns true if one was waiting to fire.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.cancel.cancel();
                !pending.fired.load(Ordering::Acquire)
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|pending| !pending.fired.load(Ordering::Acquire))
    }

    /// Deadline of the task still waiting to fire
    pub fn fires_at(&self) -> Option<Instant> {
        self.pending.as_ref().filter(|_| self.is_pending()).map(|pending| pending.fires_at)
    }
}

impl Drop for DeferredTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(count: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let count = Arc::clone(count);
        async move {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut timer = DeferredTask::new();
        timer.schedule(Duration::from_secs(2), counting(&count));
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_pending());
        assert_eq!(timer.fires_at(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_pending_task() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut timer = DeferredTask::new();

        timer.schedule(Duration::from_secs(1), counting(&first));
        timer.schedule(Duration::from_secs(3), counting(&second));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut timer = DeferredTask::new();
        timer.schedule(Duration::from_secs(1), counting(&count));

        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let mut timer = DeferredTask::new();
            timer.schedule(Duration::from_secs(1), counting(&count));
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
