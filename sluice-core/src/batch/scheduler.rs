//! When a batch dispatch actually runs.
//!
//! A loader hands its dispatch to a [`Scheduler`] the moment the first key
//! of a new batch is registered. Everything registered before the scheduler
//! runs the dispatch ends up in the same batch.

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use futures::future::BoxFuture;

pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, dispatch: BoxFuture<'static, ()>);
}

/// Any `Fn(dispatch)` closure is a scheduler.
impl<F> Scheduler for F
where
    F: Fn(BoxFuture<'static, ()>) + Send + Sync + 'static,
{
    fn schedule(&self, dispatch: BoxFuture<'static, ()>) {
        self(dispatch)
    }
}

/// Spawns the dispatch and yields before running it.
///
/// On a current-thread runtime this collects every load issued before the
/// calling task next awaits. On a multi-thread runtime the boundary is
/// best effort; use [`DelayScheduler`] for a wider window.
#[derive(Debug, Clone, Copy)]
pub struct TokioScheduler {
    yields: usize,
}

impl TokioScheduler {
    pub fn new(yields: usize) -> Self {
        Self { yields }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self { yields: 1 }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, dispatch: BoxFuture<'static, ()>) {
        let yields = self.yields;
        tokio::spawn(async move {
            for _ in 0..yields {
                tokio::task::yield_now().await;
            }
            dispatch.await;
        });
    }
}

/// Spawns the dispatch after a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct DelayScheduler {
    delay: Duration,
}

impl DelayScheduler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Scheduler for DelayScheduler {
    fn schedule(&self, dispatch: BoxFuture<'static, ()>) {
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            dispatch.await;
        });
    }
}

/// Queues dispatches until [`run_pending`](ManualScheduler::run_pending) is called.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run every dispatch queued so far, in order. Returns how many ran.
    pub async fn run_pending(&self) -> usize {
        let queued = std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner));
        let count = queued.len();
        for dispatch in queued {
            dispatch.await;
        }
        count
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, dispatch: BoxFuture<'static, ()>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dispatch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn counting(counter: &Arc<AtomicUsize>) -> BoxFuture<'static, ()> {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_manual_scheduler_runs_on_demand() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(counting(&counter));
        scheduler.schedule(counting(&counter));
        assert_eq!(scheduler.pending(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert_eq!(scheduler.run_pending().await, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_defers_until_caller_yields() {
        let counter = Arc::new(AtomicUsize::new(0));
        TokioScheduler::default().schedule(counting(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_scheduler_waits() {
        let counter = Arc::new(AtomicUsize::new(0));
        DelayScheduler::new(Duration::from_millis(50)).schedule(counting(&counter));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closure_is_a_scheduler() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let scheduler = move |_dispatch: BoxFuture<'static, ()>| {
            seen.fetch_add(1, Ordering::SeqCst);
        };
        scheduler.schedule(counting(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
