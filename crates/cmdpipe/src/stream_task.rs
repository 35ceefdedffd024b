//! Concurrent stream handler tasks with first-failure-wins cancellation

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::aggregator::{ExceptionAggregator, FailureChain};
use crate::context::CapturedContext;
use crate::error::{StdioSlot, StreamFailure};
use crate::pool::WorkerPool;

/// Reason a task group was torn down
#[derive(Debug, Clone)]
pub enum Failure {
    /// A stream handler returned an error or panicked
    Handler(StreamFailure),
    /// The process outlived its timeout
    Timeout(Duration),
    /// The caller cancelled the execution
    Interrupted,
}

/// How a submitted task ended
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Value(T),
    Failed(StreamFailure),
    /// Aborted before producing a result
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn value(self) -> Option<T> {
        match self {
            TaskOutcome::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&StreamFailure> {
        match self {
            TaskOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Handle to a submitted task's result
#[derive(Debug)]
pub struct TaskHandle<T> {
    slot: StdioSlot,
    result: oneshot::Receiver<Result<T, StreamFailure>>,
}

impl<T> TaskHandle<T> {
    pub fn slot(&self) -> StdioSlot {
        self.slot
    }

    /// Wait for the task to end
    pub async fn join(self) -> TaskOutcome<T> {
        match self.result.await {
            Ok(Ok(value)) => TaskOutcome::Value(value),
            Ok(Err(failure)) => TaskOutcome::Failed(failure),
            Err(_) => TaskOutcome::Cancelled,
        }
    }
}

struct Inner {
    pool: WorkerPool,
    context: Box<dyn CapturedContext>,
    failures: ExceptionAggregator<Failure>,
    tasks: Mutex<Vec<AbortHandle>>,
    on_failure: Box<dyn Fn() + Send + Sync>,
    done_tx: Mutex<Option<mpsc::Sender<()>>>,
    done_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl Inner {
    fn report(&self, failure: Failure) -> bool {
        if !self.failures.add(failure) {
            trace!("Additional failure recorded as suppressed");
            return false;
        }
        debug!("First failure recorded, cancelling stream tasks");
        self.cancel_all();
        (self.on_failure)();
        true
    }

    fn cancel_all(&self) {
        let mut tasks = self.tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

/// Runs stream handlers concurrently on a worker pool
///
/// The first failure, whether reported by a task or through [`fail`], wins:
/// every other tracked task is aborted and the `on_failure` callback runs
/// exactly once. Later failures are kept as suppressed causes.
///
/// [`fail`]: StreamTaskHelper::fail
pub struct StreamTaskHelper {
    inner: Arc<Inner>,
}

impl StreamTaskHelper {
    pub fn new<F>(pool: WorkerPool, context: Box<dyn CapturedContext>, on_failure: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                pool,
                context,
                failures: ExceptionAggregator::new(),
                tasks: Mutex::new(Vec::with_capacity(3)),
                on_failure: Box::new(on_failure),
                done_tx: Mutex::new(Some(done_tx)),
                done_rx: tokio::sync::Mutex::new(done_rx),
            }),
        }
    }

    /// Schedule a handler future on the pool
    ///
    /// Returns `None` without running anything once a failure has been
    /// recorded or the group has been joined.
    pub fn submit<T, F>(&self, slot: StdioSlot, task: F) -> Option<TaskHandle<T>>
    where
        T: Send + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        // Held across spawn so a concurrent cancel sweep cannot miss this task.
        let mut tasks = self.inner.tasks.lock();
        if self.inner.failures.has_failed() {
            debug!(slot = %slot, "Task group already failed, not submitting");
            return None;
        }
        let done = self.inner.done_tx.lock().clone()?;

        let (result_tx, result_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let body = async move {
            let _done = done;
            trace!(slot = %slot, "Stream handler started");
            let outcome = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(StreamFailure::new(slot, error)),
                Err(panic) => Err(StreamFailure::new(
                    slot,
                    anyhow::anyhow!("handler panicked: {}", panic_message(panic.as_ref())),
                )),
            };
            if let Err(failure) = &outcome {
                debug!(slot = %slot, error = %failure.error(), "Stream handler failed");
                inner.report(Failure::Handler(failure.clone()));
            }
            trace!(slot = %slot, "Stream handler finished");
            let _ = result_tx.send(outcome);
        };

        let handle = self.inner.pool.spawn(self.inner.context.attach(body.boxed()));
        tasks.push(handle.abort_handle());
        Some(TaskHandle {
            slot,
            result: result_rx,
        })
    }

    /// Report a failure from outside the tasks, returns `true` if it became the root
    pub fn fail(&self, failure: Failure) -> bool {
        self.inner.report(failure)
    }

    /// Abort every tracked task without recording a failure
    pub fn cancel_all(&self) {
        self.inner.cancel_all();
    }

    /// Wait until every submitted task has finished or been dropped
    ///
    /// Closes the group: later submissions are refused.
    pub async fn join_all(&self) {
        self.inner.done_tx.lock().take();
        let mut done = self.inner.done_rx.lock().await;
        while done.recv().await.is_some() {}
    }

    /// First failure recorded, if any
    pub fn root_failure(&self) -> Option<Failure> {
        self.inner.failures.root().cloned()
    }

    pub fn failure_chain(&self) -> Option<FailureChain<Failure>> {
        self.inner.failures.snapshot()
    }

    pub fn has_failed(&self) -> bool {
        self.inner.failures.has_failed()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::context::NoContext;

    fn helper_with_counter() -> (StreamTaskHelper, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let helper = StreamTaskHelper::new(WorkerPool::current(), Box::new(NoContext), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (helper, calls)
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_values_are_returned() {
        let (helper, calls) = helper_with_counter();
        let a = helper.submit(StdioSlot::Stdout, async { Ok(1) }).unwrap();
        let b = helper
            .submit(StdioSlot::Stderr, async { Ok("two".to_string()) })
            .unwrap();

        helper.join_all().await;
        assert_eq!(a.join().await.value(), Some(1));
        assert_eq!(b.join().await.value(), Some("two".to_string()));
        assert!(!helper.has_failed());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_first_failure_cancels_siblings() {
        let (helper, calls) = helper_with_counter();
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(Arc::clone(&dropped));

        let slow = helper
            .submit(StdioSlot::Stdin, async move {
                let _guard = guard;
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .unwrap();
        let failing = helper
            .submit::<(), _>(StdioSlot::Stdout, async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(anyhow::anyhow!("boom"))
            })
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), helper.join_all())
            .await
            .expect("cancelled tasks should be joined promptly");

        assert!(dropped.load(Ordering::SeqCst));
        assert!(matches!(slow.join().await, TaskOutcome::Cancelled));
        let outcome = failing.join().await;
        assert_eq!(outcome.failure().unwrap().slot(), StdioSlot::Stdout);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match helper.root_failure() {
            Some(Failure::Handler(failure)) => assert_eq!(failure.error().to_string(), "boom"),
            other => panic!("unexpected root: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_rejected_after_failure() {
        let (helper, calls) = helper_with_counter();
        assert!(helper.fail(Failure::Timeout(Duration::from_millis(5))));
        assert!(!helper.fail(Failure::Interrupted));

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handle = helper.submit(StdioSlot::Stdout, async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        assert!(handle.is_none());
        helper.join_all().await;
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let chain = helper.failure_chain().unwrap();
        assert!(matches!(chain.root, Failure::Timeout(_)));
        assert!(matches!(chain.suppressed.as_slice(), [Failure::Interrupted]));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_a_failure() {
        let (helper, calls) = helper_with_counter();
        let explode = || -> anyhow::Result<()> { panic!("kaput") };
        let handle = helper
            .submit(StdioSlot::Stderr, async move { explode() })
            .unwrap();

        helper.join_all().await;
        let outcome = handle.join().await;
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.error().to_string(), "handler panicked: kaput");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_after_join_is_refused() {
        let (helper, _) = helper_with_counter();
        helper.join_all().await;
        assert!(helper.submit(StdioSlot::Stdout, async { Ok(()) }).is_none());
    }
}
