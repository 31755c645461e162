use std::future::Future;
use std::sync::{Arc, LazyLock};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use strata_error::{StrataError, StrataResult, strata_err};
use tokio::runtime::Runtime;
use tokio::task::LocalSet;

/// A read queued for an IO thread. The closure runs on the thread that picks it up, so the
/// future it builds never has to be `Send`.
type ReadJob = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()> + Send>;

/// Drives range reads on dedicated IO threads.
///
/// Each thread owns a Tokio `current_thread` runtime and pulls jobs from one shared queue.
/// Reads can be submitted from any thread, including rayon workers and callers that block on a
/// whole decode without an async runtime of their own. The threads exit once every handle to the
/// dispatcher is dropped.
#[derive(Debug)]
pub struct IoDispatcher {
    queue: flume::Sender<ReadJob>,
}

static SHARED: LazyLock<Result<Arc<IoDispatcher>, Arc<StrataError>>> =
    LazyLock::new(|| IoDispatcher::new_tokio(1).map(Arc::new).map_err(Arc::new));

impl IoDispatcher {
    /// Start `num_threads` IO threads (at least one).
    pub fn new_tokio(num_threads: usize) -> StrataResult<Self> {
        let (queue, jobs) = flume::unbounded::<ReadJob>();
        for worker in 0..num_threads.max(1) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let jobs = jobs.clone();
            std::thread::Builder::new()
                .name(format!("strata-io-{worker}"))
                .spawn(move || run_worker(worker, &runtime, &jobs))?;
        }
        Ok(Self { queue })
    }

    /// The process-wide dispatcher with a single IO thread, started on first use.
    pub fn shared() -> StrataResult<Arc<IoDispatcher>> {
        SHARED.clone().map_err(StrataError::Shared)
    }

    /// Run `read` on an IO thread and hand its output back through the returned channel.
    pub fn dispatch<F, Fut, R>(&self, read: F) -> StrataResult<oneshot::Receiver<R>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = R> + 'static,
        R: Send + 'static,
    {
        let (send, recv) = oneshot::channel();
        let job: ReadJob = Box::new(move || {
            async move {
                // Nobody is waiting if the read was abandoned.
                let _ = send.send(read().await);
            }
            .boxed_local()
        });
        self.queue
            .send(job)
            .map_err(|_| strata_err!(AssertionFailed: "every IO thread of the dispatcher has exited"))?;
        Ok(recv)
    }
}

fn run_worker(worker: usize, runtime: &Runtime, jobs: &flume::Receiver<ReadJob>) {
    LocalSet::new().block_on(runtime, async {
        while let Ok(job) = jobs.recv_async().await {
            tokio::task::spawn_local(job());
        }
    });
    log::trace!("io thread {worker} exiting");
}
