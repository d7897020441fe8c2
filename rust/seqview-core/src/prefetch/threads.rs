// rust/seqview-core/src/prefetch/threads.rs

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, warn};

use super::{panic_message, Backend, Completion, LiveWorker, Payload, StartHook};
use crate::error::{Result, SeqError};
use crate::view::View;

/// Evaluates items on the consumer's thread when no workers are configured.
pub(crate) struct Inline<V> {
    view: Arc<V>,
    pending: VecDeque<usize>,
}

impl<V> Inline<V> {
    pub(crate) fn new(view: Arc<V>) -> Self {
        Self {
            view,
            pending: VecDeque::new(),
        }
    }
}

impl<V> Backend<V::Item> for Inline<V>
where
    V: View + 'static,
    V::Item: Send,
{
    fn submit(&mut self, index: usize) -> Result<()> {
        self.pending.push_back(index);
        Ok(())
    }

    fn recv(&mut self) -> Result<Completion<V::Item>> {
        let index = self
            .pending
            .pop_front()
            .ok_or_else(|| SeqError::worker(None, "nothing was dispatched"))?;
        Ok(Completion {
            index,
            segment: None,
            outcome: self.view.get(index).map(Payload::Inline),
        })
    }

    fn shutdown(&mut self) {
        self.pending.clear();
    }
}

/// A pool of worker threads sharing the view through an `Arc`.
pub(crate) struct ThreadPool<T> {
    jobs: Option<Sender<usize>>,
    done: Receiver<Completion<T>>,
    stop_flag: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> ThreadPool<T> {
    pub(crate) fn spawn<V>(
        view: Arc<V>,
        worker_count: usize,
        max_buffered: usize,
        start_hook: Option<StartHook>,
        live: &Arc<AtomicUsize>,
    ) -> Result<Self>
    where
        V: View<Item = T> + 'static,
    {
        let (job_tx, job_rx) = channel::bounded::<usize>(max_buffered);
        let (done_tx, done_rx) = channel::unbounded();
        let stop_flag = Arc::new(AtomicBool::new(false));

        let mut pool = Self {
            jobs: Some(job_tx),
            done: done_rx,
            stop_flag: stop_flag.clone(),
            workers: Vec::with_capacity(worker_count),
        };

        for worker_id in 0..worker_count {
            let view = view.clone();
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let stop_flag = stop_flag.clone();
            let start_hook = start_hook.clone();
            let live = LiveWorker::register(live);

            let spawned = thread::Builder::new()
                .name(format!("prefetch-worker-{worker_id}"))
                .spawn(move || {
                    let _live = live;
                    run_worker(worker_id, &*view, &jobs, &done, &stop_flag, start_hook);
                });

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(SeqError::worker(
                        None,
                        format!("failed to spawn prefetch worker {worker_id}: {e}"),
                    ));
                }
            }
        }

        debug!(workers = worker_count, max_buffered, "started prefetch threads");
        Ok(pool)
    }
}

fn run_worker<V: View>(
    worker_id: usize,
    view: &V,
    jobs: &Receiver<usize>,
    done: &Sender<Completion<V::Item>>,
    stop_flag: &AtomicBool,
    start_hook: Option<StartHook>,
) {
    if let Some(hook) = start_hook {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(worker_id))) {
            warn!(
                worker_id,
                "worker start hook panicked: {}",
                panic_message(&*panic)
            );
            return;
        }
    }

    while let Ok(index) = jobs.recv() {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }

        let outcome = match catch_unwind(AssertUnwindSafe(|| view.get(index))) {
            Ok(result) => result.map(Payload::Inline),
            Err(panic) => {
                let message = panic_message(&*panic);
                warn!(worker_id, index, "prefetch worker panicked: {message}");
                Err(SeqError::worker(index, format!("worker panicked: {message}")))
            }
        };

        if done
            .send(Completion {
                index,
                segment: None,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }
}

impl<T: Send> Backend<T> for ThreadPool<T> {
    fn submit(&mut self, index: usize) -> Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| SeqError::worker(index, "prefetch pool is shut down"))?;
        jobs.send(index)
            .map_err(|_| SeqError::worker(index, "all prefetch workers have exited"))
    }

    fn recv(&mut self) -> Result<Completion<T>> {
        self.done
            .recv()
            .map_err(|_| SeqError::worker(None, "all prefetch workers have exited"))
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.jobs.take();

        let count = self.workers.len();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if count > 0 {
            debug!(workers = count, "stopped prefetch threads");
        }
    }
}
