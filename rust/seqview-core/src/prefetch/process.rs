// rust/seqview-core/src/prefetch/process.rs

//! Forked worker processes returning items through shared segments.
//!
//! Each child owns a copy-on-write snapshot of the view taken at fork time.
//! The consumer keeps one proxy thread per child: it takes a job from the
//! shared queue, sends `Compute` over the child's socket, waits for the reply
//! and forwards a completion. Item bytes are `bincode`-encoded by the child
//! straight into the assigned segment and decoded by the consumer on
//! delivery, after which the segment goes back to the ring.

use std::marker::PhantomData;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, getpid, getppid, ForkResult, Pid};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::protocol::{read_frame, write_frame, Command, FailureKind, Reply};
use super::segment::{segment_mut, SegmentRing};
use super::{panic_message, Backend, Completion, LiveWorker, Payload, StartHook};
use crate::config::PrefetchConfig;
use crate::error::{Result, SeqError};
use crate::view::View;

/// Held from socket creation until the parent has closed the child's end,
/// so no concurrently forked worker inherits another worker's socket.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy)]
struct Job {
    index: usize,
    segment: usize,
}

/// A forked child and the consumer's end of its control socket.
///
/// Dropping a handle that was never reaped kills the child.
struct ChildHandle {
    worker_id: usize,
    pid: Pid,
    stream: UnixStream,
    reaped: bool,
    _live: LiveWorker,
}

impl ChildHandle {
    /// Asks the child to exit and waits for it.
    fn stop(&mut self) {
        if self.reaped {
            return;
        }
        let _ = write_frame(&mut self.stream, &Command::Stop);
        self.reap();
    }

    fn reap(&mut self) -> Option<WaitStatus> {
        if self.reaped {
            return None;
        }
        self.reaped = true;
        match waitpid(self.pid, None) {
            Ok(status @ WaitStatus::Exited(_, 0)) => {
                debug!(worker_id = self.worker_id, pid = %self.pid, "worker process exited");
                Some(status)
            }
            Ok(status) => {
                warn!(worker_id = self.worker_id, pid = %self.pid, ?status, "worker process ended abnormally");
                Some(status)
            }
            Err(errno) => {
                warn!(worker_id = self.worker_id, pid = %self.pid, %errno, "failed to reap worker process");
                None
            }
        }
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = kill(self.pid, Signal::SIGKILL);
            self.reap();
        }
    }
}

/// Worker processes plus the shared segment ring they write into.
pub(crate) struct ProcessPool<T> {
    jobs: Option<Sender<Job>>,
    done: Receiver<Completion<T>>,
    stop_flag: Arc<AtomicBool>,
    proxies: Vec<JoinHandle<()>>,
    ring: SegmentRing,
    _item: PhantomData<fn() -> T>,
}

impl<T> ProcessPool<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Forks `config.worker_count` children of the current process.
    ///
    /// Children are forked before any proxy thread exists, so the only
    /// threads they lose are ones the caller already had.
    pub(crate) fn spawn<V>(
        view: &V,
        config: &PrefetchConfig,
        start_hook: Option<StartHook>,
        live: &Arc<AtomicUsize>,
    ) -> Result<Self>
    where
        V: View<Item = T>,
    {
        let mut ring = SegmentRing::create(
            config.max_buffered,
            config.segment_size,
            config.segment_dir.as_deref(),
        )?;
        let base = ring.base_ptr();
        let segment_size = ring.segment_size();
        let parent = getpid();

        let forking = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut children: Vec<ChildHandle> = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let (ours, theirs) = UnixStream::pair().map_err(|e| {
                SeqError::worker(None, format!("failed to create worker socket: {e}"))
            })?;

            // SAFETY: the child only runs `run_child`, which touches the view,
            // the shared mapping and its socket, then leaves through `_exit`
            // without returning into the caller's stack.
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    drop(ours);
                    for sibling in &children {
                        // SAFETY: closes this process's copy of a sibling's
                        // socket; the handle is never used here again.
                        unsafe { libc::close(sibling.stream.as_raw_fd()) };
                    }
                    let code = run_child(
                        worker_id,
                        view,
                        theirs,
                        base,
                        segment_size,
                        parent,
                        start_hook.as_ref(),
                    );
                    // SAFETY: skips destructors and atexit handlers that
                    // belong to the parent.
                    unsafe { libc::_exit(code) }
                }
                Ok(ForkResult::Parent { child }) => {
                    drop(theirs);
                    children.push(ChildHandle {
                        worker_id,
                        pid: child,
                        stream: ours,
                        reaped: false,
                        _live: LiveWorker::register(live),
                    });
                }
                Err(errno) => {
                    return Err(SeqError::worker(
                        None,
                        format!("failed to fork worker {worker_id}: {errno}"),
                    ));
                }
            }
        }
        drop(forking);

        let (job_tx, job_rx) = channel::bounded::<Job>(config.max_buffered);
        let (done_tx, done_rx) = channel::unbounded();
        let stop_flag = Arc::new(AtomicBool::new(false));

        let mut pool = Self {
            jobs: Some(job_tx),
            done: done_rx,
            stop_flag: stop_flag.clone(),
            proxies: Vec::with_capacity(children.len()),
            ring,
            _item: PhantomData,
        };

        let count = children.len();
        for child in children {
            let worker_id = child.worker_id;
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let stop_flag = stop_flag.clone();
            let spawned = thread::Builder::new()
                .name(format!("prefetch-proxy-{worker_id}"))
                .spawn(move || run_proxy(child, &jobs, &done, &stop_flag));

            match spawned {
                Ok(handle) => pool.proxies.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(SeqError::worker(
                        None,
                        format!("failed to spawn proxy for worker {worker_id}: {e}"),
                    ));
                }
            }
        }

        debug!(
            workers = count,
            segments = pool.ring.count(),
            segment_size,
            "started prefetch processes"
        );
        Ok(pool)
    }
}

fn run_child<V: View>(
    worker_id: usize,
    view: &V,
    mut stream: UnixStream,
    base: *mut u8,
    segment_size: usize,
    parent: Pid,
    start_hook: Option<&StartHook>,
) -> i32
where
    V::Item: Serialize,
{
    die_with_parent();
    if getppid() != parent {
        return 1;
    }

    if let Some(hook) = start_hook {
        if catch_unwind(AssertUnwindSafe(|| hook(worker_id))).is_err() {
            return 1;
        }
    }

    loop {
        match read_frame::<_, Command>(&mut stream) {
            Ok(Some(Command::Compute { index, segment })) => {
                // SAFETY: the consumer hands each segment to one job at a time
                // and does not read it until this reply arrives.
                let slot = unsafe { segment_mut(base, segment as usize, segment_size) };
                let reply = compute(view, index as usize, segment, slot);
                if write_frame(&mut stream, &reply).is_err() {
                    return 1;
                }
            }
            Ok(Some(Command::Stop)) | Ok(None) => return 0,
            Err(_) => return 1,
        }
    }
}

#[cfg(target_os = "linux")]
fn die_with_parent() {
    // SAFETY: only changes the signal delivered to this process when its
    // parent thread exits.
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);
    }
}

#[cfg(not(target_os = "linux"))]
fn die_with_parent() {}

fn compute<V: View>(view: &V, index: usize, segment: u32, mut slot: &mut [u8]) -> Reply
where
    V::Item: Serialize,
{
    let item = match catch_unwind(AssertUnwindSafe(|| view.get(index))) {
        Ok(Ok(item)) => item,
        Ok(Err(e)) => return Reply::from_error(index, &e),
        Err(panic) => {
            return Reply::Failed {
                index: index as u64,
                kind: FailureKind::Panic,
                message: panic_message(&*panic),
            }
        }
    };

    let failed = |kind, message| Reply::Failed {
        index: index as u64,
        kind,
        message,
    };
    let len = match bincode::serialized_size(&item) {
        Ok(len) => len,
        Err(e) => return failed(FailureKind::Encode, e.to_string()),
    };
    if len > slot.len() as u64 {
        return failed(
            FailureKind::Oversized,
            format!("item needs {len} bytes but segments hold {}", slot.len()),
        );
    }
    if let Err(e) = bincode::serialize_into(&mut slot, &item) {
        return failed(FailureKind::Encode, e.to_string());
    }
    Reply::Ready {
        index: index as u64,
        segment,
        len,
    }
}

fn run_proxy<T>(
    mut child: ChildHandle,
    jobs: &Receiver<Job>,
    done: &Sender<Completion<T>>,
    stop_flag: &AtomicBool,
) {
    while let Ok(job) = jobs.recv() {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }

        let (outcome, alive) = exchange(&mut child, job);
        let sent = done
            .send(Completion {
                index: job.index,
                segment: Some(job.segment),
                outcome,
            })
            .is_ok();
        if !alive || !sent {
            break;
        }
    }
    child.stop();
}

/// Runs one job on the child. The flag is false once the child is gone.
fn exchange<T>(child: &mut ChildHandle, job: Job) -> (Result<Payload<T>>, bool) {
    let command = Command::Compute {
        index: job.index as u64,
        segment: job.segment as u32,
    };
    let reply = write_frame(&mut child.stream, &command)
        .and_then(|()| read_frame::<_, Reply>(&mut child.stream));

    match reply {
        Ok(Some(Reply::Ready { index, len, .. })) if index as usize == job.index => (
            Ok(Payload::Shared {
                len: len as usize,
            }),
            true,
        ),
        Ok(Some(Reply::Failed {
            index,
            kind,
            message,
        })) if index as usize == job.index => (Err(kind.into_error(job.index, message)), true),
        Ok(Some(other)) => (
            Err(SeqError::worker(
                job.index,
                format!("worker replied out of turn: {other:?}"),
            )),
            true,
        ),
        Ok(None) | Err(_) => {
            let status = child.reap();
            warn!(
                worker_id = child.worker_id,
                index = job.index,
                ?status,
                "worker process died"
            );
            let message = match status {
                Some(status) => format!("worker process died: {status:?}"),
                None => "worker process died".to_string(),
            };
            (Err(SeqError::worker(job.index, message)), false)
        }
    }
}

impl<T> Backend<T> for ProcessPool<T>
where
    T: DeserializeOwned + Send,
{
    fn submit(&mut self, index: usize) -> Result<()> {
        let segment = self
            .ring
            .acquire()
            .ok_or_else(|| {
                SeqError::worker(
                    index,
                    format!(
                        "no free shared segment ({} of {} in use)",
                        self.ring.count() - self.ring.available(),
                        self.ring.count()
                    ),
                )
            })?;
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| SeqError::worker(index, "prefetch pool is shut down"))?;
        if jobs.send(Job { index, segment }).is_err() {
            self.ring.release(segment);
            return Err(SeqError::worker(index, "all worker processes have exited"));
        }
        Ok(())
    }

    fn recv(&mut self) -> Result<Completion<T>> {
        self.done
            .recv()
            .map_err(|_| SeqError::worker(None, "all worker processes have exited"))
    }

    fn open(&mut self, completion: Completion<T>) -> Result<T> {
        let Completion {
            index,
            segment,
            outcome,
        } = completion;

        let item = match (outcome, segment) {
            (Ok(Payload::Shared { len }), Some(segment)) => self
                .ring
                .read(segment, len)
                .and_then(|bytes| {
                    bincode::deserialize(bytes).map_err(|e| {
                        SeqError::worker(index, format!("shared-memory transfer failed: {e}"))
                    })
                }),
            (Ok(Payload::Inline(item)), _) => Ok(item),
            (Ok(Payload::Shared { .. }), None) => {
                Err(SeqError::worker(index, "shared payload without a segment"))
            }
            (Err(e), _) => Err(e),
        };

        if let Some(segment) = segment {
            self.ring.release(segment);
        }
        item
    }

    fn discard(&mut self, completion: Completion<T>) {
        if let Some(segment) = completion.segment {
            self.ring.release(segment);
        }
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.jobs.take();

        let count = self.proxies.len();
        for handle in self.proxies.drain(..) {
            let _ = handle.join();
        }
        if count > 0 {
            debug!(workers = count, "stopped prefetch processes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::view::{from_fn, ViewExt};

    fn config(workers: usize, max_buffered: usize, segment_size: usize) -> PrefetchConfig {
        PrefetchConfig {
            worker_count: workers,
            max_buffered,
            segment_size,
            ..PrefetchConfig::default()
        }
    }

    #[test]
    fn test_compute_writes_into_slot() {
        let view = from_fn(3, |i| format!("item-{i}"));
        let mut slot = vec![0u8; 64];

        let reply = compute(&view, 2, 5, &mut slot);
        let Reply::Ready { index, segment, len } = reply else {
            panic!("expected ready, got {reply:?}");
        };
        assert_eq!((index, segment), (2, 5));
        let decoded: String = bincode::deserialize(&slot[..len as usize]).unwrap();
        assert_eq!(decoded, "item-2");
    }

    #[test]
    fn test_compute_rejects_oversized_item() {
        let view = from_fn(1, |_| vec![7u8; 100]);
        let mut slot = vec![0u8; 16];

        let reply = compute(&view, 0, 0, &mut slot);
        assert!(matches!(
            reply,
            Reply::Failed { kind: FailureKind::Oversized, .. }
        ));
    }

    #[test]
    fn test_processes_round_trip_through_segments() {
        let live = Arc::new(AtomicUsize::new(0));
        let view = from_fn(12, |i| (i, format!("v{i}")));
        let mut pool: ProcessPool<(usize, String)> =
            ProcessPool::spawn(&view, &config(2, 4, 256), None, &live).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 2);

        let mut delivered = Vec::new();
        let mut next = 0;
        for i in 0..4 {
            pool.submit(i).unwrap();
        }
        let mut submitted = 4;
        while next < 12 {
            let completion = pool.recv().unwrap();
            delivered.push(pool.open(completion).unwrap());
            next += 1;
            if submitted < 12 {
                pool.submit(submitted).unwrap();
                submitted += 1;
            }
        }

        delivered.sort();
        let expected: Vec<_> = (0..12).map(|i| (i, format!("v{i}"))).collect();
        assert_eq!(delivered, expected);
        assert_eq!(pool.ring.available(), 4);

        pool.shutdown();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_child_error_is_rebuilt() {
        let live = Arc::new(AtomicUsize::new(0));
        let view = from_fn(4, |i| i as u64).try_map(|x| if x == 1 { Err("odd one") } else { Ok(x) });
        let mut pool: ProcessPool<u64> =
            ProcessPool::spawn(&view, &config(1, 2, 64), None, &live).unwrap();

        pool.submit(1).unwrap();
        let completion = pool.recv().unwrap();
        let err = pool.open(completion).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transform);
        assert_eq!(err.index(), Some(1));
        assert_eq!(pool.ring.available(), 2);

        pool.shutdown();
    }

    #[test]
    fn test_crashed_child_reports_worker_error() {
        let live = Arc::new(AtomicUsize::new(0));
        let view = from_fn(4, |i| {
            if i == 2 {
                // SAFETY: only ever runs inside a forked worker.
                unsafe { libc::_exit(3) };
            }
            i as u32
        });
        let mut pool: ProcessPool<u32> =
            ProcessPool::spawn(&view, &config(1, 4, 64), None, &live).unwrap();

        pool.submit(2).unwrap();
        let completion = pool.recv().unwrap();
        let err = pool.open(completion).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Worker);
        assert_eq!(err.index(), Some(2));
        assert!(err.to_string().contains("died"));

        pool.shutdown();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_discard_releases_segment_without_decoding() {
        let live = Arc::new(AtomicUsize::new(0));
        let view = from_fn(3, |i| format!("record-{i}"));
        let mut pool: ProcessPool<String> =
            ProcessPool::spawn(&view, &config(1, 2, 64), None, &live).unwrap();

        pool.submit(0).unwrap();
        let mut completion = pool.recv().unwrap();
        assert_eq!(pool.ring.available(), 1);

        // A length no decoder would accept; discarding must not look at it.
        completion.outcome = Ok(Payload::Shared { len: usize::MAX });
        pool.discard(completion);
        assert_eq!(pool.ring.available(), 2);

        pool.shutdown();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
