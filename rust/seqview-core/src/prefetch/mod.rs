// rust/seqview-core/src/prefetch/mod.rs

//! Ahead-of-consumer evaluation of a view.
//!
//! A [`Prefetch`] wraps a view and hands its items out in index order while a
//! pool of workers computes up to `max_buffered` items ahead. Workers are
//! threads sharing the view, or forked processes that each hold their own
//! copy and return items through shared memory. With zero workers every item
//! is computed on the consumer's thread when it is pulled.
//!
//! Workers belong to a [`Session`]: they start on its first pull and are
//! stopped and reaped when it finishes, fails, or is dropped.

mod process;
mod protocol;
mod segment;
mod session;
mod threads;

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use session::{Session, SessionState};

use self::process::ProcessPool;
use self::threads::{Inline, ThreadPool};
use crate::config::{ExecutionMode, PrefetchConfig};
use crate::error::{check_index, Result, SeqError};
use crate::view::View;

/// Called once in every worker, with its id, before it takes any work.
pub(crate) type StartHook = Arc<dyn Fn(usize) + Send + Sync>;

/// Starts the workers of one session.
pub(crate) type Launcher<T> = Arc<dyn Fn() -> Result<Box<dyn Backend<T>>> + Send + Sync>;

pub(crate) enum Payload<T> {
    Inline(T),
    /// Encoded item of `len` bytes in the completion's segment.
    Shared { len: usize },
}

/// A finished job, possibly out of order.
pub(crate) struct Completion<T> {
    pub(crate) index: usize,
    pub(crate) segment: Option<usize>,
    pub(crate) outcome: Result<Payload<T>>,
}

/// The worker side of a session.
pub(crate) trait Backend<T>: Send {
    /// Queues `index` for computation. Never called with more than
    /// `max_buffered` undelivered indices.
    fn submit(&mut self, index: usize) -> Result<()>;

    /// Blocks until some submitted index completes.
    fn recv(&mut self) -> Result<Completion<T>>;

    /// Turns a completion into the delivered item, releasing whatever the
    /// completion held.
    fn open(&mut self, completion: Completion<T>) -> Result<T> {
        match completion.outcome? {
            Payload::Inline(item) => Ok(item),
            Payload::Shared { .. } => Err(SeqError::worker(
                completion.index,
                "shared payload from an in-process worker",
            )),
        }
    }

    /// Drops a completion that will never be delivered, releasing whatever
    /// it held without decoding it.
    fn discard(&mut self, completion: Completion<T>) {
        drop(completion);
    }

    /// Stops and joins every worker.
    fn shutdown(&mut self);
}

/// Counts one live worker for as long as it is held.
pub(crate) struct LiveWorker(Arc<AtomicUsize>);

impl LiveWorker {
    pub(crate) fn register(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for LiveWorker {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A view whose items are computed ahead of the consumer.
///
/// [`iter`](Prefetch::iter) opens an ordered session over every item.
/// [`get`](View::get) keeps one internal session and reuses it while indices
/// are requested consecutively; any other index restarts it there.
pub struct Prefetch<T> {
    len: usize,
    config: PrefetchConfig,
    launcher: Launcher<T>,
    cursor: Mutex<Option<Session<T>>>,
    live: Arc<AtomicUsize>,
}

impl<T> Prefetch<T> {
    /// An ordered pass over all items.
    pub fn iter(&self) -> Session<T> {
        self.iter_from(0)
    }

    /// An ordered pass starting at `start`.
    pub fn iter_from(&self, start: usize) -> Session<T> {
        Session::new(
            self.launcher.clone(),
            start.min(self.len),
            self.len,
            self.config.max_buffered,
        )
    }

    /// Worker threads or processes currently alive across all sessions.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    pub fn is_synchronous(&self) -> bool {
        self.config.worker_count == 0
    }

    /// Stops the session kept for random access, if any.
    pub fn reset(&self) {
        self.lock_cursor().take();
    }

    fn lock_cursor(&self) -> std::sync::MutexGuard<'_, Option<Session<T>>> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: Send> View for Prefetch<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<T> {
        check_index(index, self.len)?;

        let mut cursor = self.lock_cursor();
        let reusable = matches!(
            cursor.as_ref(),
            Some(session) if !session.is_finished() && session.position() == index
        );
        if !reusable {
            // Drop the old session first so its workers are gone before new
            // ones start.
            cursor.take();
            *cursor = Some(self.iter_from(index));
        }

        match cursor.as_mut().and_then(|session| session.next()) {
            Some(item) => item,
            None => Err(SeqError::worker(index, "prefetch session ended early")),
        }
    }
}

impl<T> fmt::Debug for Prefetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prefetch")
            .field("len", &self.len)
            .field("config", &self.config)
            .field("live_workers", &self.live_workers())
            .finish()
    }
}

/// Builder for [`Prefetch`].
///
/// # Example
///
/// ```
/// use seqview_core::view::{from_fn, View, ViewExt};
/// use seqview_core::PrefetchBuilder;
///
/// let slow = from_fn(100, |i| i * 2);
/// let prefetched = PrefetchBuilder::new(slow)
///     .workers(2)
///     .max_buffered(8)
///     .build()
///     .unwrap();
///
/// let items: Vec<_> = prefetched.iter().map(|r| r.unwrap()).collect();
/// assert_eq!(items[99], 198);
/// ```
pub struct PrefetchBuilder<V> {
    view: Arc<V>,
    config: PrefetchConfig,
    start_hook: Option<StartHook>,
}

impl<V: View + 'static> PrefetchBuilder<V> {
    pub fn new(view: V) -> Self {
        Self::from_arc(Arc::new(view))
    }

    pub fn from_arc(view: Arc<V>) -> Self {
        Self {
            view,
            config: PrefetchConfig::default(),
            start_hook: None,
        }
    }

    /// Replaces every engine setting at once.
    pub fn config(mut self, config: PrefetchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workers(mut self, worker_count: usize) -> Self {
        self.config.worker_count = worker_count;
        self
    }

    pub fn max_buffered(mut self, max_buffered: usize) -> Self {
        self.config.max_buffered = max_buffered;
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.config.execution_mode = mode;
        self
    }

    pub fn segment_size(mut self, bytes: usize) -> Self {
        self.config.segment_size = bytes;
        self
    }

    pub fn segment_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.segment_dir = Some(dir.into());
        self
    }

    /// Runs `hook(worker_id)` at the start of every worker, for example to
    /// seed per-worker state. In process mode it runs inside the child.
    pub fn on_worker_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.start_hook = Some(Arc::new(hook));
        self
    }

    /// Builds an engine running worker threads, or no workers at all.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid settings, and for process
    /// mode, whose items must be serializable (see
    /// [`build_isolated`](Self::build_isolated)).
    pub fn build(self) -> Result<Prefetch<V::Item>>
    where
        V::Item: Send + 'static,
    {
        self.config.validate()?;
        if self.config.worker_count > 0 && self.config.execution_mode == ExecutionMode::Processes {
            return Err(SeqError::config(
                "process workers need serializable items; use build_isolated",
            ));
        }
        let live = Arc::new(AtomicUsize::new(0));
        let launcher = self.local_launcher(&live);
        Ok(self.finish(launcher, live))
    }

    /// Builds an engine for any execution mode.
    ///
    /// In process mode every session forks `worker_count` children of the
    /// calling process. Each child computes items from its own copy of the
    /// view, so the view must not depend on threads or locks of the parent,
    /// and items travel back encoded with `bincode` in shared segments of
    /// `segment_size` bytes.
    pub fn build_isolated(self) -> Result<Prefetch<V::Item>>
    where
        V::Item: Serialize + DeserializeOwned + Send + 'static,
    {
        self.config.validate()?;
        let live = Arc::new(AtomicUsize::new(0));
        let launcher = match self.config.execution_mode {
            ExecutionMode::Processes if self.config.worker_count > 0 => {
                let view = self.view.clone();
                let config = self.config.clone();
                let start_hook = self.start_hook.clone();
                let counter = live.clone();
                let launcher: Launcher<V::Item> =
                    Arc::new(move || -> Result<Box<dyn Backend<V::Item>>> {
                        let pool =
                            ProcessPool::spawn(&*view, &config, start_hook.clone(), &counter)?;
                        Ok(Box::new(pool))
                    });
                launcher
            }
            _ => self.local_launcher(&live),
        };
        Ok(self.finish(launcher, live))
    }

    fn local_launcher(&self, live: &Arc<AtomicUsize>) -> Launcher<V::Item>
    where
        V::Item: Send + 'static,
    {
        let view = self.view.clone();
        if self.config.worker_count == 0 {
            return Arc::new(move || -> Result<Box<dyn Backend<V::Item>>> {
                Ok(Box::new(Inline::new(view.clone())))
            });
        }

        let worker_count = self.config.worker_count;
        let max_buffered = self.config.max_buffered;
        let start_hook = self.start_hook.clone();
        let counter = live.clone();
        Arc::new(move || -> Result<Box<dyn Backend<V::Item>>> {
            let pool = ThreadPool::spawn(
                view.clone(),
                worker_count,
                max_buffered,
                start_hook.clone(),
                &counter,
            )?;
            Ok(Box::new(pool))
        })
    }

    fn finish(self, launcher: Launcher<V::Item>, live: Arc<AtomicUsize>) -> Prefetch<V::Item> {
        Prefetch {
            len: self.view.len(),
            config: self.config,
            launcher,
            cursor: Mutex::new(None),
            live,
        }
    }
}
