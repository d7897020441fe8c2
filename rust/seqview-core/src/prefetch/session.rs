// rust/seqview-core/src/prefetch/session.rs

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use super::{Backend, Completion, Launcher};
use crate::error::{Result, SeqError};

/// Lifecycle of a prefetch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created; no worker has been started.
    Idle,
    /// Workers are running and indices remain to be dispatched.
    Running,
    /// Every index has been dispatched; deliveries continue.
    Draining,
    /// Abandoned by the consumer before the end; workers are gone.
    Cancelled,
    /// Finished or failed; workers are gone.
    Stopped,
}

/// One ordered pass over a range of indices.
///
/// Items are computed ahead by the engine's workers, at most `max_buffered`
/// beyond the last delivered one, and handed out strictly in ascending index
/// order. The first error ends the session after it is returned. Dropping a
/// session stops and reaps its workers.
pub struct Session<T> {
    state: SessionState,
    launcher: Launcher<T>,
    backend: Option<Box<dyn Backend<T>>>,
    max_buffered: usize,
    next_dispatch: usize,
    next_expected: usize,
    end: usize,
    reorder: BTreeMap<usize, Completion<T>>,
    failure: Option<SeqError>,
}

impl<T> Session<T> {
    pub(crate) fn new(launcher: Launcher<T>, start: usize, end: usize, max_buffered: usize) -> Self {
        Self {
            state: SessionState::Idle,
            launcher,
            backend: None,
            max_buffered,
            next_dispatch: start,
            next_expected: start,
            end,
            reorder: BTreeMap::new(),
            failure: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Index of the next item this session will deliver.
    pub fn position(&self) -> usize {
        self.next_expected
    }

    /// Items dispatched to workers but not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.next_dispatch - self.next_expected
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Stopped | SessionState::Cancelled)
    }

    /// Stops the workers now; later pulls yield nothing.
    pub fn cancel(&mut self) {
        if !self.is_finished() {
            self.teardown(SessionState::Cancelled);
        }
    }

    fn start(&mut self) -> Result<()> {
        self.backend = Some((self.launcher)()?);
        self.state = SessionState::Running;
        debug!(
            start = self.next_expected,
            end = self.end,
            max_buffered = self.max_buffered,
            "prefetch session started"
        );
        self.top_up();
        Ok(())
    }

    /// Dispatches until `max_buffered` items are outstanding.
    ///
    /// A refused dispatch stops dispatching for good. Its error waits in
    /// `failure` until every index dispatched before it has been delivered.
    fn top_up(&mut self) {
        if self.failure.is_some() {
            return;
        }
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        while self.next_dispatch < self.end
            && self.next_dispatch - self.next_expected < self.max_buffered
        {
            if let Err(e) = backend.submit(self.next_dispatch) {
                debug!(index = self.next_dispatch, error = %e, "prefetch dispatch refused");
                self.failure = Some(at_index(e, self.next_dispatch));
                return;
            }
            self.next_dispatch += 1;
        }
        if self.next_dispatch == self.end {
            self.state = SessionState::Draining;
        }
    }

    fn await_expected(&mut self) -> Result<Completion<T>> {
        let expected = self.next_expected;
        loop {
            if let Some(completion) = self.reorder.remove(&expected) {
                return Ok(completion);
            }
            let backend = self
                .backend
                .as_mut()
                .ok_or_else(|| SeqError::worker(expected, "session has no workers"))?;
            let completion = backend.recv().map_err(|e| at_index(e, expected))?;
            self.reorder.insert(completion.index, completion);
        }
    }

    fn deliver(&mut self) -> Result<T> {
        let completion = self.await_expected()?;
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| SeqError::worker(self.next_expected, "session has no workers"))?;
        let item = backend.open(completion)?;
        self.next_expected += 1;

        if self.next_expected == self.end {
            self.teardown(SessionState::Stopped);
        } else {
            self.top_up();
        }
        Ok(item)
    }

    fn teardown(&mut self, state: SessionState) {
        if let Some(mut backend) = self.backend.take() {
            // Undelivered completions may still own shared segments.
            for (_, completion) in std::mem::take(&mut self.reorder) {
                backend.discard(completion);
            }
            backend.shutdown();
            debug!(
                delivered_up_to = self.next_expected,
                end = self.end,
                ?state,
                "prefetch session stopped"
            );
        }
        self.failure = None;
        self.state = state;
    }
}

/// Pins a worker error that names no index to `index`.
fn at_index(err: SeqError, index: usize) -> SeqError {
    match err {
        SeqError::Worker {
            index: None,
            message,
        } => SeqError::worker(index, message),
        other => other,
    }
}

impl<T> Iterator for Session<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        match self.state {
            SessionState::Stopped | SessionState::Cancelled => return None,
            _ if self.next_expected >= self.end => {
                self.teardown(SessionState::Stopped);
                return None;
            }
            SessionState::Idle => {
                if let Err(e) = self.start() {
                    self.teardown(SessionState::Stopped);
                    return Some(Err(e));
                }
            }
            SessionState::Running | SessionState::Draining => {}
        }

        // Everything dispatched has been delivered; what is left was refused.
        if self.next_expected == self.next_dispatch {
            if let Some(e) = self.failure.take() {
                self.teardown(SessionState::Stopped);
                return Some(Err(e));
            }
        }

        let delivered = self.deliver();
        if delivered.is_err() {
            self.teardown(SessionState::Stopped);
        }
        Some(delivered)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.is_finished() {
            return (0, Some(0));
        }
        // An error may end the session early.
        (0, Some(self.end - self.next_expected))
    }
}

impl<T> Drop for Session<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("next_expected", &self.next_expected)
            .field("next_dispatch", &self.next_dispatch)
            .field("end", &self.end)
            .field("buffered", &self.reorder.len())
            .finish()
    }
}
