//! Submission handles and their completion slots.
//!
//! Every submission owns one slot shared by exactly two parties:
//!
//! - the [`SubmissionHandle`] kept by the caller (reading side)
//! - the [`Completion`] handed to the backend (writing side)
//!
//! ```text
//!            settle()                      get() / wait()
//! backend ──────────────►  Slot<T>  ◄────────────────────── caller
//!          Completion<T>   Pending                 SubmissionHandle<T>
//!                           ├─► Ready(T)
//!                           ├─► Failed(ExecutionError)
//!                           └─► Cancelled
//! ```
//!
//! The first transition out of `Pending` wins; every later one is ignored.
//! A `Completion` dropped without reporting settles the slot as failed, so a
//! caller blocked in [`SubmissionHandle::get`] is always released.

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicU8, Ordering};
use core::task::{Context, Poll, Waker};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::device::DeviceId;
use crate::error::{Abandoned, BoxError, ExecutionError, RetrieveError};

/// Lifecycle of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum HandleState {
    /// Submitted, not finished.
    #[default]
    Pending = 0,
    /// Finished with a result.
    Ready = 1,
    /// Finished with an execution error.
    Failed = 2,
    /// Cancelled by the caller before it finished.
    Cancelled = 3,
}

impl HandleState {
    /// Whether no further transition can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl TryFrom<u8> for HandleState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Ready),
            2 => Ok(Self::Failed),
            3 => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}

enum Outcome<T> {
    Pending,
    Ready(T),
    Failed(ExecutionError),
    Cancelled,
}

impl<T> Outcome<T> {
    const fn state(&self) -> HandleState {
        match self {
            Self::Pending => HandleState::Pending,
            Self::Ready(_) => HandleState::Ready,
            Self::Failed(_) => HandleState::Failed,
            Self::Cancelled => HandleState::Cancelled,
        }
    }
}

struct Inner<T> {
    outcome: Outcome<T>,
    // one entry per live `Wait` future, keyed by its waiter id
    wakers: Vec<(u64, Waker)>,
    next_waiter: u64,
}

impl<T> Inner<T> {
    /// Stores `waker` under `key`, allocating a key on first registration.
    fn register(&mut self, key: &mut Option<u64>, waker: &Waker) {
        if let Some(id) = *key {
            if let Some((_, stored)) = self.wakers.iter_mut().find(|(k, _)| *k == id) {
                if !stored.will_wake(waker) {
                    stored.clone_from(waker);
                }
                return;
            }
            self.wakers.push((id, waker.clone()));
        } else {
            let id = self.next_waiter;
            self.next_waiter = self.next_waiter.wrapping_add(1);
            *key = Some(id);
            self.wakers.push((id, waker.clone()));
        }
    }

    fn unregister(&mut self, id: u64) {
        self.wakers.retain(|(k, _)| *k != id);
    }
}

struct Slot<T> {
    device: DeviceId,
    // mirrors `inner.outcome` so polling never takes the lock
    state: AtomicU8,
    inner: Mutex<Inner<T>>,
    settled: Condvar,
}

impl<T> Slot<T> {
    fn new(device: DeviceId) -> Self {
        Self {
            device,
            state: AtomicU8::new(HandleState::Pending as u8),
            inner: Mutex::new(Inner { outcome: Outcome::Pending, wakers: Vec::new(), next_waiter: 0 }),
            settled: Condvar::new(),
        }
    }

    fn state(&self) -> HandleState {
        HandleState::try_from(self.state.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Moves a pending slot into `outcome`. Returns false if already terminal.
    fn settle(&self, outcome: Outcome<T>) -> bool {
        let wakers = {
            let mut inner = self.inner.lock();
            if inner.outcome.state().is_terminal() {
                return false;
            }
            self.state.store(outcome.state() as u8, Ordering::Release);
            inner.outcome = outcome;
            core::mem::take(&mut inner.wakers)
        };
        self.settled.notify_all();
        wakers.into_iter().for_each(|(_, waker)| waker.wake());
        true
    }
}

impl<T: Clone> Slot<T> {
    fn read(&self, outcome: &Outcome<T>) -> Option<Result<T, RetrieveError>> {
        match outcome {
            Outcome::Pending => None,
            Outcome::Ready(value) => Some(Ok(value.clone())),
            Outcome::Failed(err) => Some(Err(RetrieveError::Execution(err.clone()))),
            Outcome::Cancelled => Some(Err(RetrieveError::Cancelled { device: self.device })),
        }
    }
}

/// Creates the two ends of a fresh submission bound to `device`.
pub(crate) fn submission<T>(device: DeviceId) -> (Completion<T>, SubmissionHandle<T>) {
    let slot = Arc::new(Slot::new(device));
    (Completion { slot: Some(Arc::clone(&slot)) }, SubmissionHandle { slot })
}

/// Caller-owned view of one in-flight or finished submission.
///
/// Exactly one handle exists per submission; it is not `Clone`.
/// Retrieval never consumes the stored result, so [`get`](Self::get) may be
/// called any number of times and always reports the same outcome.
pub struct SubmissionHandle<T> {
    slot: Arc<Slot<T>>,
}

impl<T> SubmissionHandle<T> {
    /// Device this submission is bound to.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.slot.device
    }

    /// Current state. Never blocks.
    #[must_use]
    pub fn state(&self) -> HandleState {
        self.slot.state()
    }

    /// Whether the submission reached a terminal state, i.e. whether
    /// [`get`](Self::get) would return without blocking. Never blocks.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().is_terminal()
    }

    /// Cancels a pending submission.
    ///
    /// Returns `false` when the submission already finished, in which case
    /// nothing changes. The backend may still run the job; its outcome is
    /// discarded.
    pub fn cancel(&self) -> bool {
        self.slot.settle(Outcome::Cancelled)
    }
}

impl<T: Clone> SubmissionHandle<T> {
    /// Blocks the calling thread until the submission finishes and returns
    /// its outcome.
    ///
    /// # Errors
    /// - [`RetrieveError::Execution`] if the job failed on its device
    /// - [`RetrieveError::Cancelled`] if the handle was cancelled
    pub fn get(&self) -> Result<T, RetrieveError> {
        let mut inner = self.slot.inner.lock();
        loop {
            if let Some(outcome) = self.slot.read(&inner.outcome) {
                return outcome;
            }
            self.slot.settled.wait(&mut inner);
        }
    }

    /// Like [`get`](Self::get), but gives up after `timeout`.
    ///
    /// A timeout leaves the submission untouched; it can be retrieved later.
    ///
    /// # Errors
    /// As [`get`](Self::get), plus [`RetrieveError::Timeout`].
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, RetrieveError> {
        let start = Instant::now();
        let mut inner = self.slot.inner.lock();
        if let Some(outcome) = self.slot.read(&inner.outcome) {
            return outcome;
        }
        // a deadline past what `Instant` can represent never expires
        let Some(deadline) = start.checked_add(timeout) else {
            loop {
                self.slot.settled.wait(&mut inner);
                if let Some(outcome) = self.slot.read(&inner.outcome) {
                    return outcome;
                }
            }
        };
        loop {
            if let Some(outcome) = self.slot.read(&inner.outcome) {
                return outcome;
            }
            if self.slot.settled.wait_until(&mut inner, deadline).timed_out() {
                return self.slot.read(&inner.outcome).unwrap_or(Err(RetrieveError::Timeout {
                    device: self.slot.device,
                    waited: start.elapsed(),
                }));
            }
        }
    }

    /// Returns a future resolving to the same outcome as [`get`](Self::get).
    pub fn wait(&self) -> Wait<'_, T> {
        Wait { handle: self, key: None }
    }
}

impl<T> fmt::Debug for SubmissionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionHandle")
            .field("device", &self.slot.device)
            .field("state", &self.state())
            .finish()
    }
}

/// Future returned by [`SubmissionHandle::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Wait<'a, T> {
    handle: &'a SubmissionHandle<T>,
    key: Option<u64>,
}

impl<T: Clone> Future for Wait<'_, T> {
    type Output = Result<T, RetrieveError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let slot = &this.handle.slot;
        let mut inner = slot.inner.lock();
        if let Some(outcome) = slot.read(&inner.outcome) {
            return Poll::Ready(outcome);
        }
        inner.register(&mut this.key, cx.waker());
        Poll::Pending
    }
}

impl<T> Drop for Wait<'_, T> {
    fn drop(&mut self) {
        if let Some(id) = self.key {
            self.handle.slot.inner.lock().unregister(id);
        }
    }
}

/// Backend-owned writing side of one submission.
///
/// Report exactly once with [`complete`](Self::complete),
/// [`fail`](Self::fail) or [`finish`](Self::finish). Dropping it unreported
/// fails the submission.
pub struct Completion<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> Completion<T> {
    /// Device the job must run on.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.slot.as_ref().map_or_else(DeviceId::default, |s| s.device)
    }

    /// Whether the caller cancelled the submission. Backends may skip the
    /// work when this returns true.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.slot.as_ref().is_some_and(|s| s.state() == HandleState::Cancelled)
    }

    /// Stores a successful result.
    pub fn complete(self, value: T) {
        self.settle(Outcome::Ready(value));
    }

    /// Stores an execution failure.
    pub fn fail(self, cause: impl Into<BoxError>) {
        let device = self.device();
        self.settle(Outcome::Failed(ExecutionError::new(device, cause)));
    }

    /// Stores whichever outcome the job produced.
    pub fn finish(self, result: Result<T, BoxError>) {
        match result {
            Ok(value) => self.complete(value),
            Err(cause) => self.fail(cause),
        }
    }

    /// Fails the submission because the job never produced an outcome.
    pub fn abandon(self, reason: Abandoned) {
        self.fail(reason);
    }

    fn settle(mut self, outcome: Outcome<T>) {
        if let Some(slot) = self.slot.take() {
            slot.settle(outcome);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let device = slot.device;
            if slot.settle(Outcome::Failed(ExecutionError::new(device, Abandoned::Dropped))) {
                debug!(device = %device, "completion dropped without an outcome");
            }
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("device", &self.device()).finish()
    }
}
