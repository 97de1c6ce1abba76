//! Fan-out dispatch across devices.
//!
//! A [`Dispatcher`] pairs an explicit [`Target`] with an [`Executor`]. Each
//! dispatch round submits one job descriptor to devices `0..n` in order,
//! collecting one [`SubmissionHandle`] per device without waiting for any of
//! them to finish.
//!
//! Refused submissions follow the target's [`SubmissionPolicy`]:
//!
//! - `FailFast` stops at the first refusal
//! - `BestEffort` tries every device before reporting
//!
//! Either way the handles that did go through are returned inside the
//! [`DispatchError`] and remain usable. Failures that happen *during*
//! execution are never seen here; they surface from the handle.
//!
//! # Example
//!
//! ```
//! use mqpu_dispatch::prelude::*;
//!
//! let target = Target::new("cpu-mqpu", 3)?;
//! let executor = CpuExecutor::new(&target, |job: &JobDescriptor<Kernel>, device| {
//!     Ok(format!("{device}: {} steps", job.program().unroll(job.repeat_count()).len()))
//! })?;
//! let dispatcher = Dispatcher::new(target, executor);
//!
//! let kernel = Kernel::new("k", 2).repeat([Step::new("cx", [0, 1])]);
//! let job = JobDescriptor::kernel(kernel, 7)?;
//! let handles = dispatcher.dispatch_all_devices(&job).expect("all devices accept work");
//!
//! // free to do something else here
//!
//! for handle in &handles {
//!     println!("{}", handle.get()?);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use tracing::{debug, info, warn};

use crate::backend::{SubmissionPolicy, Target};
use crate::device::{DeviceId, DeviceRegistry};
use crate::error::{DispatchError, SubmissionError};
use crate::exec::Executor;
use crate::handle::{submission, SubmissionHandle};
use crate::kernel::JobDescriptor;

/// Handles produced by a successful dispatch round, in device order.
pub type Handles<E> = Vec<SubmissionHandle<<E as Executor>::Output>>;

/// Submits jobs to the devices of one target.
pub struct Dispatcher<E: Executor> {
    target: Target,
    executor: E,
}

impl<E: Executor> Dispatcher<E> {
    /// Binds `executor` to `target`. The target decides which device ids
    /// are valid and which submission policy applies.
    pub fn new(target: Target, executor: E) -> Self {
        info!(target_name = target.name(), devices = target.num_devices(), policy = %target.policy(), "dispatcher ready");
        Self { target, executor }
    }

    /// The active target.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// The execution backend.
    #[must_use]
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Number of devices the target exposes.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.target.device_count()
    }

    /// Submits `job` to a single device.
    ///
    /// # Errors
    /// - [`SubmissionError::InvalidDevice`] if `device` is outside the target
    /// - whatever the executor refuses the job with
    pub fn dispatch(
        &self,
        job: &JobDescriptor<E::Program>,
        device: DeviceId,
    ) -> Result<SubmissionHandle<E::Output>, SubmissionError> {
        if !self.target.contains(device) {
            return Err(SubmissionError::InvalidDevice {
                device,
                available: self.target.num_devices(),
            });
        }

        let (done, handle) = submission(device);
        self.executor.submit(job, device, done)?;
        debug!(device = %device, repeat_count = job.repeat_count(), "submitted");
        Ok(handle)
    }

    /// Submits `job` to devices `0..device_count`, in order, without waiting
    /// for any of them. `device_count == 0` submits nothing.
    ///
    /// # Errors
    /// Returns a [`DispatchError`] carrying the live handles and the refused
    /// submissions when any device refuses, per the target's policy.
    pub fn dispatch_all(
        &self,
        job: &JobDescriptor<E::Program>,
        device_count: usize,
    ) -> Result<Handles<E>, DispatchError<E::Output>> {
        let policy = self.target.policy();
        info!(target_name = self.target.name(), devices = device_count, %policy, "dispatching");

        let mut handles = Vec::with_capacity(device_count);
        let mut failures = Vec::new();

        for device in DeviceId::range(device_count) {
            match self.dispatch(job, device) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    warn!(device = %device, error = %err, "submission refused");
                    failures.push(err);
                    if policy == SubmissionPolicy::FailFast {
                        break;
                    }
                }
            }
        }

        DispatchError::from_round(handles, failures)
    }

    /// Queries the target's device count once and dispatches to every device.
    ///
    /// # Errors
    /// As [`dispatch_all`](Self::dispatch_all).
    pub fn dispatch_all_devices(
        &self,
        job: &JobDescriptor<E::Program>,
    ) -> Result<Handles<E>, DispatchError<E::Output>> {
        self.dispatch_all(job, self.device_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Completion;
    use parking_lot::Mutex;

    /// Records submissions, completes them immediately, refuses listed devices.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<DeviceId>>,
        refuse: Vec<usize>,
    }

    impl Executor for Recorder {
        type Program = &'static str;
        type Output = String;

        fn submit(
            &self,
            job: &JobDescriptor<&'static str>,
            device: DeviceId,
            done: Completion<String>,
        ) -> Result<(), SubmissionError> {
            if self.refuse.contains(&device.index()) {
                return Err(SubmissionError::Rejected { device, reason: "busy".into() });
            }
            self.seen.lock().push(device);
            done.complete(format!("{}-{}", job.program(), device.index()));
            Ok(())
        }
    }

    fn dispatcher(devices: usize, policy: SubmissionPolicy, refuse: Vec<usize>) -> Dispatcher<Recorder> {
        let target = Target::new("stub", devices).unwrap().with_policy(policy);
        Dispatcher::new(target, Recorder { refuse, ..Recorder::default() })
    }

    #[test]
    fn test_zero_devices_submits_nothing() {
        let d = dispatcher(4, SubmissionPolicy::FailFast, vec![]);
        let handles = d.dispatch_all(&JobDescriptor::new("ok", 1), 0).unwrap();
        assert!(handles.is_empty());
        assert!(d.executor().seen.lock().is_empty());
    }

    #[test]
    fn test_submission_order_matches_device_order() {
        let d = dispatcher(5, SubmissionPolicy::FailFast, vec![]);
        let handles = d.dispatch_all_devices(&JobDescriptor::new("ok", 1)).unwrap();
        let ids: Vec<_> = handles.iter().map(SubmissionHandle::device).collect();
        assert_eq!(ids, DeviceId::range(5).collect::<Vec<_>>());
        assert_eq!(*d.executor().seen.lock(), ids);
        assert_eq!(handles[3].get().unwrap(), "ok-3");
    }

    #[test]
    fn test_invalid_device_is_refused_before_backend() {
        let d = dispatcher(2, SubmissionPolicy::FailFast, vec![]);
        let err = d.dispatch(&JobDescriptor::new("ok", 1), DeviceId(2)).unwrap_err();
        assert_eq!(err, SubmissionError::InvalidDevice { device: DeviceId(2), available: 2 });
        assert!(d.executor().seen.lock().is_empty());
    }

    #[test]
    fn test_fail_fast_stops_at_first_refusal() {
        let d = dispatcher(4, SubmissionPolicy::FailFast, vec![1, 3]);
        let err = d.dispatch_all_devices(&JobDescriptor::new("ok", 1)).unwrap_err();
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.first().map(SubmissionError::device), Some(DeviceId(1)));
        assert_eq!(err.handles().len(), 1);
        assert_eq!(err.handles()[0].get().unwrap(), "ok-0");
        assert_eq!(*d.executor().seen.lock(), vec![DeviceId(0)]);
    }

    #[test]
    fn test_best_effort_tries_every_device() {
        let d = dispatcher(4, SubmissionPolicy::BestEffort, vec![1, 3]);
        let (handles, failures) = d.dispatch_all_devices(&JobDescriptor::new("ok", 1)).unwrap_err().into_parts();
        let ok: Vec<_> = handles.iter().map(|h| h.get().unwrap()).collect();
        assert_eq!(ok, vec!["ok-0", "ok-2"]);
        let refused: Vec<_> = failures.iter().map(SubmissionError::device).collect();
        assert_eq!(refused, vec![DeviceId(1), DeviceId(3)]);
    }

    #[test]
    fn test_more_devices_than_target_fails_past_the_end() {
        let d = dispatcher(2, SubmissionPolicy::FailFast, vec![]);
        let err = d.dispatch_all(&JobDescriptor::new("ok", 1), 3).unwrap_err();
        assert_eq!(err.handles().len(), 2);
        assert_eq!(err.first(), Some(&SubmissionError::InvalidDevice { device: DeviceId(2), available: 2 }));
    }
}
