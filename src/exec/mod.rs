//! # Execution Backends
//!
//! An [`Executor`] accepts one job bound to one device and runs it somewhere
//! else: another thread, another process, a remote service. It reports the
//! outcome through the [`Completion`] it was given; the dispatcher never waits
//! on it.
//!
//! ## Submodules
//!
//! - [`cpu`] — one rayon worker pool per device, running a caller-supplied
//!   job function
//!
//! ## Writing a Backend
//!
//! 1. Return `Err` from [`Executor::submit`] only when the job was refused
//!    outright. Once `Ok` is returned the job belongs to the backend.
//! 2. Report every accepted job exactly once through its `Completion`.
//! 3. Never block `submit` on execution.
//!
//! ```
//! use mqpu_dispatch::device::DeviceId;
//! use mqpu_dispatch::error::SubmissionError;
//! use mqpu_dispatch::exec::Executor;
//! use mqpu_dispatch::handle::Completion;
//! use mqpu_dispatch::kernel::JobDescriptor;
//!
//! /// Finishes every job on the submitting thread.
//! struct Immediate;
//!
//! impl Executor for Immediate {
//!     type Program = String;
//!     type Output = usize;
//!
//!     fn submit(
//!         &self,
//!         job: &JobDescriptor<String>,
//!         _device: DeviceId,
//!         done: Completion<usize>,
//!     ) -> Result<(), SubmissionError> {
//!         done.complete(job.program().len());
//!         Ok(())
//!     }
//! }
//! ```

use crate::device::DeviceId;
use crate::error::SubmissionError;
use crate::handle::Completion;
use crate::kernel::JobDescriptor;

pub mod cpu;

/// A service that runs one job on one device asynchronously.
///
/// Must be safe to submit to from several threads at once.
pub trait Executor: Send + Sync {
    /// Program type carried by the job descriptors this backend runs.
    type Program: Send + Sync + 'static;
    /// Result produced by one execution.
    type Output: Send + 'static;

    /// Starts `job` on `device` and returns without waiting for it.
    ///
    /// # Errors
    /// Returns a [`SubmissionError`] when the device refuses the job. The
    /// completion is dropped in that case and nothing runs.
    fn submit(
        &self,
        job: &JobDescriptor<Self::Program>,
        device: DeviceId,
        done: Completion<Self::Output>,
    ) -> Result<(), SubmissionError>;
}

impl<E: Executor + ?Sized> Executor for std::sync::Arc<E> {
    type Program = E::Program;
    type Output = E::Output;

    fn submit(
        &self,
        job: &JobDescriptor<Self::Program>,
        device: DeviceId,
        done: Completion<Self::Output>,
    ) -> Result<(), SubmissionError> {
        (**self).submit(job, device, done)
    }
}
