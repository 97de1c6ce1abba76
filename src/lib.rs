//! mqpu_dispatch: submit one job to many devices and collect the results asynchronously.
//!
//! The caller builds a job descriptor once, fans it out to every device of a
//! target, keeps working while the devices run, and picks the results up
//! later through one handle per device, in whatever order suits it.
//!
//! # Features
//!
//! - Non-blocking fan-out of one [`JobDescriptor`](kernel::JobDescriptor) to devices `0..n`
//! - One [`SubmissionHandle`](handle::SubmissionHandle) per device with blocking,
//!   timed and `async` retrieval, plus cancellation
//! - Fail-fast or best-effort handling of refused submissions
//! - A rayon-backed CPU executor with one worker per device
//!
//! # Modules
//!
//! - [`backend`] — the [`Target`](backend::Target) configuration handed to a dispatcher
//! - [`device`] — device ids and the registry trait
//! - [`kernel`] — job descriptors and a small kernel builder
//! - [`dispatch`] — the [`Dispatcher`](dispatch::Dispatcher)
//! - [`handle`] — submission handles and completion slots
//! - [`exec`] — the executor trait and the CPU executor
//! - [`error`] — submission, execution and retrieval errors
//!
//! # Feature Flags
//!
//! - `subscriber` — enables [`telemetry::init_tracing`] for programs that want
//!   the crate's `tracing` events printed
//!
//! # Example
//!
//! ```rust
//! use mqpu_dispatch::prelude::*;
//!
//! let target = Target::new("cpu-mqpu", 2)?;
//! let exec = CpuExecutor::new(&target, |job: &JobDescriptor<u32>, device: DeviceId| {
//!     Ok(*job.program() as usize * job.repeat_count() as usize + device.index())
//! })?;
//! let dispatcher = Dispatcher::new(target, exec);
//!
//! let handles = dispatcher.dispatch_all_devices(&JobDescriptor::new(10, 3)).expect("dispatch");
//! assert_eq!(handles[1].get()?, 31);
//! assert_eq!(handles[0].get()?, 30);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_panics_doc)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod handle;
pub mod kernel;
#[cfg(feature = "subscriber")]
pub mod telemetry;

/// Common imports.
pub mod prelude {
    pub use crate::backend::{SubmissionPolicy, Target};
    pub use crate::device::{DeviceId, DeviceRegistry};
    pub use crate::dispatch::Dispatcher;
    pub use crate::error::{DispatchError, ExecutionError, RetrieveError, SubmissionError};
    pub use crate::exec::{cpu::CpuExecutor, Executor};
    pub use crate::handle::{Completion, HandleState, SubmissionHandle};
    pub use crate::kernel::{JobDescriptor, Kernel, Step};
}
