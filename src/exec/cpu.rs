//! Thread-pool CPU backend.
//!
//! # CPU Backend
//!
//! Every device is a dedicated single-threaded [`rayon`] pool whose worker is
//! named `device-<id>`. Submitting a job spawns the executor's job function
//! onto that pool and returns at once, so a slow device never holds up work
//! queued on another one. Jobs queued on the same device run one after the
//! other, in submission order.
//!
//! ## Failure Modes
//!
//! - A device switched off with [`CpuExecutor::set_available`] refuses new
//!   submissions with [`SubmissionError::DeviceUnavailable`].
//! - A job function that returns `Err` fails its handle with that cause.
//! - A job function that panics fails its handle with
//!   [`Abandoned::Panicked`]; the pool worker survives.
//! - A job cancelled before its turn is skipped.

use core::sync::atomic::{AtomicBool, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::backend::Target;
use crate::device::{DeviceId, DeviceRegistry};
use crate::error::{Abandoned, BoxError, ConfigError, SubmissionError};
use crate::exec::Executor;
use crate::handle::Completion;
use crate::kernel::JobDescriptor;

/// Signature of the function a [`CpuExecutor`] runs for every job.
pub type JobFn<P, T> = dyn Fn(&JobDescriptor<P>, DeviceId) -> Result<T, BoxError> + Send + Sync;

struct DeviceLane {
    pool: ThreadPool,
    available: AtomicBool,
}

/// Runs jobs on one rayon worker per device.
pub struct CpuExecutor<P, T> {
    lanes: Vec<DeviceLane>,
    run: Arc<JobFn<P, T>>,
}

impl<P, T> CpuExecutor<P, T>
where
    P: Send + Sync + 'static,
    T: Send + 'static,
{
    /// Starts one worker per device of `target`, each running `run` for the
    /// jobs submitted to it.
    ///
    /// # Errors
    /// Fails if a worker thread cannot be spawned.
    pub fn new<F>(target: &Target, run: F) -> Result<Self, ConfigError>
    where
        F: Fn(&JobDescriptor<P>, DeviceId) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let lanes = DeviceId::range(target.num_devices())
            .map(|device| -> Result<DeviceLane, ConfigError> {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(1)
                    .thread_name(move |_| device.to_string())
                    .build()
                    .map_err(|e| ConfigError::Pool { device, reason: e.to_string() })?;
                Ok(DeviceLane { pool, available: AtomicBool::new(true) })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        debug!(target_name = target.name(), devices = lanes.len(), "cpu executor started");
        Ok(Self { lanes, run: Arc::new(run) })
    }

    /// Marks a device as accepting or refusing new submissions. Jobs already
    /// queued on it still run. Unknown devices are ignored.
    pub fn set_available(&self, device: DeviceId, available: bool) {
        if let Some(lane) = self.lanes.get(device.index()) {
            lane.available.store(available, Ordering::Release);
        }
    }

    /// Whether `device` currently accepts submissions.
    #[must_use]
    pub fn is_available(&self, device: DeviceId) -> bool {
        self.lanes.get(device.index()).is_some_and(|lane| lane.available.load(Ordering::Acquire))
    }
}

impl<P, T> DeviceRegistry for CpuExecutor<P, T> {
    fn device_count(&self) -> usize {
        self.lanes.len()
    }
}

impl<P, T> Executor for CpuExecutor<P, T>
where
    P: Send + Sync + 'static,
    T: Send + 'static,
{
    type Program = P;
    type Output = T;

    fn submit(
        &self,
        job: &JobDescriptor<P>,
        device: DeviceId,
        done: Completion<T>,
    ) -> Result<(), SubmissionError> {
        let lane = self.lanes.get(device.index()).ok_or(SubmissionError::InvalidDevice {
            device,
            available: self.lanes.len(),
        })?;
        if !lane.available.load(Ordering::Acquire) {
            return Err(SubmissionError::DeviceUnavailable { device });
        }

        let job = job.clone();
        let run = Arc::clone(&self.run);
        lane.pool.spawn(move || {
            if done.is_cancelled() {
                debug!(device = %device, "skipping cancelled job");
                return;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| (*run)(&job, device))) {
                Ok(result) => done.finish(result),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(device = %device, %message, "job panicked");
                    done.abandon(Abandoned::Panicked(message));
                }
            }
        });
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
