//! Error types for submission, execution and retrieval.
//!
//! Submission failures surface synchronously from the dispatcher. Execution
//! failures are stored in the handle's slot and surface only when the caller
//! retrieves that handle.

use core::fmt;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use briny::prelude::ValidationError;

use crate::device::DeviceId;
use crate::handle::SubmissionHandle;

/// Boxed cause produced by a backend when a job fails mid-execution.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// A device submission was refused before any execution began.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    /// The id is outside the target's device range.
    #[error("{device} is out of range (target has {available} devices)")]
    InvalidDevice {
        /// Requested device.
        device: DeviceId,
        /// Devices exposed by the target.
        available: usize,
    },
    /// The device exists but is not accepting work.
    #[error("{device} is unavailable")]
    DeviceUnavailable {
        /// Requested device.
        device: DeviceId,
    },
    /// The backend refused the job for a backend-specific reason.
    #[error("{device} rejected the submission: {reason}")]
    Rejected {
        /// Requested device.
        device: DeviceId,
        /// Backend message.
        reason: String,
    },
}

impl SubmissionError {
    /// The device the failed submission was aimed at.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        match self {
            Self::InvalidDevice { device, .. }
            | Self::DeviceUnavailable { device }
            | Self::Rejected { device, .. } => *device,
        }
    }
}

/// A job failed after it started running on its device.
///
/// Cloning shares the underlying cause, so repeated retrievals of one handle
/// report the same error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("execution on {device} failed: {source}")]
pub struct ExecutionError {
    /// Device the job ran on.
    pub device: DeviceId,
    /// Backend-supplied cause.
    #[source]
    pub source: Arc<dyn Error + Send + Sync + 'static>,
}

impl ExecutionError {
    /// Wraps a backend cause.
    pub fn new(device: DeviceId, source: impl Into<BoxError>) -> Self {
        Self { device, source: Arc::from(source.into()) }
    }
}

/// Reasons a completion slot was torn down without a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Abandoned {
    /// The job body panicked.
    #[error("job panicked: {0}")]
    Panicked(String),
    /// The backend dropped the job without reporting an outcome.
    #[error("job was dropped before it reported an outcome")]
    Dropped,
}

/// Failure retrieving the outcome of one handle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetrieveError {
    /// The bound execution failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// The handle was cancelled before it finished.
    #[error("submission to {device} was cancelled")]
    Cancelled {
        /// Device the submission was bound to.
        device: DeviceId,
    },
    /// The wait deadline elapsed; the execution keeps running.
    #[error("timed out after {waited:?} waiting on {device}")]
    Timeout {
        /// Device the submission was bound to.
        device: DeviceId,
        /// How long the caller waited.
        waited: Duration,
    },
}

/// Problems building a target or a job from user input.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable could not be read.
    #[error("failed to read {name}: {source}")]
    Env {
        /// Variable name.
        name: &'static str,
        /// Underlying error.
        source: std::env::VarError,
    },
    /// A configuration value could not be parsed.
    #[error("invalid value {value:?} for {name}")]
    InvalidValue {
        /// Setting name.
        name: &'static str,
        /// Raw value.
        value: String,
    },
    /// A constructed value failed validation.
    #[error("{what} failed validation: {err}")]
    Validation {
        /// What was validated.
        what: &'static str,
        /// Validation failure.
        err: ValidationError,
    },
    /// The worker pool for a device could not be started.
    #[error("failed to start worker pool for {device}: {reason}")]
    Pool {
        /// Device whose pool failed.
        device: DeviceId,
        /// Builder error text.
        reason: String,
    },
}

/// Outcome of a dispatch round that had at least one failed submission.
///
/// Under fail-fast [`handles`](Self::handles) holds every submission made
/// before the first failure and [`failures`](Self::failures) holds that single
/// failure. Under best-effort the handles are every successful submission and
/// the failures every rejected one, both in device order. Returned handles
/// stay live either way.
pub struct DispatchError<T> {
    handles: Vec<SubmissionHandle<T>>,
    failures: Vec<SubmissionError>,
}

impl<T> DispatchError<T> {
    /// Settles a dispatch round: the handles when nothing was refused,
    /// otherwise an error carrying both.
    pub(crate) fn from_round(
        handles: Vec<SubmissionHandle<T>>,
        failures: Vec<SubmissionError>,
    ) -> Result<Vec<SubmissionHandle<T>>, Self> {
        if failures.is_empty() {
            return Ok(handles);
        }
        Err(Self { handles, failures })
    }

    /// Submissions that went through, in device order.
    #[must_use]
    pub fn handles(&self) -> &[SubmissionHandle<T>] {
        &self.handles
    }

    /// Rejected submissions, in device order. Never empty.
    #[must_use]
    pub fn failures(&self) -> &[SubmissionError] {
        &self.failures
    }

    /// The first rejected submission.
    #[must_use]
    pub fn first(&self) -> Option<&SubmissionError> {
        self.failures.first()
    }

    /// Splits into the surviving handles and the failures.
    #[must_use]
    pub fn into_parts(self) -> (Vec<SubmissionHandle<T>>, Vec<SubmissionError>) {
        (self.handles, self.failures)
    }
}

impl<T> fmt::Debug for DispatchError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchError")
            .field("handles", &self.handles)
            .field("failures", &self.failures)
            .finish()
    }
}

impl<T> fmt::Display for DispatchError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.as_slice() {
            [] => f.write_str("dispatch round failed"),
            [only] => write!(f, "submission failed: {only}"),
            [first, ..] => write!(f, "{} submissions failed, first: {first}", self.failures.len()),
        }
    }
}

impl<T> Error for DispatchError<T> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.failures.first().map(|e| e as &(dyn Error + 'static))
    }
}
