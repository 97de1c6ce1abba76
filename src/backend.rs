//! Target configuration.
//!
//! A [`Target`] names the execution backend, says how many devices it
//! exposes and which [`SubmissionPolicy`] the dispatcher applies when a
//! submission is refused. It is an explicit value handed to
//! [`Dispatcher::new`](crate::dispatch::Dispatcher::new); nothing about the
//! active target lives in process-wide state.
//!
//! # Environment
//!
//! [`Target::from_env`] reads:
//!
//! - `MQPU_TARGET` — target name (default `cpu-mqpu`)
//! - `MQPU_DEVICES` — device count (default: available parallelism)
//! - `MQPU_POLICY` — `fail-fast` or `best-effort` (default `fail-fast`)
//!
//! # Example
//!
//! ```
//! use mqpu_dispatch::backend::{SubmissionPolicy, Target};
//!
//! let target = Target::new("cpu-mqpu", 4)?.with_policy(SubmissionPolicy::BestEffort);
//! assert_eq!(target.num_devices(), 4);
//! # Ok::<(), mqpu_dispatch::error::ConfigError>(())
//! ```

use core::fmt;
use core::str::FromStr;
use std::env::VarError;
use std::num::NonZeroUsize;

use briny::prelude::*;

use crate::device::DeviceRegistry;
use crate::error::ConfigError;

/// Default name used when none is configured.
pub const DEFAULT_TARGET: &str = "cpu-mqpu";

const ENV_TARGET: &str = "MQPU_TARGET";
const ENV_DEVICES: &str = "MQPU_DEVICES";
const ENV_POLICY: &str = "MQPU_POLICY";

/// What a dispatch round does when one device refuses its submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(u8)]
pub enum SubmissionPolicy {
    /// Stop at the first refusal and report it with the handles made so far.
    #[default]
    FailFast = 0,
    /// Try every device, then report all refusals with all surviving handles.
    BestEffort = 1,
}

impl TryFrom<u8> for SubmissionPolicy {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::FailFast),
            1 => Ok(Self::BestEffort),
            _ => Err(()),
        }
    }
}

impl SubmissionPolicy {
    /// Canonical spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FailFast => "fail-fast",
            Self::BestEffort => "best-effort",
        }
    }
}

impl fmt::Display for SubmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-fast" | "failfast" => Ok(Self::FailFast),
            "best-effort" | "besteffort" => Ok(Self::BestEffort),
            _ => Err(ConfigError::InvalidValue { name: ENV_POLICY, value: s.to_string() }),
        }
    }
}

/// Target names are short identifiers such as `cpu-mqpu`.
struct TargetName<'a>(&'a str);

impl Validate for TargetName<'_> {
    fn validate(&self) -> Result<(), ValidationError> {
        let name = self.0;
        if name.is_empty() || name.len() > 64 {
            return Err(ValidationError);
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// The execution target a dispatcher submits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    name: String,
    devices: usize,
    policy: SubmissionPolicy,
}

impl Target {
    /// Creates a target exposing `devices` devices, with the default policy.
    ///
    /// # Errors
    /// Fails if `name` is empty, longer than 64 bytes, or contains anything
    /// other than ASCII alphanumerics, `-` and `_`.
    pub fn new(name: impl Into<String>, devices: usize) -> Result<Self, ConfigError> {
        let name = name.into();
        TargetName(&name)
            .validate()
            .map_err(|err| ConfigError::Validation { what: "target name", err })?;
        Ok(Self { name, devices, policy: SubmissionPolicy::default() })
    }

    /// Replaces the submission policy.
    #[must_use]
    pub fn with_policy(mut self, policy: SubmissionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds a target from `MQPU_*` environment variables.
    ///
    /// # Errors
    /// Fails on unreadable variables or unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key))
    }

    /// Builds a target from an arbitrary key lookup, using the same keys and
    /// defaults as [`from_env`](Self::from_env).
    ///
    /// # Errors
    /// Fails on lookup errors or unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let read = |name: &'static str| -> Result<Option<String>, ConfigError> {
            match lookup(name) {
                Ok(raw) if !raw.trim().is_empty() => Ok(Some(raw.trim().to_string())),
                Ok(_) | Err(VarError::NotPresent) => Ok(None),
                Err(source) => Err(ConfigError::Env { name, source }),
            }
        };

        let name = read(ENV_TARGET)?.unwrap_or_else(|| DEFAULT_TARGET.to_string());
        let devices = match read(ENV_DEVICES)? {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue { name: ENV_DEVICES, value: raw })?,
            None => std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        };
        let policy = read(ENV_POLICY)?.map(|raw| raw.parse::<SubmissionPolicy>()).transpose()?.unwrap_or_default();

        Ok(Self::new(name, devices)?.with_policy(policy))
    }

    /// Target name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of devices the target exposes.
    #[must_use]
    pub const fn num_devices(&self) -> usize {
        self.devices
    }

    /// Policy applied to refused submissions.
    #[must_use]
    pub const fn policy(&self) -> SubmissionPolicy {
        self.policy
    }
}

impl DeviceRegistry for Target {
    fn device_count(&self) -> usize {
        self.devices
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} devices, {})", self.name, self.devices, self.policy)
    }
}
